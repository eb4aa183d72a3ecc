//! Error types for the geofencing crate.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! specific conditions. Transition dispatch never produces an error for the
//! caller: unknown regions and store lookup failures are counted instead.

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors that occur during input validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Region id cannot be empty")]
    EmptyRegionId,

    #[error("Latitude {value} is out of range [-90.0, 90.0]")]
    LatitudeOutOfRange {
        value: f64,
    },

    #[error("Longitude {value} is out of range [-180.0, 180.0]")]
    LongitudeOutOfRange {
        value: f64,
    },

    #[error("Radius {value} must be a positive, finite number of meters")]
    InvalidRadius {
        value: f64,
    },

    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },
}

/// Execution errors that occur while running commands.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Execution environment failed to start: {reason}")]
    BootstrapFailed {
        reason: String,
    },

    #[error("No dispatcher entry handle has been persisted")]
    MissingDispatcherHandle,

    #[error("Location source error: {message}")]
    LocationSource {
        message: String,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Errors decoding calls arriving over the method-call channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Unknown method: {method}")]
    UnknownMethod {
        method: String,
    },

    #[error("Malformed arguments for {method}: {reason}")]
    MalformedArguments {
        method: String,
        reason: String,
    },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum GeofenceError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl From<StorageError> for GeofenceError {
    fn from(err: StorageError) -> Self {
        Self::Execution(ExecutionError::Storage {
            message: err.to_string(),
        })
    }
}

impl GeofenceError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a channel error.
    #[must_use]
    pub const fn is_channel(&self) -> bool {
        matches!(self, Self::Channel(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if this error is retryable.
    ///
    /// A failed bootstrap leaves the manager in `Initializing` with its buffer
    /// intact, so `initialize_service` may be called again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Channel(_) | Self::Internal { .. } => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::BootstrapFailed { .. }
                    | ExecutionError::Timeout { .. }
                    | ExecutionError::LocationSource { .. }
            ),
        }
    }
}

/// Result type alias for geofencing operations.
pub type GeofenceResult<T> = Result<T, GeofenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_latitude() {
        let err = ValidationError::LatitudeOutOfRange { value: 91.5 };
        let msg = format!("{err}");
        assert!(msg.contains("91.5"));
        assert!(msg.contains("out of range"));
    }

    #[test]
    fn test_execution_error_bootstrap() {
        let err = ExecutionError::BootstrapFailed {
            reason: "entry point not found".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("failed to start"));
        assert!(msg.contains("entry point not found"));
    }

    #[test]
    fn test_execution_error_timeout() {
        let err = ExecutionError::Timeout { duration_ms: 5000 };
        assert!(format!("{err}").contains("5000ms"));
    }

    #[test]
    fn test_channel_error_unknown_method() {
        let err = ChannelError::UnknownMethod {
            method: "GeofencingPlugin.nope".to_string(),
        };
        assert!(format!("{err}").contains("GeofencingPlugin.nope"));
    }

    #[test]
    fn test_geofence_error_from_validation() {
        let err: GeofenceError = ValidationError::EmptyRegionId.into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_geofence_error_from_storage() {
        let err: GeofenceError = StorageError::BackendError("disk full".to_string()).into();
        assert!(err.is_execution());
        assert!(format!("{err}").contains("disk full"));
    }

    #[test]
    fn test_geofence_error_retryable() {
        let bootstrap: GeofenceError = ExecutionError::BootstrapFailed {
            reason: "x".to_string(),
        }
        .into();
        assert!(bootstrap.is_retryable());

        let missing: GeofenceError = ExecutionError::MissingDispatcherHandle.into();
        assert!(!missing.is_retryable());

        let internal = GeofenceError::internal("unexpected state");
        assert!(internal.is_internal());
        assert!(!internal.is_retryable());
    }
}
