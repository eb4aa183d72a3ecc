//! Platform collaborators.
//!
//! The manager talks to three things it does not own: the OS location
//! service, the headless execution environment it boots, and the outbound
//! notification channel into that environment. Each is a trait so hosts can
//! plug in the real bindings and tests can plug in recording doubles.

pub mod recording;

use thiserror::Error;

use crate::dispatch::TransitionNotification;
use crate::geofence::{CallbackHandle, Coordinate, Region};

/// Failure reported by a platform collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct PlatformError {
    /// Collaborator-supplied description.
    pub message: String,
}

impl PlatformError {
    /// Wrap a failure description.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The OS region-monitoring service.
///
/// Transition callbacks flow back through a [`crate::TransitionSender`].
pub trait LocationSource: Send + Sync {
    /// Start monitoring `region` for enter and exit transitions.
    fn start_monitoring(&self, region: &Region) -> Result<(), PlatformError>;

    /// Stop monitoring the region with this id. Unknown ids are not an error.
    fn stop_monitoring(&self, region_id: &str) -> Result<(), PlatformError>;

    /// Last known device location, used as the reference point for capacity selection.
    fn last_known_location(&self) -> Option<Coordinate> {
        None
    }
}

/// The headless execution environment that receives notifications.
pub trait ExecutionEnvironment: Send + Sync {
    /// Request that the environment boot with `entry`.
    ///
    /// Must return once the request is issued; readiness is reported later
    /// through `service_initialized`. An error means the request itself failed.
    fn bootstrap(&self, entry: CallbackHandle) -> Result<(), PlatformError>;
}

/// Outbound notification channel into the execution environment.
///
/// Fire-and-forget: implementations must not block waiting for acknowledgment.
pub trait NotificationSink: Send + Sync {
    /// Hand one notification to the environment.
    fn notify(&self, notification: TransitionNotification);
}
