//! Manager configuration.

use std::time::Duration;

use crate::capacity::MAX_MONITORED_REGIONS;
use crate::error::{GeofenceError, ValidationError};
use crate::geofence::DEFAULT_RADIUS_METERS;

/// Tunables for a [`GeofenceManager`](crate::GeofenceManager).
#[derive(Debug, Clone)]
pub struct GeofenceConfig {
    /// Platform cap on simultaneously monitored regions.
    pub max_monitored_regions: usize,
    /// Radius applied to geofences registered through the command channel.
    pub default_radius_meters: f64,
    /// Max queued commands before callers block. Transitions are not bounded by it.
    pub queue_capacity: usize,
    /// How long buffered transitions survive after a failed bootstrap.
    pub bootstrap_retry_window: Duration,
    /// Worker idle tick for housekeeping.
    pub maintenance_interval: Duration,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            max_monitored_regions: MAX_MONITORED_REGIONS,
            default_radius_meters: DEFAULT_RADIUS_METERS,
            queue_capacity: 4096,
            bootstrap_retry_window: Duration::from_secs(5 * 60),
            maintenance_interval: Duration::from_millis(50),
        }
    }
}

impl GeofenceConfig {
    /// Check every field.
    ///
    /// # Errors
    /// `ValidationError::InvalidConfig` naming the first bad field.
    pub fn validate(self) -> Result<Self, GeofenceError> {
        if self.max_monitored_regions == 0 {
            return Err(invalid("max_monitored_regions", "must be at least 1"));
        }
        if !self.default_radius_meters.is_finite() || self.default_radius_meters <= 0.0 {
            return Err(invalid(
                "default_radius_meters",
                &format!("must be positive and finite (got {})", self.default_radius_meters),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be at least 1"));
        }
        if self.maintenance_interval.is_zero() {
            return Err(invalid("maintenance_interval", "must be non-zero"));
        }
        if chrono::Duration::from_std(self.bootstrap_retry_window).is_err() {
            return Err(invalid("bootstrap_retry_window", "out of range"));
        }
        Ok(self)
    }
}

fn invalid(field: &str, reason: &str) -> GeofenceError {
    ValidationError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
