//! Recording platform doubles.
//!
//! In-process implementations of the platform traits that remember what they
//! were asked to do. Embedders use them for simulations; the crate's tests use
//! them to observe monitoring calls and outbound notifications.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::dispatch::TransitionNotification;
use crate::error::{ExecutionError, GeofenceError, GeofenceResult};
use crate::geofence::{CallbackHandle, Coordinate, Region};

use super::{ExecutionEnvironment, LocationSource, NotificationSink, PlatformError};

/// Location source that tracks the set of monitored regions.
///
/// By default it accepts everything. [`with_limit`](Self::with_limit) makes it
/// enforce a hard cap the way the OS service does, `set_failing` makes every
/// start fail, and `set_start_delay` stalls each start to simulate a slow
/// platform call.
#[derive(Debug, Default)]
pub struct RecordingLocationSource {
    monitored: Mutex<BTreeMap<String, Region>>,
    location: Mutex<Option<Coordinate>>,
    limit: Option<usize>,
    fail_starts: AtomicBool,
    start_delay: Mutex<Duration>,
}

impl RecordingLocationSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A source that rejects starting a new region once `limit` are monitored.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Set the device location reported to the manager.
    pub fn set_location(&self, location: Option<Coordinate>) {
        if let Ok(mut guard) = self.location.lock() {
            *guard = location;
        }
    }

    /// Make subsequent `start_monitoring` calls fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail_starts.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long inside every `start_monitoring` call.
    pub fn set_start_delay(&self, delay: Duration) {
        if let Ok(mut guard) = self.start_delay.lock() {
            *guard = delay;
        }
    }

    /// Ids currently monitored, sorted.
    #[must_use]
    pub fn monitored_ids(&self) -> Vec<String> {
        self.monitored
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `region_id` is currently monitored.
    #[must_use]
    pub fn is_monitoring(&self, region_id: &str) -> bool {
        self.monitored
            .lock()
            .map(|m| m.contains_key(region_id))
            .unwrap_or(false)
    }
}

impl LocationSource for RecordingLocationSource {
    fn start_monitoring(&self, region: &Region) -> Result<(), PlatformError> {
        let delay = self.start_delay.lock().map(|d| *d).unwrap_or_default();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.fail_starts.load(Ordering::SeqCst) {
            return Err(PlatformError::new(format!("cannot monitor {}", region.id)));
        }

        let mut monitored = self
            .monitored
            .lock()
            .map_err(|_| PlatformError::new("poisoned location source"))?;
        if let Some(limit) = self.limit {
            if !monitored.contains_key(&region.id) && monitored.len() >= limit {
                return Err(PlatformError::new("monitoring limit reached"));
            }
        }
        monitored.insert(region.id.clone(), region.clone());
        Ok(())
    }

    fn stop_monitoring(&self, region_id: &str) -> Result<(), PlatformError> {
        let mut monitored = self
            .monitored
            .lock()
            .map_err(|_| PlatformError::new("poisoned location source"))?;
        monitored.remove(region_id);
        Ok(())
    }

    fn last_known_location(&self) -> Option<Coordinate> {
        self.location.lock().ok().and_then(|guard| *guard)
    }
}

/// Execution environment that records bootstrap requests.
#[derive(Debug, Default)]
pub struct RecordingEnvironment {
    bootstraps: Mutex<Vec<CallbackHandle>>,
    fail: AtomicBool,
}

impl RecordingEnvironment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent bootstrap requests fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Entry handles passed to successful bootstrap requests, in order.
    #[must_use]
    pub fn bootstraps(&self) -> Vec<CallbackHandle> {
        self.bootstraps.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

impl ExecutionEnvironment for RecordingEnvironment {
    fn bootstrap(&self, entry: CallbackHandle) -> Result<(), PlatformError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PlatformError::new(format!("no entry point for handle {entry}")));
        }
        self.bootstraps
            .lock()
            .map_err(|_| PlatformError::new("poisoned environment"))?
            .push(entry);
        Ok(())
    }
}

/// Notification sink backed by a channel.
#[derive(Debug)]
pub struct ChannelNotificationSink {
    tx: Sender<TransitionNotification>,
}

impl NotificationSink for ChannelNotificationSink {
    fn notify(&self, notification: TransitionNotification) {
        // Receiver gone means nobody is listening; notifications are best-effort.
        let _ = self.tx.send(notification);
    }
}

/// Receiving end of a [`ChannelNotificationSink`].
#[derive(Debug)]
pub struct NotificationStream {
    rx: Receiver<TransitionNotification>,
}

/// Create a connected sink/stream pair.
#[must_use]
pub fn notification_channel() -> (ChannelNotificationSink, NotificationStream) {
    let (tx, rx) = unbounded();
    (ChannelNotificationSink { tx }, NotificationStream { rx })
}

impl NotificationStream {
    /// Receive the next notification with a timeout.
    ///
    /// # Errors
    /// `ExecutionError::Timeout` when nothing arrives in time, or
    /// `ExecutionError::Disconnected` once every sink is dropped.
    pub fn recv_timeout(&self, timeout: Duration) -> GeofenceResult<TransitionNotification> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => GeofenceError::Execution(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => GeofenceError::Execution(ExecutionError::Disconnected {
                path: "notification_stream".to_string(),
            }),
        })
    }

    /// Everything received so far, without blocking.
    #[must_use]
    pub fn drain(&self) -> Vec<TransitionNotification> {
        self.rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(id: &str) -> Region {
        Region::new(id, Coordinate::new(0.0, 0.0))
    }

    #[test]
    fn test_limit_rejects_new_regions_only() {
        let source = RecordingLocationSource::with_limit(1);
        source.start_monitoring(&region("a")).unwrap();
        source.start_monitoring(&region("a")).unwrap();

        let err = source.start_monitoring(&region("b")).unwrap_err();
        assert_eq!(err.message, "monitoring limit reached");

        source.stop_monitoring("a").unwrap();
        source.start_monitoring(&region("b")).unwrap();
        assert_eq!(source.monitored_ids(), vec!["b"]);
    }

    #[test]
    fn test_failing_source_monitors_nothing() {
        let source = RecordingLocationSource::new();
        source.set_failing(true);
        assert!(source.start_monitoring(&region("a")).is_err());
        assert!(!source.is_monitoring("a"));
    }
}
