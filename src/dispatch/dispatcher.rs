//! Transition dispatcher.
//!
//! Resolves the callback handle for a region and forwards a notification to
//! the execution environment. A region with no stored mapping is discarded
//! and counted rather than delivered with a placeholder handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::geofence::{Region, TransitionKind};
use crate::platform::NotificationSink;
use crate::storage::RegionStore;

use super::notification::TransitionNotification;

/// What happened to a dispatch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Notification handed to the sink.
    Delivered,
    /// No callback mapping for the region; nothing was sent.
    UnknownRegion,
    /// The store could not be read; nothing was sent.
    StoreUnavailable,
}

/// Dispatch counters, readable from outside the worker.
#[derive(Debug, Default)]
pub struct DispatchCounters {
    delivered: AtomicU64,
    unknown_regions: AtomicU64,
    store_failures: AtomicU64,
}

impl DispatchCounters {
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn unknown_regions(&self) -> u64 {
        self.unknown_regions.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn store_failures(&self) -> u64 {
        self.store_failures.load(Ordering::Relaxed)
    }
}

/// Formats and forwards transition notifications.
pub struct Dispatcher {
    store: Arc<dyn RegionStore>,
    sink: Arc<dyn NotificationSink>,
    counters: Arc<DispatchCounters>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(store: Arc<dyn RegionStore>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            sink,
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    #[must_use]
    pub fn counters(&self) -> Arc<DispatchCounters> {
        Arc::clone(&self.counters)
    }

    /// Forward one transition for `region`.
    pub fn dispatch(&self, region: &Region, kind: TransitionKind) -> DispatchOutcome {
        let handle = match self.store.get(&region.id) {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                self.counters.unknown_regions.fetch_add(1, Ordering::Relaxed);
                warn!(region_id = %region.id, %kind, "no callback mapping for region; transition discarded");
                return DispatchOutcome::UnknownRegion;
            }
            Err(e) => {
                self.counters.store_failures.fetch_add(1, Ordering::Relaxed);
                error!(region_id = %region.id, %kind, error = %e, "failed to resolve callback handle");
                return DispatchOutcome::StoreUnavailable;
            }
        };

        debug!(region_id = %region.id, %kind, %handle, "dispatching transition");
        self.sink.notify(TransitionNotification {
            handle,
            region_id: region.id.clone(),
            center: region.center,
            kind,
        });
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        DispatchOutcome::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geofence::{CallbackHandle, Coordinate};
    use crate::platform::recording::notification_channel;
    use crate::storage::InMemoryRegionStore;

    #[test]
    fn test_dispatch_formats_payload() {
        let store = Arc::new(InMemoryRegionStore::new());
        store.put("home", CallbackHandle::new(42)).unwrap();
        let (sink, stream) = notification_channel();
        let dispatcher = Dispatcher::new(store, Arc::new(sink));

        let region = Region::new("home", Coordinate::new(1.0, 2.0));
        assert_eq!(dispatcher.dispatch(&region, TransitionKind::Enter), DispatchOutcome::Delivered);

        let sent = stream.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].to_arguments(),
            serde_json::json!([42, ["home"], [1.0, 2.0], 1])
        );
        assert_eq!(dispatcher.counters().delivered(), 1);
    }

    #[test]
    fn test_unknown_region_sends_nothing() {
        let store = Arc::new(InMemoryRegionStore::new());
        let (sink, stream) = notification_channel();
        let dispatcher = Dispatcher::new(store, Arc::new(sink));

        let region = Region::new("ghost", Coordinate::new(0.0, 0.0));
        assert_eq!(dispatcher.dispatch(&region, TransitionKind::Enter), DispatchOutcome::UnknownRegion);
        assert!(stream.drain().is_empty());
        assert_eq!(dispatcher.counters().unknown_regions(), 1);
        assert_eq!(dispatcher.counters().delivered(), 0);
    }

    #[test]
    fn test_zero_handle_is_delivered() {
        let store = Arc::new(InMemoryRegionStore::new());
        store.put("origin", CallbackHandle::new(0)).unwrap();
        let (sink, stream) = notification_channel();
        let dispatcher = Dispatcher::new(store, Arc::new(sink));

        let region = Region::new("origin", Coordinate::new(0.0, 0.0));
        assert_eq!(dispatcher.dispatch(&region, TransitionKind::Exit), DispatchOutcome::Delivered);
        assert_eq!(stream.drain()[0].handle, CallbackHandle::new(0));
    }
}
