//! Geofence lifecycle manager.
//!
//! `GeofenceManager` is the context object a host wires between the command
//! channel, the OS location callbacks and the execution environment. It owns a
//! dedicated worker thread that holds all mutable state; public calls are
//! messages to that worker. Commands block until the worker replies; OS
//! transitions go on their own unbounded queue, so they never block and are
//! never dropped.

mod worker;

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::buffer::PendingEvent;
use crate::config::GeofenceConfig;
use crate::dispatch::{DispatchCounters, DispatchState, Dispatcher};
use crate::error::{ExecutionError, GeofenceError, GeofenceResult};
use crate::geofence::{CallbackHandle, Coordinate, Geofence, Region, TransitionKind};
use crate::platform::{ExecutionEnvironment, LocationSource, NotificationSink};
use crate::storage::RegionStore;

use worker::{ControlMsg, RegisterMode, Worker, WorkerStats};

/// The platform collaborators a manager drives.
#[derive(Clone)]
pub struct Platform {
    /// OS region monitoring.
    pub location: Arc<dyn LocationSource>,
    /// Background execution environment that hosts the dispatcher.
    pub environment: Arc<dyn ExecutionEnvironment>,
    /// Where formatted transition notifications go.
    pub notifications: Arc<dyn NotificationSink>,
}

/// Which regions a registration left monitored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationOutcome {
    /// Ids now monitored.
    pub monitored: Vec<String>,
    /// Ids discarded because the monitored-region cap was exceeded.
    pub dropped: Vec<String>,
}

impl RegistrationOutcome {
    /// Whether `region_id` ended up in the monitored set.
    #[must_use]
    pub fn is_monitored(&self, region_id: &str) -> bool {
        self.monitored.iter().any(|id| id == region_id)
    }
}

/// Point-in-time diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Dispatch lifecycle state.
    pub state: DispatchState,
    /// Buffered transitions awaiting the ready signal, at most one per region.
    pub pending: usize,
    /// Regions currently monitored by the location source.
    pub monitored_regions: usize,
    /// Notifications handed to the sink.
    pub delivered: u64,
    /// Transitions for regions with no stored mapping.
    pub unknown_regions: u64,
    /// Transitions skipped because the store lookup failed.
    pub store_failures: u64,
    /// Buffered transitions discarded for exceeding the configured max age.
    pub expired_transitions: u64,
}

/// Non-blocking handle for delivering OS region transitions.
///
/// Clone it into whatever context receives the location service callbacks.
#[derive(Debug, Clone)]
pub struct TransitionSender {
    tx: Sender<PendingEvent>,
}

impl TransitionSender {
    /// The device entered `region`.
    pub fn on_enter(&self, region: Region) {
        self.send(region, TransitionKind::Enter);
    }

    /// The device exited `region`.
    pub fn on_exit(&self, region: Region) {
        self.send(region, TransitionKind::Exit);
    }

    /// Enqueue a transition without blocking.
    ///
    /// After the manager has shut down the transition is ignored.
    pub fn send(&self, region: Region, kind: TransitionKind) {
        if self.tx.send(PendingEvent::new(region, kind)).is_err() {
            debug!(%kind, "dispatch worker stopped; transition ignored");
        }
    }
}

/// Geofence lifecycle and event dispatch manager.
pub struct GeofenceManager {
    cfg: GeofenceConfig,
    store: Arc<dyn RegionStore>,
    commands: Sender<ControlMsg>,
    transitions: TransitionSender,
    counters: Arc<DispatchCounters>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for GeofenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeofenceManager")
            .field("cfg", &self.cfg)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

fn disconnected() -> GeofenceError {
    GeofenceError::Execution(ExecutionError::Disconnected {
        path: "geofence_worker".to_string(),
    })
}

impl GeofenceManager {
    /// Start a manager in the `Uninitialized` state.
    ///
    /// `store` is read lazily: a relaunched process resumes from whatever
    /// mappings and dispatcher handle it holds.
    ///
    /// # Errors
    /// A validation error for an invalid `cfg`, or an internal error if the
    /// worker thread cannot be spawned.
    pub fn new(
        cfg: GeofenceConfig,
        store: Arc<dyn RegionStore>,
        platform: Platform,
    ) -> GeofenceResult<Self> {
        let cfg = cfg.validate()?;

        let (commands, commands_rx) = bounded::<ControlMsg>(cfg.queue_capacity);
        let (transitions, transitions_rx) = unbounded::<PendingEvent>();

        let dispatcher = Dispatcher::new(Arc::clone(&store), platform.notifications);
        let counters = dispatcher.counters();

        let worker = Worker::new(
            cfg.clone(),
            dispatcher,
            Arc::clone(&store),
            platform.location,
            platform.environment,
        );

        let join = thread::Builder::new()
            .name("geofence-dispatch".to_string())
            .spawn(move || worker.run(commands_rx, transitions_rx))
            .map_err(|e| GeofenceError::internal(format!("failed to spawn dispatch worker: {e}")))?;

        info!(
            max_monitored_regions = cfg.max_monitored_regions,
            queue_capacity = cfg.queue_capacity,
            "geofence manager started"
        );

        Ok(Self {
            cfg,
            store,
            commands,
            transitions: TransitionSender { tx: transitions },
            counters,
            join: Mutex::new(Some(join)),
        })
    }

    fn request<T>(&self, make: impl FnOnce(Sender<GeofenceResult<T>>) -> ControlMsg) -> GeofenceResult<T> {
        let (reply_tx, reply_rx) = bounded::<GeofenceResult<T>>(1);
        self.commands.send(make(reply_tx)).map_err(|_| disconnected())?;
        reply_rx.recv().map_err(|_| disconnected())?
    }

    /// Persist `entry` as the dispatcher entry handle and request a bootstrap.
    ///
    /// Moves `Uninitialized` to `Initializing`. Calling again while a bootstrap
    /// is in flight, or once ready, only updates the persisted handle. After a
    /// failed bootstrap the call retries it.
    ///
    /// # Errors
    /// `ExecutionError::BootstrapFailed` if the environment rejects the request;
    /// the manager stays `Initializing` with its buffer intact.
    pub fn initialize_service(&self, entry: CallbackHandle) -> GeofenceResult<()> {
        self.request(|reply| ControlMsg::Initialize {
            entry: Some(entry),
            reply,
        })
        .map(|_| ())
    }

    /// Initialize from the persisted dispatcher handle after an OS relaunch.
    ///
    /// # Errors
    /// `ExecutionError::MissingDispatcherHandle` if none was ever persisted.
    pub fn relaunch_for_location_event(&self) -> GeofenceResult<CallbackHandle> {
        self.request(|reply| ControlMsg::Initialize { entry: None, reply })
    }

    /// Register one geofence with the configured default radius.
    ///
    /// The new region joins the current monitored set (an existing region with
    /// the same id is replaced), then capacity selection runs over the whole
    /// set using the device location, or the new region's center when the
    /// location is unknown.
    ///
    /// # Errors
    /// A validation error for an empty id or out-of-range coordinates, an
    /// execution error if the location source rejects the region, or a
    /// storage error if the mapping cannot be written.
    pub fn register_geofence(
        &self,
        callback: CallbackHandle,
        id: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> GeofenceResult<RegistrationOutcome> {
        let geofence =
            Geofence::new(callback, id, latitude, longitude)?.with_radius(self.cfg.default_radius_meters)?;
        self.register(geofence)
    }

    /// Register a fully specified geofence. See [`Self::register_geofence`].
    ///
    /// # Errors
    /// As for [`Self::register_geofence`]; the geofence is validated again
    /// since its fields are public.
    pub fn register(&self, geofence: Geofence) -> GeofenceResult<RegistrationOutcome> {
        self.request(|reply| ControlMsg::Register {
            geofences: vec![geofence],
            reference: None,
            mode: RegisterMode::Merge,
            reply,
        })
    }

    /// Replace the monitored set with `geofences`.
    ///
    /// This is not incremental: regions monitored before the call and absent
    /// from `geofences` stop being monitored and lose their mappings. When
    /// the batch exceeds capacity, the regions nearest `reference` are kept.
    ///
    /// # Errors
    /// A validation error if any entry is invalid, in which case nothing
    /// changes. A location source or storage failure part way leaves the
    /// monitored set at what the platform accepted.
    pub fn register_geofences(
        &self,
        geofences: Vec<Geofence>,
        reference: Coordinate,
    ) -> GeofenceResult<RegistrationOutcome> {
        self.request(|reply| ControlMsg::Register {
            geofences,
            reference: Some(reference),
            mode: RegisterMode::Replace,
            reply,
        })
    }

    /// Stop monitoring `region_id` and forget its mapping.
    ///
    /// Returns whether a mapping existed.
    ///
    /// # Errors
    /// An execution error if the location source fails to stop monitoring,
    /// or a storage error if the mapping cannot be removed.
    pub fn remove_geofence(&self, region_id: &str) -> GeofenceResult<bool> {
        self.request(|reply| ControlMsg::Remove {
            region_id: region_id.to_string(),
            reply,
        })
    }

    /// The execution environment reports it is ready.
    ///
    /// Drains the buffer (one dispatch per buffered region) and returns how
    /// many transitions were drained. Idempotent.
    ///
    /// # Errors
    /// `ExecutionError::Disconnected` if the worker has stopped.
    pub fn service_initialized(&self) -> GeofenceResult<usize> {
        self.request(|reply| ControlMsg::ServiceInitialized { reply })
    }

    /// Deliver an enter transition from the location service.
    pub fn on_enter(&self, region: Region) {
        self.transitions.on_enter(region);
    }

    /// Deliver an exit transition from the location service.
    pub fn on_exit(&self, region: Region) {
        self.transitions.on_exit(region);
    }

    /// A cloneable handle for the location service callback context.
    #[must_use]
    pub fn transition_sender(&self) -> TransitionSender {
        self.transitions.clone()
    }

    /// Current dispatch state.
    ///
    /// # Errors
    /// `ExecutionError::Disconnected` if the worker has stopped.
    pub fn state(&self) -> GeofenceResult<DispatchState> {
        Ok(self.stats()?.state)
    }

    /// Diagnostics. Reflects every call and transition enqueued before it.
    ///
    /// # Errors
    /// `ExecutionError::Disconnected` if the worker has stopped.
    pub fn stats(&self) -> GeofenceResult<DispatchStats> {
        let worker: WorkerStats = self.request(|reply| ControlMsg::Stats { reply })?;
        Ok(DispatchStats {
            state: worker.state,
            pending: worker.pending,
            monitored_regions: worker.monitored_regions,
            delivered: self.counters.delivered(),
            unknown_regions: self.counters.unknown_regions(),
            store_failures: self.counters.store_failures(),
            expired_transitions: worker.expired_transitions,
        })
    }

    /// The region store backing this manager.
    #[must_use]
    pub fn store(&self) -> Arc<dyn RegionStore> {
        Arc::clone(&self.store)
    }

    /// Stop the worker after it finishes queued messages, and wait for it.
    pub fn shutdown(self) {
        if self.commands.send(ControlMsg::Shutdown).is_err() {
            return;
        }
        let handle = self.join.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("geofence dispatch worker panicked");
            }
        }
    }
}

impl Drop for GeofenceManager {
    fn drop(&mut self) {
        // Do not join: a full command queue would make this block. The worker
        // exits on Shutdown, or once this manager's command sender is gone.
        let joined = self.join.lock().map(|guard| guard.is_none()).unwrap_or(true);
        if !joined {
            let _ = self.commands.try_send(ControlMsg::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::platform::recording::{
        notification_channel, NotificationStream, RecordingEnvironment, RecordingLocationSource,
    };
    use crate::storage::InMemoryRegionStore;

    struct Harness {
        manager: GeofenceManager,
        location: Arc<RecordingLocationSource>,
        environment: Arc<RecordingEnvironment>,
        stream: NotificationStream,
    }

    fn harness(cfg: GeofenceConfig) -> Harness {
        let location = Arc::new(RecordingLocationSource::new());
        let environment = Arc::new(RecordingEnvironment::new());
        let (sink, stream) = notification_channel();
        let manager = GeofenceManager::new(
            cfg,
            Arc::new(InMemoryRegionStore::new()),
            Platform {
                location: location.clone(),
                environment: environment.clone(),
                notifications: Arc::new(sink),
            },
        )
        .unwrap();
        Harness {
            manager,
            location,
            environment,
            stream,
        }
    }

    fn region(id: &str) -> Region {
        Region::new(id, Coordinate::new(10.0, 20.0))
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let (sink, _stream) = notification_channel();
        let err = GeofenceManager::new(
            GeofenceConfig {
                queue_capacity: 0,
                ..GeofenceConfig::default()
            },
            Arc::new(InMemoryRegionStore::new()),
            Platform {
                location: Arc::new(RecordingLocationSource::new()),
                environment: Arc::new(RecordingEnvironment::new()),
                notifications: Arc::new(sink),
            },
        )
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_buffers_until_service_initialized() {
        let h = harness(GeofenceConfig::default());
        h.manager.register_geofence(CallbackHandle::new(7), "home", 10.0, 20.0).unwrap();
        h.manager.initialize_service(CallbackHandle::new(99)).unwrap();
        assert_eq!(h.manager.state().unwrap(), DispatchState::Initializing);
        assert_eq!(h.environment.bootstraps(), vec![CallbackHandle::new(99)]);

        h.manager.on_enter(region("home"));
        h.manager.on_exit(region("home"));
        let stats = h.manager.stats().unwrap();
        assert_eq!(stats.pending, 1);
        assert!(h.stream.drain().is_empty());

        assert_eq!(h.manager.service_initialized().unwrap(), 1);
        let sent = h.stream.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, TransitionKind::Exit);
        assert_eq!(sent[0].handle, CallbackHandle::new(7));
    }

    #[test]
    fn test_ready_dispatches_immediately() {
        let h = harness(GeofenceConfig::default());
        h.manager.register_geofence(CallbackHandle::new(3), "work", 10.0, 20.0).unwrap();
        h.manager.initialize_service(CallbackHandle::new(1)).unwrap();
        assert_eq!(h.manager.service_initialized().unwrap(), 0);

        h.manager.on_enter(region("work"));
        let n = h.stream.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(n.to_arguments(), serde_json::json!([3, ["work"], [10.0, 20.0], 1]));
    }

    #[test]
    fn test_remove_stops_monitoring_and_reports_existence() {
        let h = harness(GeofenceConfig::default());
        h.manager.register_geofence(CallbackHandle::new(3), "work", 10.0, 20.0).unwrap();
        assert!(h.location.is_monitoring("work"));

        assert!(h.manager.remove_geofence("work").unwrap());
        assert!(!h.location.is_monitoring("work"));
        assert!(!h.manager.remove_geofence("work").unwrap());
        assert_eq!(h.manager.stats().unwrap().monitored_regions, 0);
    }

    #[test]
    fn test_register_geofence_uses_configured_radius() {
        let h = harness(GeofenceConfig {
            default_radius_meters: 250.0,
            ..GeofenceConfig::default()
        });
        h.manager.register_geofence(CallbackHandle::new(3), "work", 10.0, 20.0).unwrap();
        let err = h
            .manager
            .register_geofence(CallbackHandle::new(3), "", 10.0, 20.0)
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(h.manager.stats().unwrap().monitored_regions, 1);
    }

    #[test]
    fn test_burst_of_transitions_coalesces() {
        let h = harness(GeofenceConfig {
            queue_capacity: 1,
            maintenance_interval: Duration::from_secs(60),
            ..GeofenceConfig::default()
        });
        let sender = h.manager.transition_sender();
        for i in 0..200 {
            let kind = if i % 2 == 0 { TransitionKind::Enter } else { TransitionKind::Exit };
            sender.send(region("home"), kind);
        }
        assert_eq!(h.manager.stats().unwrap().pending, 1);

        h.manager.register_geofence(CallbackHandle::new(5), "home", 10.0, 20.0).unwrap();
        h.manager.initialize_service(CallbackHandle::new(1)).unwrap();
        assert_eq!(h.manager.service_initialized().unwrap(), 1);
        let sent = h.stream.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, TransitionKind::Exit);
    }

    #[test]
    fn test_transitions_after_shutdown_are_ignored() {
        let h = harness(GeofenceConfig::default());
        let sender = h.manager.transition_sender();
        h.manager.shutdown();
        sender.on_enter(region("home"));
        sender.on_exit(region("home"));
        assert!(h.stream.drain().is_empty());
    }

    #[test]
    fn test_transition_queue_ignores_command_capacity() {
        let h = harness(GeofenceConfig {
            queue_capacity: 1,
            ..GeofenceConfig::default()
        });
        for i in 0..5 {
            let id = format!("r{i}");
            h.manager.register_geofence(CallbackHandle::new(i), id.as_str(), 10.0, 20.0).unwrap();
        }
        h.location.set_start_delay(Duration::from_millis(50));
        let sender = h.manager.transition_sender();

        std::thread::scope(|scope| {
            let slow = scope.spawn(|| {
                h.manager.register_geofence(CallbackHandle::new(99), "late", 10.0, 20.0)
            });
            std::thread::sleep(Duration::from_millis(20));
            for i in 0..5 {
                sender.on_enter(region(&format!("r{i}")));
            }
            slow.join().unwrap().unwrap();
        });

        assert_eq!(h.manager.stats().unwrap().pending, 5);
    }
}
