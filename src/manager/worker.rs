//! Dispatch worker.
//!
//! The worker thread owns all mutable geofencing state: the monitored set,
//! the dispatch state machine with its buffer, and the dispatcher.
//!
//! Commands arrive on a bounded queue. OS transitions arrive on an unbounded
//! one so the callback path never blocks and never loses an event; the
//! event buffer (one entry per region) is what bounds memory. Before a
//! command runs, every transition already queued is applied, so a transition
//! sent before a command is always classified against the state that
//! preceded it and the ready-drain cannot interleave with a new arrival.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use crossbeam_channel::{select, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::buffer::PendingEvent;
use crate::capacity::CapacityManager;
use crate::config::GeofenceConfig;
use crate::dispatch::{DispatchState, DispatchStateMachine, Dispatcher, Routing};
use crate::error::{ExecutionError, GeofenceError, GeofenceResult};
use crate::geofence::{CallbackHandle, Coordinate, Geofence};
use crate::platform::{ExecutionEnvironment, LocationSource, PlatformError};
use crate::storage::RegionStore;

use super::RegistrationOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegisterMode {
    /// Add to the current monitored set, replacing an entry with the same id.
    Merge,
    /// Replace the current monitored set.
    Replace,
}

#[derive(Debug)]
pub(crate) enum ControlMsg {
    Initialize {
        /// `None` resolves the handle from the store (relaunch).
        entry: Option<CallbackHandle>,
        reply: Sender<GeofenceResult<CallbackHandle>>,
    },
    Register {
        geofences: Vec<Geofence>,
        reference: Option<Coordinate>,
        mode: RegisterMode,
        reply: Sender<GeofenceResult<RegistrationOutcome>>,
    },
    Remove {
        region_id: String,
        reply: Sender<GeofenceResult<bool>>,
    },
    ServiceInitialized {
        reply: Sender<GeofenceResult<usize>>,
    },
    Stats {
        reply: Sender<GeofenceResult<WorkerStats>>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerStats {
    pub state: DispatchState,
    pub pending: usize,
    pub monitored_regions: usize,
    pub expired_transitions: u64,
}

fn location_err(e: PlatformError) -> GeofenceError {
    ExecutionError::LocationSource { message: e.message }.into()
}

/// Later entries with a duplicate id replace earlier ones in place.
fn dedupe_by_id(geofences: Vec<Geofence>) -> Vec<Geofence> {
    let mut out: Vec<Geofence> = Vec::with_capacity(geofences.len());
    for g in geofences {
        if let Some(slot) = out.iter_mut().find(|e| e.id == g.id) {
            *slot = g;
        } else {
            out.push(g);
        }
    }
    out
}

pub(crate) struct Worker {
    cfg: GeofenceConfig,
    retry_window: chrono::Duration,
    capacity: CapacityManager,
    machine: DispatchStateMachine,
    dispatcher: Dispatcher,
    store: Arc<dyn RegionStore>,
    location: Arc<dyn LocationSource>,
    environment: Arc<dyn ExecutionEnvironment>,
    monitored: Vec<Geofence>,
    expired: u64,
    last_maintenance: Instant,
}

impl Worker {
    pub(crate) fn new(
        cfg: GeofenceConfig,
        dispatcher: Dispatcher,
        store: Arc<dyn RegionStore>,
        location: Arc<dyn LocationSource>,
        environment: Arc<dyn ExecutionEnvironment>,
    ) -> Self {
        // Validated by GeofenceConfig::validate.
        let retry_window = chrono::Duration::from_std(cfg.bootstrap_retry_window)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        Self {
            capacity: CapacityManager::new(cfg.max_monitored_regions),
            retry_window,
            cfg,
            machine: DispatchStateMachine::new(),
            dispatcher,
            store,
            location,
            environment,
            monitored: Vec::new(),
            expired: 0,
            last_maintenance: Instant::now(),
        }
    }

    pub(crate) fn run(mut self, commands: Receiver<ControlMsg>, transitions: Receiver<PendingEvent>) {
        let tick = self.cfg.maintenance_interval;
        let mut stopped = false;

        loop {
            select! {
                recv(transitions) -> event => match event {
                    Ok(event) => self.transition(event),
                    Err(_) => stopped = true,
                },
                recv(commands) -> msg => match msg {
                    Ok(ControlMsg::Shutdown) | Err(_) => stopped = true,
                    Ok(msg) => {
                        self.drain_transitions(&transitions);
                        self.handle(msg);
                    }
                },
                default(tick) => {}
            }

            if stopped {
                break;
            }

            if self.last_maintenance.elapsed() >= tick {
                self.maintain();
            }
        }

        info!(
            state = %self.machine.state(),
            pending = self.machine.pending(),
            "geofence dispatch worker stopped"
        );
    }

    /// Apply the transitions queued so far, in arrival order.
    fn drain_transitions(&mut self, transitions: &Receiver<PendingEvent>) {
        let queued = transitions.len();
        for event in transitions.try_iter().take(queued) {
            self.transition(event);
        }
    }

    fn handle(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::Initialize { entry, reply } => {
                let _ = reply.send(self.initialize(entry));
            }
            ControlMsg::Register {
                geofences,
                reference,
                mode,
                reply,
            } => {
                let _ = reply.send(self.register(geofences, reference, mode));
            }
            ControlMsg::Remove { region_id, reply } => {
                let _ = reply.send(self.remove(&region_id));
            }
            ControlMsg::ServiceInitialized { reply } => {
                let _ = reply.send(Ok(self.service_initialized()));
            }
            ControlMsg::Stats { reply } => {
                let _ = reply.send(Ok(WorkerStats {
                    state: self.machine.state(),
                    pending: self.machine.pending(),
                    monitored_regions: self.monitored.len(),
                    expired_transitions: self.expired,
                }));
            }
            ControlMsg::Shutdown => {}
        }
    }

    fn initialize(&mut self, entry: Option<CallbackHandle>) -> GeofenceResult<CallbackHandle> {
        let entry = match entry {
            Some(handle) => {
                self.store.set_dispatcher_entry_handle(handle)?;
                handle
            }
            None => self
                .store
                .dispatcher_entry_handle()?
                .ok_or(ExecutionError::MissingDispatcherHandle)?,
        };

        if !self.machine.begin_initialization() {
            debug!(state = %self.machine.state(), %entry, "bootstrap already requested");
            return Ok(entry);
        }

        info!(%entry, "requesting execution environment bootstrap");
        if let Err(e) = self.environment.bootstrap(entry) {
            self.machine.bootstrap_failed(Utc::now());
            warn!(
                %entry,
                error = %e,
                pending = self.machine.pending(),
                "execution environment bootstrap failed; transitions stay buffered"
            );
            return Err(ExecutionError::BootstrapFailed { reason: e.message }.into());
        }

        Ok(entry)
    }

    fn register(
        &mut self,
        geofences: Vec<Geofence>,
        reference: Option<Coordinate>,
        mode: RegisterMode,
    ) -> GeofenceResult<RegistrationOutcome> {
        for g in &geofences {
            g.validate()?;
        }

        let candidates = match mode {
            RegisterMode::Merge => {
                let incoming = dedupe_by_id(geofences);
                let mut candidates: Vec<Geofence> = self
                    .monitored
                    .iter()
                    .filter(|g| !incoming.iter().any(|n| n.id == g.id))
                    .cloned()
                    .collect();
                candidates.extend(incoming);
                candidates
            }
            RegisterMode::Replace => dedupe_by_id(geofences),
        };

        let reference = reference
            .or_else(|| self.location.last_known_location())
            .or_else(|| candidates.last().map(|g| g.center))
            .unwrap_or(Coordinate::new(0.0, 0.0));

        let selection = self.capacity.select(candidates, reference);

        let retained: HashSet<&str> = selection.retained.iter().map(|g| g.id.as_str()).collect();
        let mut released: Vec<String> = self
            .monitored
            .iter()
            .filter(|g| !retained.contains(g.id.as_str()))
            .map(|g| g.id.clone())
            .collect();
        for g in &selection.dropped {
            if !released.contains(&g.id) {
                released.push(g.id.clone());
            }
        }

        let mut applied = self.monitored.clone();
        if let Err(e) = self.apply_registration(&selection.retained, &released, &mut applied) {
            warn!(
                error = %e,
                monitored = applied.len(),
                "registration stopped part way; monitored set holds what the platform accepted"
            );
            self.monitored = applied;
            return Err(e);
        }

        let outcome = RegistrationOutcome {
            monitored: selection.retained.iter().map(|g| g.id.clone()).collect(),
            dropped: selection.dropped.iter().map(|g| g.id.clone()).collect(),
        };

        if outcome.dropped.is_empty() {
            info!(monitored = outcome.monitored.len(), "registered geofences");
        } else {
            warn!(
                monitored = outcome.monitored.len(),
                dropped = ?outcome.dropped,
                max = self.capacity.max_count(),
                "monitored region capacity exceeded; farthest regions dropped"
            );
        }

        self.monitored = selection.retained;
        Ok(outcome)
    }

    /// Release first, then start, so the platform never holds more regions
    /// than the cap. `applied` tracks the monitored set step by step.
    fn apply_registration(
        &mut self,
        retained: &[Geofence],
        released: &[String],
        applied: &mut Vec<Geofence>,
    ) -> GeofenceResult<()> {
        for id in released {
            self.location.stop_monitoring(id).map_err(location_err)?;
            applied.retain(|g| &g.id != id);
            self.machine.discard(id);
            self.store.remove(id)?;
        }

        for g in retained {
            let previous = applied.iter().position(|a| a.id == g.id);
            self.store.put(&g.id, g.callback)?;
            // Unchanged geometry is already monitored; only the mapping may differ.
            if let Some(i) = previous.filter(|&i| applied[i].region() == g.region()) {
                applied[i] = g.clone();
                continue;
            }
            if let Err(e) = self.location.start_monitoring(&g.region()) {
                self.restore_mapping(&g.id, previous.map(|i| applied[i].callback));
                return Err(location_err(e));
            }
            match previous {
                Some(i) => applied[i] = g.clone(),
                None => applied.push(g.clone()),
            }
        }
        Ok(())
    }

    fn restore_mapping(&self, region_id: &str, previous: Option<CallbackHandle>) {
        let restored = match previous {
            Some(handle) => self.store.put(region_id, handle),
            None => self.store.remove(region_id).map(|_| ()),
        };
        if let Err(e) = restored {
            warn!(region_id, error = %e, "failed to roll back region mapping");
        }
    }

    fn remove(&mut self, region_id: &str) -> GeofenceResult<bool> {
        self.location.stop_monitoring(region_id).map_err(location_err)?;
        self.monitored.retain(|g| g.id != region_id);
        if self.machine.discard(region_id).is_some() {
            debug!(region_id, "discarded buffered transition for removed region");
        }
        let existed = self.store.remove(region_id)?;
        info!(region_id, existed, "removed geofence");
        Ok(existed)
    }

    fn service_initialized(&mut self) -> usize {
        let previous = self.machine.state();
        let drained = self.machine.mark_ready();

        if previous != DispatchState::Ready {
            info!(from = %previous, drained = drained.len(), "execution environment ready");
        }

        for event in &drained {
            self.dispatcher.dispatch(&event.region, event.kind);
        }
        drained.len()
    }

    fn transition(&mut self, event: PendingEvent) {
        let region_id = event.region.id.clone();
        let kind = event.kind;

        match self.machine.route(event) {
            Routing::Buffered { replaced } => {
                debug!(
                    region_id = %region_id,
                    %kind,
                    ?replaced,
                    state = %self.machine.state(),
                    "buffered transition"
                );
            }
            Routing::Dispatch(event) => {
                self.dispatcher.dispatch(&event.region, event.kind);
            }
        }
    }

    fn maintain(&mut self) {
        self.last_maintenance = Instant::now();
        let expired = self.machine.expire_stale(Utc::now(), self.retry_window);
        if expired > 0 {
            self.expired += expired as u64;
            warn!(
                expired,
                window_secs = self.retry_window.num_seconds(),
                "discarded buffered transitions after failed bootstrap"
            );
        }
    }
}
