//! Ready/not-ready dispatch state machine.
//!
//! Pure state: no IO happens here. The worker asks the machine how to route
//! each transition and performs the resulting dispatch itself.
//!
//! ```text
//! Uninitialized --initialize--> Initializing --service_initialized--> Ready
//!       |                                                              ^
//!       +------------------------service_initialized-------------------+
//! ```
//!
//! Every state except `Ready` buffers. `Ready` is terminal for the process.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::buffer::{EventBuffer, PendingEvent};
use crate::geofence::TransitionKind;

/// Process-wide dispatch state. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Uninitialized,
    Initializing,
    Ready,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::Initializing => f.write_str("initializing"),
            Self::Ready => f.write_str("ready"),
        }
    }
}

/// Routing decision for an incoming transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Routing {
    /// Held until ready. `replaced` is the kind of the transition it overwrote.
    Buffered { replaced: Option<TransitionKind> },
    /// Dispatch now.
    Dispatch(PendingEvent),
}

/// Gate between OS transitions and the execution environment.
#[derive(Debug)]
pub struct DispatchStateMachine {
    state: DispatchState,
    buffer: EventBuffer,
    bootstrap_failed_at: Option<DateTime<Utc>>,
}

impl Default for DispatchStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DispatchState::Uninitialized,
            buffer: EventBuffer::new(),
            bootstrap_failed_at: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> DispatchState {
        self.state
    }

    /// Number of buffered transitions.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn pending_for(&self, region_id: &str) -> Option<&PendingEvent> {
        self.buffer.get(region_id)
    }

    /// Record an initialization request.
    ///
    /// Returns true if a bootstrap should be requested: on the first request,
    /// or on a retry after a failed bootstrap.
    pub fn begin_initialization(&mut self) -> bool {
        match self.state {
            DispatchState::Uninitialized => {
                self.state = DispatchState::Initializing;
                true
            }
            DispatchState::Initializing => self.bootstrap_failed_at.take().is_some(),
            DispatchState::Ready => false,
        }
    }

    /// The bootstrap request failed. State stays `Initializing`; the buffer is kept.
    pub fn bootstrap_failed(&mut self, at: DateTime<Utc>) {
        if self.state == DispatchState::Initializing {
            self.bootstrap_failed_at = Some(at);
        }
    }

    #[must_use]
    pub const fn bootstrap_failed_at(&self) -> Option<DateTime<Utc>> {
        self.bootstrap_failed_at
    }

    /// Decide whether `event` is buffered or dispatched immediately.
    pub fn route(&mut self, event: PendingEvent) -> Routing {
        match self.state {
            DispatchState::Ready => Routing::Dispatch(event),
            DispatchState::Uninitialized | DispatchState::Initializing => {
                let replaced = self.buffer.insert(event).map(|old| old.kind);
                Routing::Buffered { replaced }
            }
        }
    }

    /// Enter `Ready` and hand back the buffered transitions to dispatch.
    ///
    /// Returns nothing if already ready.
    pub fn mark_ready(&mut self) -> Vec<PendingEvent> {
        if self.state == DispatchState::Ready {
            return Vec::new();
        }
        self.state = DispatchState::Ready;
        self.bootstrap_failed_at = None;
        self.buffer.drain()
    }

    /// Forget the buffered transition for a region that was unregistered.
    pub fn discard(&mut self, region_id: &str) -> Option<PendingEvent> {
        self.buffer.remove(region_id)
    }

    /// After a failed bootstrap, drop transitions older than `window`.
    ///
    /// Nothing expires until `window` has passed since the failure.
    pub fn expire_stale(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        match self.bootstrap_failed_at {
            Some(failed_at) if now - failed_at >= window => self.buffer.expire_before(now - window),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geofence::{Coordinate, Region};

    fn event(id: &str, kind: TransitionKind) -> PendingEvent {
        PendingEvent::new(Region::new(id, Coordinate::new(1.0, 2.0)), kind)
    }

    #[test]
    fn test_starts_uninitialized_and_buffers() {
        let mut m = DispatchStateMachine::new();
        assert_eq!(m.state(), DispatchState::Uninitialized);
        assert_eq!(
            m.route(event("home", TransitionKind::Enter)),
            Routing::Buffered { replaced: None }
        );
        assert_eq!(m.pending(), 1);
    }

    #[test]
    fn test_initializing_buffers_last_write_wins() {
        let mut m = DispatchStateMachine::new();
        assert!(m.begin_initialization());
        assert_eq!(m.state(), DispatchState::Initializing);

        m.route(event("home", TransitionKind::Enter));
        let routing = m.route(event("home", TransitionKind::Exit));
        assert_eq!(
            routing,
            Routing::Buffered {
                replaced: Some(TransitionKind::Enter)
            }
        );
        assert_eq!(m.pending(), 1);
        assert_eq!(m.pending_for("home").unwrap().kind, TransitionKind::Exit);
    }

    #[test]
    fn test_ready_drains_once_then_dispatches_directly() {
        let mut m = DispatchStateMachine::new();
        m.begin_initialization();
        m.route(event("a", TransitionKind::Enter));
        m.route(event("b", TransitionKind::Exit));

        let drained = m.mark_ready();
        assert_eq!(drained.len(), 2);
        assert_eq!(m.pending(), 0);
        assert_eq!(m.state(), DispatchState::Ready);

        assert!(m.mark_ready().is_empty());

        let routed = m.route(event("a", TransitionKind::Exit));
        assert!(matches!(routed, Routing::Dispatch(e) if e.kind == TransitionKind::Exit));
        assert_eq!(m.pending(), 0);
    }

    #[test]
    fn test_no_downgrade_after_ready() {
        let mut m = DispatchStateMachine::new();
        m.mark_ready();
        assert!(!m.begin_initialization());
        m.bootstrap_failed(Utc::now());
        assert_eq!(m.state(), DispatchState::Ready);
        assert!(m.bootstrap_failed_at().is_none());
    }

    #[test]
    fn test_second_initialize_only_retries_after_failure() {
        let mut m = DispatchStateMachine::new();
        assert!(m.begin_initialization());
        assert!(!m.begin_initialization());

        m.bootstrap_failed(Utc::now());
        assert!(m.begin_initialization());
        assert!(m.bootstrap_failed_at().is_none());
    }

    #[test]
    fn test_expire_stale_only_after_failure_window() {
        let mut m = DispatchStateMachine::new();
        m.begin_initialization();

        let mut old = event("old", TransitionKind::Enter);
        old.received_at = Utc::now() - Duration::minutes(30);
        m.route(old);
        m.route(event("fresh", TransitionKind::Enter));

        let window = Duration::minutes(5);
        assert_eq!(m.expire_stale(Utc::now(), window), 0);

        let failed_at = Utc::now() - Duration::minutes(10);
        m.bootstrap_failed(failed_at);
        assert_eq!(m.expire_stale(failed_at + Duration::minutes(1), window), 0);
        assert_eq!(m.expire_stale(Utc::now(), window), 1);
        assert!(m.pending_for("fresh").is_some());
    }

    #[test]
    fn test_discard_removes_pending() {
        let mut m = DispatchStateMachine::new();
        m.route(event("home", TransitionKind::Enter));
        assert!(m.discard("home").is_some());
        assert!(m.mark_ready().is_empty());
    }
}
