//! Pending transition buffer.
//!
//! Holds at most one transition per region while the execution environment is
//! not ready. A newer transition for a region replaces the buffered one and
//! moves it to the back of the drain order, so draining yields regions in the
//! arrival order of their last update.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geofence::{Region, TransitionKind};

/// A transition waiting for the execution environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    /// Region as reported by the location service.
    pub region: Region,
    /// Enter or exit.
    pub kind: TransitionKind,
    /// When the worker accepted it; drives expiry after a failed bootstrap.
    pub received_at: DateTime<Utc>,
}

impl PendingEvent {
    #[must_use]
    pub fn new(region: Region, kind: TransitionKind) -> Self {
        Self {
            region,
            kind,
            received_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn region_id(&self) -> &str {
        &self.region.id
    }
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    event: PendingEvent,
}

/// Last-write-wins buffer keyed by region id.
#[derive(Debug, Default)]
pub struct EventBuffer {
    slots: HashMap<String, Slot>,
    next_seq: u64,
}

impl EventBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `event`, returning the transition it replaced, if any.
    pub fn insert(&mut self, event: PendingEvent) -> Option<PendingEvent> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots
            .insert(event.region.id.clone(), Slot { seq, event })
            .map(|slot| slot.event)
    }

    #[must_use]
    pub fn get(&self, region_id: &str) -> Option<&PendingEvent> {
        self.slots.get(region_id).map(|slot| &slot.event)
    }

    /// Discard the pending transition for a region.
    pub fn remove(&mut self, region_id: &str) -> Option<PendingEvent> {
        self.slots.remove(region_id).map(|slot| slot.event)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Take every pending transition, ordered by the arrival of its last update.
    pub fn drain(&mut self) -> Vec<PendingEvent> {
        let mut slots: Vec<Slot> = self.slots.drain().map(|(_, slot)| slot).collect();
        slots.sort_by_key(|slot| slot.seq);
        slots.into_iter().map(|slot| slot.event).collect()
    }

    /// Drop transitions received before `cutoff`. Returns how many were dropped.
    pub fn expire_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.event.received_at >= cutoff);
        before - self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geofence::Coordinate;

    fn event(id: &str, kind: TransitionKind) -> PendingEvent {
        PendingEvent::new(Region::new(id, Coordinate::new(1.0, 2.0)), kind)
    }

    #[test]
    fn test_last_write_wins_per_region() {
        let mut buf = EventBuffer::new();
        assert!(buf.insert(event("home", TransitionKind::Enter)).is_none());
        let replaced = buf.insert(event("home", TransitionKind::Exit)).unwrap();
        assert_eq!(replaced.kind, TransitionKind::Enter);

        assert_eq!(buf.len(), 1);
        assert_eq!(buf.get("home").unwrap().kind, TransitionKind::Exit);
    }

    #[test]
    fn test_drain_follows_last_update_order() {
        let mut buf = EventBuffer::new();
        buf.insert(event("a", TransitionKind::Enter));
        buf.insert(event("b", TransitionKind::Enter));
        buf.insert(event("c", TransitionKind::Enter));
        buf.insert(event("a", TransitionKind::Exit));

        let drained = buf.drain();
        let ids: Vec<&str> = drained.iter().map(PendingEvent::region_id).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(drained[2].kind, TransitionKind::Exit);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_remove_discards_pending() {
        let mut buf = EventBuffer::new();
        buf.insert(event("a", TransitionKind::Enter));
        assert!(buf.remove("a").is_some());
        assert!(buf.remove("a").is_none());
        assert!(buf.drain().is_empty());
    }

    #[test]
    fn test_expire_before_drops_old_entries() {
        let mut buf = EventBuffer::new();
        let mut old = event("old", TransitionKind::Enter);
        old.received_at = Utc::now() - chrono::Duration::minutes(10);
        buf.insert(old);
        buf.insert(event("fresh", TransitionKind::Exit));

        let dropped = buf.expire_before(Utc::now() - chrono::Duration::minutes(5));
        assert_eq!(dropped, 1);
        assert!(buf.get("old").is_none());
        assert!(buf.get("fresh").is_some());
    }
}
