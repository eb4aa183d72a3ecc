//! Capacity-constrained region selection.
//!
//! The platform refuses to monitor more than a fixed number of regions at
//! once. When a registration asks for more, the regions closest to the
//! reference point are kept and the rest are dropped.
//!
//! Selection is recomputed from scratch for every registration call: the
//! candidate set passed in replaces whatever was monitored before, it is not
//! merged with it.

use std::cmp::Ordering;

use crate::geofence::{Coordinate, Geofence};

/// Maximum simultaneously monitored regions on the reference platform.
pub const MAX_MONITORED_REGIONS: usize = 20;

/// Result of a capacity selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Regions to monitor. Candidate order when under capacity, nearest-first otherwise.
    pub retained: Vec<Geofence>,
    /// Regions discarded because capacity was exceeded.
    pub dropped: Vec<Geofence>,
}

/// Enforces the platform cap on monitored regions.
#[derive(Debug, Clone, Copy)]
pub struct CapacityManager {
    max_count: usize,
}

impl Default for CapacityManager {
    fn default() -> Self {
        Self::new(MAX_MONITORED_REGIONS)
    }
}

impl CapacityManager {
    #[must_use]
    pub const fn new(max_count: usize) -> Self {
        Self { max_count }
    }

    #[must_use]
    pub const fn max_count(&self) -> usize {
        self.max_count
    }

    /// Keep at most `max_count` candidates, nearest to `reference` first.
    ///
    /// Ties in distance keep their relative candidate order.
    #[must_use]
    pub fn select(&self, candidates: Vec<Geofence>, reference: Coordinate) -> Selection {
        if candidates.len() <= self.max_count {
            return Selection {
                retained: candidates,
                dropped: Vec::new(),
            };
        }

        let mut ranked: Vec<(f64, Geofence)> = candidates
            .into_iter()
            .map(|g| (reference.distance_to(&g.center), g))
            .collect();
        ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        let mut retained: Vec<Geofence> = ranked.into_iter().map(|(_, g)| g).collect();
        let dropped = retained.split_off(self.max_count);

        Selection { retained, dropped }
    }
}
