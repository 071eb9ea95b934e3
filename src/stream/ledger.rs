use std::collections::HashSet;

use bevy::prelude::*;

/// Tracks heights with an outstanding background request so the same height
/// is never dispatched twice concurrently. Slots are released on success and
/// failure alike; the gateway owns the timestamps that force-release a
/// stalled slot.
#[derive(Resource, Default)]
pub struct RequestLedger {
    in_flight: HashSet<u64>,
}

impl RequestLedger {
    /// Marks the height as in flight. Returns false if it already was.
    pub fn try_acquire(&mut self, height: u64) -> bool {
        self.in_flight.insert(height)
    }

    pub fn release(&mut self, height: u64) -> bool {
        self.in_flight.remove(&height)
    }

    pub fn held(&self, height: u64) -> bool {
        self.in_flight.contains(&height)
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

/// Heights whose placement-only placeholder has already been handed to
/// layout collaborators. Retained over a wider radius than full records so
/// cheap placement data survives short excursions.
#[derive(Resource, Default)]
pub struct BaseGeometrySet {
    seeded: HashSet<u64>,
}

impl BaseGeometrySet {
    /// Returns true when the height was not seeded yet.
    pub fn insert(&mut self, height: u64) -> bool {
        self.seeded.insert(height)
    }

    pub fn contains(&self, height: u64) -> bool {
        self.seeded.contains(&height)
    }

    pub fn len(&self) -> usize {
        self.seeded.len()
    }

    /// Drops heights outside `closest ± radius`, returning them for logging.
    pub fn evict_outside(&mut self, closest: u64, radius: u64) -> Vec<u64> {
        let evicted: Vec<u64> = self
            .seeded
            .iter()
            .copied()
            .filter(|height| height.abs_diff(closest) > radius)
            .collect();
        for height in &evicted {
            self.seeded.remove(height);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_height_cannot_be_acquired_twice() {
        let mut ledger = RequestLedger::default();
        assert!(ledger.try_acquire(77));
        assert!(!ledger.try_acquire(77));
        assert!(ledger.held(77));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn release_frees_the_slot_for_retry() {
        let mut ledger = RequestLedger::default();
        ledger.try_acquire(5);
        assert!(ledger.release(5));
        assert!(!ledger.release(5));
        assert!(ledger.try_acquire(5));
    }

    #[test]
    fn base_geometry_evicts_outside_radius() {
        let mut base = BaseGeometrySet::default();
        for height in [900_u64, 1_000, 1_099, 1_101] {
            base.insert(height);
        }

        let mut evicted = base.evict_outside(1_000, 100);
        evicted.sort_unstable();
        assert_eq!(evicted, vec![1_101]);
        assert!(base.contains(900));
        assert!(!base.contains(1_101));
    }
}
