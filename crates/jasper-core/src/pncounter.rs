//! PN-Counter (Positive-Negative Counter) CRDT
//!
//! A PN-Counter supports both increment and decrement by keeping two
//! grow-only counters: one for increments (P) and one for decrements (N).
//! The value is P - N.
//!
//! Join is the join of both halves, so each half keeps the non-decreasing
//! slots that pointwise max needs.

use crate::gcounter::GCounter;
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};

/// A Positive-Negative Counter CRDT
///
/// Value = sum(increments) - sum(decrements)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PNCounter<K: Ord + Clone> {
    /// Per-replica increment counters
    increments: GCounter<K>,
    /// Per-replica decrement counters
    decrements: GCounter<K>,
}

impl<K: Ord + Clone> PNCounter<K> {
    /// Create a new PN-Counter
    pub fn new() -> Self {
        Self {
            increments: GCounter::new(),
            decrements: GCounter::new(),
        }
    }

    /// Apply a signed delta for a replica.
    ///
    /// Positive deltas land in the increment half, negative ones add their
    /// absolute value to the decrement half. Zero is a no-op.
    pub fn add(&mut self, replica_id: K, delta: i64) {
        if delta > 0 {
            self.increment(replica_id, delta.unsigned_abs());
        } else if delta < 0 {
            self.decrement(replica_id, delta.unsigned_abs());
        }
    }

    /// Increment the counter for a specific replica
    pub fn increment(&mut self, replica_id: K, amount: u64) {
        self.increments.increment(replica_id, amount);
    }

    /// Decrement the counter for a specific replica
    pub fn decrement(&mut self, replica_id: K, amount: u64) {
        self.decrements.increment(replica_id, amount);
    }

    /// Get the current value (sum of increments - sum of decrements)
    pub fn value(&self) -> i64 {
        let inc_sum = self.increments.value() as i128;
        let dec_sum = self.decrements.value() as i128;
        (inc_sum - dec_sum).clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn get_increment(&self, replica_id: &K) -> u64 {
        self.increments.get(replica_id)
    }

    pub fn get_decrement(&self, replica_id: &K) -> u64 {
        self.decrements.get(replica_id)
    }

    pub fn increments(&self) -> &GCounter<K> {
        &self.increments
    }

    pub fn decrements(&self) -> &GCounter<K> {
        &self.decrements
    }
}

impl<K: Ord + Clone> Default for PNCounter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> Lattice for PNCounter<K> {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        Self {
            increments: self.increments.join(&other.increments),
            decrements: self.decrements.join(&other.decrements),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pncounter_basic_operations() {
        let mut counter = PNCounter::new();

        counter.add("A", 5);
        assert_eq!(counter.value(), 5);

        counter.add("B", -2);
        assert_eq!(counter.value(), 3);

        counter.add("A", 3);
        assert_eq!(counter.value(), 6);
    }

    #[test]
    fn test_pncounter_negative_delta_routes_to_decrements() {
        let mut counter = PNCounter::new();
        counter.add("A", -4);
        counter.add("A", 0);

        assert_eq!(counter.get_increment(&"A"), 0);
        assert_eq!(counter.get_decrement(&"A"), 4);
        assert_eq!(counter.value(), -4);
    }

    #[test]
    fn test_pncounter_join_idempotent() {
        let mut c1 = PNCounter::new();
        c1.add("A", 5);
        c1.add("B", -2);

        let joined = c1.join(&c1);
        assert_eq!(joined, c1);
        assert_eq!(joined.value(), 3);
    }

    #[test]
    fn test_pncounter_join_commutative() {
        let mut c1 = PNCounter::new();
        c1.add("A", 5);

        let mut c2 = PNCounter::new();
        c2.add("B", 3);
        c2.add("A", -1);

        let joined1 = c1.join(&c2);
        let joined2 = c2.join(&c1);

        assert_eq!(joined1, joined2);
        assert_eq!(joined1.get_increment(&"A"), 5);
        assert_eq!(joined1.get_increment(&"B"), 3);
        assert_eq!(joined1.get_decrement(&"A"), 1);
    }

    #[test]
    fn test_pncounter_replayed_decrement_is_not_lost() {
        // A single signed slot would let max() swallow the decrement.
        let mut local = PNCounter::new();
        local.add("A", 10);
        let before = local.clone();
        local.add("A", -3);

        let merged = before.join(&local);
        assert_eq!(merged.value(), 7);
    }

    #[test]
    fn test_pncounter_serialization() {
        let mut counter = PNCounter::new();
        counter.add("replica1".to_string(), 100);
        counter.add("replica2".to_string(), -25);

        let serialized = serde_json::to_string(&counter).unwrap();
        let deserialized: PNCounter<String> = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.value(), 75);
        assert_eq!(deserialized.get_increment(&"replica1".to_string()), 100);
        assert_eq!(deserialized.get_decrement(&"replica2".to_string()), 25);
    }
}
