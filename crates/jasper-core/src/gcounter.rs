//! G-Counter (Grow-only Counter) CRDT
//!
//! Each replica owns one slot and only ever raises it. The counter's value is
//! the sum of all slots, and join takes the per-slot maximum. Pointwise max
//! is only a correct merge because slots never decrease, which is why
//! [`crate::PNCounter`] is built from two of these rather than one signed map.

use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A grow-only counter keyed by replica id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GCounter<K: Ord + Clone> {
    counts: BTreeMap<K, u64>,
}

impl<K: Ord + Clone> GCounter<K> {
    pub fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }

    /// Raise the slot owned by `replica_id` by `amount`.
    pub fn increment(&mut self, replica_id: K, amount: u64) {
        let entry = self.counts.entry(replica_id).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// Sum over every replica's slot.
    pub fn value(&self) -> u64 {
        self.counts
            .values()
            .fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    pub fn get(&self, replica_id: &K) -> u64 {
        self.counts.get(replica_id).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &BTreeMap<K, u64> {
        &self.counts
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl<K: Ord + Clone> Default for GCounter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> Lattice for GCounter<K> {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        let mut counts = self.counts.clone();
        for (k, v) in &other.counts {
            counts
                .entry(k.clone())
                .and_modify(|e| *e = (*e).max(*v))
                .or_insert(*v);
        }
        Self { counts }
    }
}
