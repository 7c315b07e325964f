//! Grow-only and positive/negative counters

use crate::vclock::NodeId;
use crate::Crdt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grow-only counter with one slot per node.
///
/// A replica only ever bumps its own slot, so taking the pointwise maximum on
/// merge never loses an increment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GCounter {
    node: NodeId,
    counts: BTreeMap<NodeId, u64>,
}

impl GCounter {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            counts: BTreeMap::new(),
        }
    }

    /// Add to this node's slot
    pub fn increment(&mut self, delta: u64) {
        let slot = self.counts.entry(self.node.clone()).or_insert(0);
        *slot = slot.saturating_add(delta);
    }

    /// Sum over all slots
    pub fn value(&self) -> u64 {
        self.counts.values().fold(0u64, |acc, c| acc.saturating_add(*c))
    }

    /// Contribution recorded for a single node
    pub fn slot(&self, node: &NodeId) -> u64 {
        self.counts.get(node).copied().unwrap_or(0)
    }

    pub fn merge(&mut self, other: &GCounter) {
        for (node, &count) in &other.counts {
            let slot = self.counts.entry(node.clone()).or_insert(0);
            if *slot < count {
                *slot = count;
            }
        }
    }

    /// Same slots, ignoring which node owns the replica
    fn same_state(&self, other: &GCounter) -> bool {
        let nonzero = |c: &GCounter| {
            c.counts
                .iter()
                .filter(|&(_, &v)| v > 0)
                .map(|(n, &v)| (n.clone(), v))
                .collect::<BTreeMap<_, _>>()
        };
        nonzero(self) == nonzero(other)
    }
}

impl Crdt for GCounter {
    fn merge(&mut self, other: &Self) {
        GCounter::merge(self, other)
    }
}

/// Counter supporting decrements, built from two grow-only counters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnCounter {
    positive: GCounter,
    negative: GCounter,
}

impl PnCounter {
    pub fn new(node: NodeId) -> Self {
        Self {
            positive: GCounter::new(node.clone()),
            negative: GCounter::new(node),
        }
    }

    pub fn increment(&mut self, delta: u64) {
        self.positive.increment(delta);
    }

    pub fn decrement(&mut self, delta: u64) {
        self.negative.increment(delta);
    }

    /// Net value: sum of increments minus sum of decrements
    pub fn value(&self) -> i64 {
        let net = self.positive.value() as i128 - self.negative.value() as i128;
        net.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn merge(&mut self, other: &PnCounter) {
        self.positive.merge(&other.positive);
        self.negative.merge(&other.negative);
    }

    /// True if both counters hold the same slots (owners may differ)
    pub fn same_state(&self, other: &PnCounter) -> bool {
        self.positive.same_state(&other.positive) && self.negative.same_state(&other.negative)
    }
}

impl Crdt for PnCounter {
    fn merge(&mut self, other: &Self) {
        PnCounter::merge(self, other)
    }
}
