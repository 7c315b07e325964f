//! Vector clocks for tracking causality between replicas

use crate::Crdt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a federation node (replica)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A vector clock: one monotone counter per node.
///
/// Nodes missing from the map have an implied counter of 0, so a zero entry
/// and an absent entry are indistinguishable for every comparison.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    counters: BTreeMap<NodeId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for a node (0 when absent)
    pub fn get(&self, node: &NodeId) -> u64 {
        self.counters.get(node).copied().unwrap_or(0)
    }

    /// Advance a node's slot by one and return the new value
    pub fn increment(&mut self, node: &NodeId) -> u64 {
        let counter = self.counters.entry(node.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Pointwise maximum with another clock
    pub fn merge(&mut self, other: &VectorClock) {
        for (node, &counter) in &other.counters {
            let slot = self.counters.entry(node.clone()).or_insert(0);
            if *slot < counter {
                *slot = counter;
            }
        }
    }

    /// True if every slot of `other` is at most the matching slot of `self`.
    ///
    /// This is `other.happens_before(self) || other == self`.
    pub fn descends(&self, other: &VectorClock) -> bool {
        other
            .counters
            .iter()
            .all(|(node, &counter)| self.get(node) >= counter)
    }

    /// Strict causal precedence: `self <= other` pointwise with at least one
    /// slot strictly smaller.
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        other.descends(self) && !self.descends(other)
    }

    /// Neither clock happens before the other (equal clocks are concurrent)
    pub fn concurrent(&self, other: &VectorClock) -> bool {
        !self.happens_before(other) && !other.happens_before(self)
    }

    /// Iterate non-zero slots
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, u64)> {
        self.counters
            .iter()
            .filter(|&(_, &c)| c > 0)
            .map(|(n, &c)| (n, c))
    }

    /// True if no slot is above zero
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        self.descends(other) && other.descends(self)
    }
}

impl Eq for VectorClock {}

impl Crdt for VectorClock {
    fn merge(&mut self, other: &Self) {
        VectorClock::merge(self, other)
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, (node, counter)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}->{}", node, counter)?;
        }
        write!(f, ")")
    }
}

impl<N: Into<NodeId>> FromIterator<(N, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (N, u64)>>(iter: I) -> Self {
        Self {
            counters: iter.into_iter().map(|(n, c)| (n.into(), c)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        entries.iter().map(|&(n, c)| (n, c)).collect()
    }

    #[test]
    fn test_missing_entries_read_as_zero() {
        let vc = VectorClock::new();
        assert_eq!(vc.get(&NodeId::from("a")), 0);
        assert_eq!(clock(&[("a", 0)]), VectorClock::new());
    }

    #[test]
    fn test_increment_and_happens_before() {
        let a = NodeId::from("a");
        let mut first = VectorClock::new();
        first.increment(&a);
        let mut second = first.clone();
        second.increment(&a);

        assert!(first.happens_before(&second));
        assert!(!second.happens_before(&first));
        assert!(!first.concurrent(&second));
    }

    #[test]
    fn test_disjoint_increments_are_concurrent() {
        let mut left = VectorClock::new();
        let mut right = VectorClock::new();
        for _ in 0..3 {
            left.increment(&NodeId::from("a"));
        }
        right.increment(&NodeId::from("b"));

        assert!(left.concurrent(&right));
        assert!(right.concurrent(&left));

        let mut merged = left.clone();
        merged.merge(&right);
        assert!(left.happens_before(&merged));
        assert!(right.happens_before(&merged));
        assert!(!merged.happens_before(&merged));
    }

    #[test]
    fn test_happens_before_considers_other_only_slots() {
        // self has no entry for b; other does
        let earlier = clock(&[("a", 1)]);
        let later = clock(&[("a", 1), ("b", 1)]);
        assert!(earlier.happens_before(&later));

        // a naive check over self's keys only would call these ordered
        let left = clock(&[("a", 1)]);
        let right = clock(&[("a", 1), ("b", 2)]);
        assert!(!right.happens_before(&left));
    }

    #[test]
    fn test_descends_is_reflexive() {
        let vc = clock(&[("a", 2), ("b", 5)]);
        assert!(vc.descends(&vc));
        assert!(!vc.happens_before(&vc));
        assert!(vc.concurrent(&vc));
    }

    #[test]
    fn test_serde_as_plain_map() {
        let vc = clock(&[("node-1", 3), ("node-2", 1)]);
        let json = serde_json::to_string(&vc).unwrap();
        assert_eq!(json, r#"{"node-1":3,"node-2":1}"#);
        let back: VectorClock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vc);
    }

    fn arb_clock() -> impl Strategy<Value = VectorClock> {
        prop::collection::btree_map("[a-d]", 0u64..5, 0..4)
            .prop_map(|m| m.into_iter().collect())
    }

    proptest! {
        #[test]
        fn prop_merge_is_semilattice(a in arb_clock(), b in arb_clock(), c in arb_clock()) {
            let mut ab = a.clone();
            ab.merge(&b);
            let mut ba = b.clone();
            ba.merge(&a);
            prop_assert_eq!(&ab, &ba);

            let mut ab_c = ab.clone();
            ab_c.merge(&c);
            let mut bc = b.clone();
            bc.merge(&c);
            let mut a_bc = a.clone();
            a_bc.merge(&bc);
            prop_assert_eq!(&ab_c, &a_bc);

            let mut aa = a.clone();
            aa.merge(&a);
            prop_assert_eq!(&aa, &a);
        }

        #[test]
        fn prop_merge_descends_both(a in arb_clock(), b in arb_clock()) {
            let mut merged = a.clone();
            merged.merge(&b);
            prop_assert!(merged.descends(&a));
            prop_assert!(merged.descends(&b));
            prop_assert!(!merged.happens_before(&merged));
        }
    }
}
