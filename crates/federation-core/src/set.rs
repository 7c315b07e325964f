//! Grow-only and observed-remove sets

use crate::Crdt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Grow-only set: union on merge, no removal
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Ord + Deserialize<'de>"))]
pub struct GSet<T: Ord> {
    items: BTreeSet<T>,
}

impl<T: Ord> Default for GSet<T> {
    fn default() -> Self {
        Self {
            items: BTreeSet::new(),
        }
    }
}

impl<T: Ord + Clone> GSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: T) {
        self.items.insert(item);
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    pub fn items(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn merge(&mut self, other: &GSet<T>) {
        self.items.extend(other.items.iter().cloned());
    }
}

impl<T: Ord + Clone> Crdt for GSet<T> {
    fn merge(&mut self, other: &Self) {
        GSet::merge(self, other)
    }
}

/// Observed-remove set with add-wins semantics.
///
/// Every insertion carries a unique tag. Removing an item tombstones only the
/// tags the remover has seen, so an insertion made concurrently with a
/// removal survives the merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Ord + Deserialize<'de>"))]
pub struct OrSet<T: Ord> {
    additions: BTreeMap<T, BTreeSet<String>>,
    removals: BTreeMap<T, BTreeSet<String>>,
}

impl<T: Ord> Default for OrSet<T> {
    fn default() -> Self {
        Self {
            additions: BTreeMap::new(),
            removals: BTreeMap::new(),
        }
    }
}

impl<T: Ord + Clone> OrSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item under a tag that is unique to this insertion
    pub fn add(&mut self, item: T, tag: impl Into<String>) {
        self.additions.entry(item).or_default().insert(tag.into());
    }

    /// Tombstone every observed tag of `item`.
    ///
    /// Returns false when the item was not present.
    pub fn remove(&mut self, item: &T) -> bool {
        let present = self.contains(item);
        if let Some(tags) = self.additions.get(item) {
            self.removals
                .entry(item.clone())
                .or_default()
                .extend(tags.iter().cloned());
        }
        present
    }

    pub fn contains(&self, item: &T) -> bool {
        let Some(added) = self.additions.get(item) else {
            return false;
        };
        match self.removals.get(item) {
            Some(removed) => added.iter().any(|tag| !removed.contains(tag)),
            None => !added.is_empty(),
        }
    }

    /// Items currently present, in order
    pub fn items(&self) -> Vec<T> {
        self.additions
            .keys()
            .filter(|item| self.contains(item))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.additions.keys().filter(|item| self.contains(item)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn merge(&mut self, other: &OrSet<T>) {
        for (item, tags) in &other.additions {
            self.additions
                .entry(item.clone())
                .or_default()
                .extend(tags.iter().cloned());
        }
        for (item, tags) in &other.removals {
            self.removals
                .entry(item.clone())
                .or_default()
                .extend(tags.iter().cloned());
        }
    }
}

impl<T: Ord + Clone> Crdt for OrSet<T> {
    fn merge(&mut self, other: &Self) {
        OrSet::merge(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_gset_union() {
        let mut left = GSet::new();
        let mut right = GSet::new();
        left.insert("a".to_string());
        right.insert("b".to_string());
        right.insert("a".to_string());

        left.merge(&right);
        assert_eq!(left.items(), vec!["a".to_string(), "b".to_string()]);
        assert!(left.contains(&"b".to_string()));
    }

    #[test]
    fn test_orset_add_remove_readd() {
        let mut set = OrSet::new();
        set.add("rule-1", "t1");
        assert!(set.contains(&"rule-1"));

        assert!(set.remove(&"rule-1"));
        assert!(!set.contains(&"rule-1"));
        assert!(!set.remove(&"rule-1"));

        // a fresh tag brings it back
        set.add("rule-1", "t2");
        assert!(set.contains(&"rule-1"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_orset_remove_unknown_is_noop() {
        let mut set: OrSet<&str> = OrSet::new();
        assert!(!set.remove(&"missing"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_orset_concurrent_add_wins() {
        let mut replica1 = OrSet::new();
        let mut replica2 = OrSet::new();

        // both know the original insertion
        replica1.add("x", "tag-0");
        replica2.merge(&replica1);

        // replica1 re-adds with a tag replica2 never observes
        replica1.add("x", "tag-a");
        assert!(replica2.remove(&"x"));

        let mut one_then_two = replica1.clone();
        one_then_two.merge(&replica2);
        let mut two_then_one = replica2.clone();
        two_then_one.merge(&replica1);

        assert!(one_then_two.contains(&"x"));
        assert!(two_then_one.contains(&"x"));
        assert_eq!(one_then_two, two_then_one);
    }

    #[test]
    fn test_orset_remove_without_observation() {
        let mut replica1 = OrSet::new();
        let mut replica2: OrSet<&str> = OrSet::new();
        replica1.add("x", "tag-a");
        // replica2 never saw tag-a: its removal tombstones nothing
        assert!(!replica2.remove(&"x"));

        replica2.merge(&replica1);
        assert!(replica2.contains(&"x"));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8, u8),
        Remove(u8, u8),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..3, 0u8..4).prop_map(|(r, i)| Op::Add(r, i)),
            (0u8..3, 0u8..4).prop_map(|(r, i)| Op::Remove(r, i)),
        ]
    }

    proptest! {
        #[test]
        fn prop_orset_merge_converges(ops in prop::collection::vec(arb_op(), 0..30)) {
            let mut replicas: Vec<OrSet<u8>> = vec![OrSet::new(); 3];
            for (seq, op) in ops.iter().enumerate() {
                match op {
                    Op::Add(r, item) => replicas[*r as usize].add(*item, format!("{r}-{seq}")),
                    Op::Remove(r, item) => {
                        replicas[*r as usize].remove(item);
                    }
                }
            }

            let mut forward = OrSet::new();
            for r in &replicas {
                forward.merge(r);
            }
            let mut backward = OrSet::new();
            for r in replicas.iter().rev() {
                backward.merge(r);
            }
            let mut twice = forward.clone();
            twice.merge(&forward);

            prop_assert_eq!(&forward, &backward);
            prop_assert_eq!(&forward, &twice);
        }
    }
}
