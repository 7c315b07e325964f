//! Keyed last-write-wins registers with per-peer delta computation

use crate::lww::LwwRegister;
use crate::vclock::{NodeId, VectorClock};
use crate::{unix_millis, Crdt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Registers whose clocks a peer has not yet been shown
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "V: Serialize",
    deserialize = "V: Deserialize<'de>"
))]
pub struct Delta<V> {
    /// Node that computed the delta
    pub node_id: NodeId,
    /// Wall-clock creation time (unix millis)
    pub timestamp: u64,
    /// Full registers, so re-applying the delta is a no-op
    pub changes: BTreeMap<String, LwwRegister<Option<V>>>,
}

impl<V> Delta<V> {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// Map of LWW registers. A `None` value marks a deleted key.
///
/// The map keeps one version clock across all keys. Each local write bumps
/// the local slot of that version and stamps the register with a copy of it,
/// so any register clock can be compared against a peer's version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "V: Serialize",
    deserialize = "V: Deserialize<'de>"
))]
pub struct LwwMap<V> {
    node: NodeId,
    version: VectorClock,
    entries: BTreeMap<String, LwwRegister<Option<V>>>,
}

impl<V: Clone> LwwMap<V> {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            version: VectorClock::new(),
            entries: BTreeMap::new(),
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Join of every write this map has seen
    pub fn version(&self) -> &VectorClock {
        &self.version
    }

    /// Write a value (or delete marker) stamped with the current time
    pub fn set(&mut self, key: impl Into<String>, value: Option<V>) {
        self.set_at(key, value, unix_millis());
    }

    pub fn set_at(&mut self, key: impl Into<String>, value: Option<V>, timestamp: u64) {
        self.version.increment(&self.node);
        let clock = self.version.clone();
        let node = self.node.clone();
        self.entries
            .entry(key.into())
            .or_insert_with(|| LwwRegister::new(node.clone(), None))
            .stamp(&node, value, timestamp, clock);
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        self.set(key, Some(value));
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.set(key, None);
    }

    /// Live value for a key; deleted and unknown keys read as `None`
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key).and_then(|reg| reg.get().as_ref())
    }

    /// Register for a key, including delete markers
    pub fn register(&self, key: &str) -> Option<&LwwRegister<Option<V>>> {
        self.entries.get(key)
    }

    /// Live keys in order
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, reg)| reg.get().is_some())
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.values().filter(|reg| reg.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All registers (live and deleted) in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &LwwRegister<Option<V>>)> {
        self.entries.iter()
    }

    fn merge_register(&mut self, key: &str, remote: &LwwRegister<Option<V>>) {
        self.version.merge(remote.clock());
        match self.entries.get_mut(key) {
            Some(local) => local.merge(remote),
            None => {
                self.entries.insert(key.to_string(), remote.clone());
            }
        }
    }

    pub fn merge(&mut self, other: &LwwMap<V>) {
        for (key, remote) in &other.entries {
            self.merge_register(key, remote);
        }
        self.version.merge(&other.version);
    }

    /// Registers a peer holding `since` may be missing.
    ///
    /// A register is already known when its clock happens before `since` or
    /// equals it, i.e. `since` descends the register clock. Everything else,
    /// including registers concurrent with `since`, is included.
    pub fn compute_delta(&self, since: &VectorClock) -> Delta<V> {
        let changes = self
            .entries
            .iter()
            .filter(|(_, reg)| !since.descends(reg.clock()))
            .map(|(key, reg)| (key.clone(), reg.clone()))
            .collect();

        Delta {
            node_id: self.node.clone(),
            timestamp: unix_millis(),
            changes,
        }
    }

    /// Merge each register of a delta; returns how many were carried
    pub fn apply_delta(&mut self, delta: &Delta<V>) -> usize {
        for (key, remote) in &delta.changes {
            self.merge_register(key, remote);
        }
        delta.changes.len()
    }

    /// Same registers and version, ignoring which node owns the replica
    pub fn same_state(&self, other: &LwwMap<V>) -> bool
    where
        V: PartialEq,
    {
        self.version == other.version && self.entries == other.entries
    }
}

impl<V: Clone> Crdt for LwwMap<V> {
    fn merge(&mut self, other: &Self) {
        LwwMap::merge(self, other)
    }
}
