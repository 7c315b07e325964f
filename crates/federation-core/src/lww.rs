//! Last-write-wins register ordered by vector clock, then wall clock

use crate::vclock::{NodeId, VectorClock};
use crate::{unix_millis, Crdt};
use serde::{Deserialize, Serialize};

/// A register holding a single value.
///
/// Causal order decides between writes when one exists. Concurrent writes are
/// resolved by the later wall-clock timestamp, then by the writer id so that
/// every replica picks the same winner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LwwRegister<T> {
    value: T,
    /// Wall-clock time of the winning write (unix millis)
    timestamp: u64,
    clock: VectorClock,
    /// Node that produced the current value
    writer: NodeId,
}

impl<T> LwwRegister<T> {
    /// A register that has never been written.
    ///
    /// Its clock is empty, so any written register supersedes it on merge.
    pub fn new(owner: NodeId, initial: T) -> Self {
        Self {
            value: initial,
            timestamp: 0,
            clock: VectorClock::new(),
            writer: owner,
        }
    }

    /// Write a value as `writer`, stamped with the current time
    pub fn set(&mut self, writer: &NodeId, value: T) {
        self.set_at(writer, value, unix_millis());
    }

    /// Write a value with an explicit wall-clock stamp.
    ///
    /// The stored stamp is kept above the current one, so a causal successor
    /// never carries an older time than the write it overwrites.
    pub fn set_at(&mut self, writer: &NodeId, value: T, timestamp: u64) {
        self.clock.increment(writer);
        self.timestamp = self.next_timestamp(timestamp);
        self.value = value;
        self.writer = writer.clone();
    }

    /// Overwrite with a clock minted by an enclosing structure.
    ///
    /// `clock` must descend the register's current clock.
    pub(crate) fn stamp(&mut self, writer: &NodeId, value: T, timestamp: u64, clock: VectorClock) {
        debug_assert!(clock.descends(&self.clock));
        self.timestamp = self.next_timestamp(timestamp);
        self.value = value;
        self.clock = clock;
        self.writer = writer.clone();
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    pub fn writer(&self) -> &NodeId {
        &self.writer
    }

    fn next_timestamp(&self, wall: u64) -> u64 {
        wall.max(self.timestamp.saturating_add(1))
    }

    fn wins_tie_over(&self, other: &Self) -> bool {
        (self.timestamp, &self.writer) > (other.timestamp, &other.writer)
    }
}

impl<T: Clone> LwwRegister<T> {
    /// Merge a remote register.
    ///
    /// The clocks are joined whether or not the remote value wins.
    pub fn merge(&mut self, other: &Self) {
        if other.clock.happens_before(&self.clock) {
            return;
        }

        let adopt = self.clock.happens_before(&other.clock) || other.wins_tie_over(self);
        if adopt {
            self.value = other.value.clone();
            self.timestamp = other.timestamp;
            self.writer = other.writer.clone();
        }
        self.clock.merge(&other.clock);
    }
}

impl<T: Clone> Crdt for LwwRegister<T> {
    fn merge(&mut self, other: &Self) {
        LwwRegister::merge(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeId {
        NodeId::from(id)
    }

    #[test]
    fn test_set_advances_owner_slot() {
        let a = node("a");
        let mut reg = LwwRegister::new(a.clone(), 0u32);
        reg.set_at(&a, 7, 10);
        reg.set_at(&a, 8, 20);

        assert_eq!(*reg.get(), 8);
        assert_eq!(reg.clock().get(&a), 2);
        assert_eq!(reg.timestamp(), 20);
    }

    #[test]
    fn test_causally_newer_wins_despite_older_timestamp() {
        let (a, b) = (node("a"), node("b"));
        let mut left = LwwRegister::new(a.clone(), "init");
        left.set_at(&a, "first", 1_000);

        let mut right = left.clone();
        // b's wall clock lags, but b has observed a's write
        right.set_at(&b, "second", 500);

        left.merge(&right);
        assert_eq!(*left.get(), "second");

        // stale copy is discarded
        let mut stale = LwwRegister::new(a.clone(), "init");
        stale.set_at(&a, "first", 1_000);
        right.merge(&stale);
        assert_eq!(*right.get(), "second");
    }

    #[test]
    fn test_concurrent_later_timestamp_wins_and_clocks_join() {
        let (a, b) = (node("a"), node("b"));
        let mut left = LwwRegister::new(a.clone(), "");
        let mut right = LwwRegister::new(b.clone(), "");
        left.set_at(&a, "malicious", 100);
        right.set_at(&b, "benign", 200);

        let mut l = left.clone();
        l.merge(&right);
        let mut r = right.clone();
        r.merge(&left);

        assert_eq!(*l.get(), "benign");
        assert_eq!(l, r);

        // losing side still records the winner's history
        let mut loser = right.clone();
        loser.merge(&left);
        assert_eq!(loser.clock().get(&a), 1);
        assert_eq!(*loser.get(), "benign");
    }

    #[test]
    fn test_successor_stamp_never_older() {
        let (a, b) = (node("a"), node("b"));
        let mut reg = LwwRegister::new(a.clone(), 0);
        reg.set_at(&a, 1, 1_000);
        reg.set_at(&b, 2, 400);
        assert_eq!(reg.timestamp(), 1_001);
    }

    #[test]
    fn test_merge_order_independent_with_skewed_clocks() {
        let (a, b, c) = (node("a"), node("b"), node("c"));
        let mut r2 = LwwRegister::new(b.clone(), 0);
        r2.set_at(&b, 2, 900);
        // r3 overwrites r2 on a node whose wall clock runs behind
        let mut r3 = r2.clone();
        r3.set_at(&c, 3, 100);
        let mut r1 = LwwRegister::new(a.clone(), 0);
        r1.set_at(&a, 1, 500);

        let mut first = r1.clone();
        first.merge(&r2);
        first.merge(&r3);
        let mut second = r1.clone();
        second.merge(&r3);
        second.merge(&r2);
        assert_eq!(first, second);
        assert_eq!(*first.get(), 3);
    }

    #[test]
    fn test_equal_timestamp_tie_broken_by_writer() {
        let (a, b) = (node("a"), node("b"));
        let mut left = LwwRegister::new(a.clone(), 0);
        let mut right = LwwRegister::new(b.clone(), 0);
        left.set_at(&a, 1, 50);
        right.set_at(&b, 2, 50);

        let mut l = left.clone();
        l.merge(&right);
        let mut r = right.clone();
        r.merge(&left);
        assert_eq!(l.get(), r.get());
        assert_eq!(*l.get(), 2);
    }

    #[test]
    fn test_merge_idempotent() {
        let a = node("a");
        let mut reg = LwwRegister::new(a.clone(), 1);
        reg.set_at(&a, 5, 9);
        let copy = reg.clone();
        reg.merge(&copy);
        assert_eq!(reg, copy);
    }
}
