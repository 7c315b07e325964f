//! Swarm Federation Core Library
//!
//! This crate provides the convergent replicated data types and wire
//! messages shared by every federation node.
//!
//! # Modules
//!
//! - [`vclock`]: Vector clocks and node identifiers
//! - [`lww`]: Last-write-wins register
//! - [`counter`]: Grow-only and positive/negative counters
//! - [`set`]: Grow-only and observed-remove sets
//! - [`lww_map`]: Keyed LWW registers with delta computation
//! - [`merkle`]: Binary SHA-256 Merkle tree for divergence checks
//! - [`message`]: Sync messages, snapshots and acknowledgments
//! - [`error`]: Error types

pub mod counter;
pub mod error;
pub mod lww;
pub mod lww_map;
pub mod merkle;
pub mod message;
pub mod set;
pub mod vclock;

pub use counter::{GCounter, PnCounter};
pub use error::{Error, Result};
pub use lww::LwwRegister;
pub use lww_map::{Delta, LwwMap};
pub use merkle::MerkleTree;
pub use message::{Snapshot, SyncAck, SyncMessage, SyncPayload, SyncType, ThreatIntelMap};
pub use set::{GSet, OrSet};
pub use vclock::{NodeId, VectorClock};

/// State-based CRDT: a join semilattice under `merge`.
///
/// Implementations must make `merge` commutative, associative and idempotent.
pub trait Crdt {
    /// Merge the other replica's state into this one.
    fn merge(&mut self, other: &Self);
}

/// Current wall-clock time as unix milliseconds.
pub fn unix_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
