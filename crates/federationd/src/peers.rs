//! Peer registry and trust scoring
//!
//! Trust moves by an exponential moving average on every sync attempt, and a
//! peer's status is recomputed from its trust and last contact after each
//! update. Peers that fall to `Quarantined` or go `Offline` stop being picked
//! for gossip.

use federation_core::{NodeId, VectorClock};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, info, warn};

/// Trust given to a peer registered without one
pub const INITIAL_TRUST: f64 = 0.5;
/// EMA weight of the latest sync outcome
pub const TRUST_ALPHA: f64 = 0.05;
/// Below this a peer is `Suspicious`
pub const SUSPICIOUS_THRESHOLD: f64 = 0.3;
/// Below this a peer is `Quarantined`
pub const QUARANTINE_THRESHOLD: f64 = 0.1;
/// An otherwise healthy peer silent for longer than this is `Offline`
pub const OFFLINE_AFTER_MS: u64 = 5 * 60 * 1000;

/// Peer registry errors
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Cannot add self as peer")]
    SelfRegistration,
    #[error("Unknown peer: {0}")]
    UnknownPeer(NodeId),
    #[error("Invalid peer: {0}")]
    InvalidPeer(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Active,
    Suspicious,
    Quarantined,
    Offline,
}

impl PeerStatus {
    /// Whether anti-entropy may pick this peer
    pub fn is_selectable(&self) -> bool {
        matches!(self, PeerStatus::Active | PeerStatus::Suspicious)
    }
}

/// Peer registration request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FederationNode {
    pub id: NodeId,
    pub address: String,
    #[serde(default, with = "hex::serde")]
    pub public_key: Vec<u8>,
    /// Starting trust for a new peer; unset or zero means [`INITIAL_TRUST`]
    #[serde(default)]
    pub trust_score: Option<f64>,
}

impl FederationNode {
    pub fn new(id: impl Into<NodeId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            public_key: Vec::new(),
            trust_score: None,
        }
    }
}

/// A known federation peer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub id: NodeId,
    pub address: String,
    #[serde(with = "hex::serde")]
    pub public_key: Vec<u8>,
    /// Last contact (unix millis)
    pub last_seen: u64,
    pub status: PeerStatus,
    /// Trust score (0.0-1.0)
    pub trust_score: f64,
    /// Threat-intel version this peer is known to hold
    pub version: VectorClock,
    pub consecutive_failures: u32,
}

impl Peer {
    /// Status implied by trust and last contact at `now`
    pub fn status_at(&self, now: u64) -> PeerStatus {
        if self.trust_score < QUARANTINE_THRESHOLD {
            PeerStatus::Quarantined
        } else if self.trust_score < SUSPICIOUS_THRESHOLD {
            PeerStatus::Suspicious
        } else if now.saturating_sub(self.last_seen) > OFFLINE_AFTER_MS {
            PeerStatus::Offline
        } else {
            PeerStatus::Active
        }
    }

    fn apply_outcome(&mut self, success: bool) {
        let outcome = if success { 1.0 } else { 0.0 };
        self.trust_score =
            ((1.0 - TRUST_ALPHA) * self.trust_score + TRUST_ALPHA * outcome).clamp(0.0, 1.0);
    }

    fn refresh(&mut self, now: u64) -> Option<StatusChange> {
        let next = self.status_at(now);
        if next == self.status {
            return None;
        }
        let change = StatusChange {
            peer: self.id.clone(),
            from: self.status,
            to: next,
            trust_score: self.trust_score,
        };
        self.status = next;
        Some(change)
    }
}

/// A peer moved from one status to another
#[derive(Clone, Debug, PartialEq)]
pub struct StatusChange {
    pub peer: NodeId,
    pub from: PeerStatus,
    pub to: PeerStatus,
    pub trust_score: f64,
}

impl StatusChange {
    fn log(&self) {
        match self.to {
            PeerStatus::Quarantined => error!(
                "Peer {} quarantined (trust {:.3})",
                self.peer, self.trust_score
            ),
            PeerStatus::Suspicious => warn!(
                "Peer {} marked suspicious (trust {:.3})",
                self.peer, self.trust_score
            ),
            PeerStatus::Offline => warn!("Peer {} offline", self.peer),
            PeerStatus::Active => info!(
                "Peer {} active again (was {:?})",
                self.peer, self.from
            ),
        }
    }
}

/// Peer counts by status
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStats {
    pub total: usize,
    pub active: usize,
    pub suspicious: usize,
    pub quarantined: usize,
    pub offline: usize,
}

/// All peers known to this node, behind one lock
pub struct PeerRegistry {
    local: NodeId,
    peers: RwLock<HashMap<NodeId, Peer>>,
}

impl PeerRegistry {
    pub fn new(local: NodeId) -> Self {
        Self {
            local,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or re-register) a peer.
    ///
    /// Re-registering a known peer only updates its address and public key.
    /// Trust, status, failure count and version are earned through syncs and
    /// stay as they are.
    pub fn add_peer(&self, node: FederationNode, now: u64) -> Result<(), PeerError> {
        if node.id == self.local {
            return Err(PeerError::SelfRegistration);
        }
        if node.id.is_empty() {
            return Err(PeerError::InvalidPeer("empty peer id".into()));
        }
        if node.address.trim().is_empty() {
            return Err(PeerError::InvalidPeer(format!("peer {} has no address", node.id)));
        }

        let mut peers = self.peers.write();
        if let Some(existing) = peers.get_mut(&node.id) {
            existing.address = node.address;
            existing.public_key = node.public_key;
            info!(
                "Peer updated: {} at {} ({:?})",
                existing.id, existing.address, existing.status
            );
            return Ok(());
        }

        let trust_score = node
            .trust_score
            .filter(|t| *t > 0.0 && t.is_finite())
            .unwrap_or(INITIAL_TRUST)
            .clamp(0.0, 1.0);

        let mut peer = Peer {
            id: node.id.clone(),
            address: node.address,
            public_key: node.public_key,
            last_seen: now,
            status: PeerStatus::Active,
            trust_score,
            version: VectorClock::new(),
            consecutive_failures: 0,
        };
        peer.status = peer.status_at(now);

        info!("Peer added: {} at {}", peer.id, peer.address);
        peers.insert(node.id, peer);
        Ok(())
    }

    pub fn remove_peer(&self, id: &NodeId) -> Option<Peer> {
        let removed = self.peers.write().remove(id);
        if removed.is_some() {
            info!("Peer removed: {}", id);
        }
        removed
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.peers.read().contains_key(id)
    }

    pub fn get(&self, id: &NodeId) -> Option<Peer> {
        self.peers.read().get(id).cloned()
    }

    pub fn version(&self, id: &NodeId) -> Option<VectorClock> {
        self.peers.read().get(id).map(|p| p.version.clone())
    }

    /// Record inbound contact from a peer
    pub fn touch(&self, id: &NodeId, now: u64) -> Result<(), PeerError> {
        let mut peers = self.peers.write();
        let peer = peers
            .get_mut(id)
            .ok_or_else(|| PeerError::UnknownPeer(id.clone()))?;
        peer.last_seen = peer.last_seen.max(now);
        if let Some(change) = peer.refresh(now) {
            change.log();
        }
        Ok(())
    }

    /// Fold a version reported by (or about) a peer into its stored version
    pub fn merge_version(&self, id: &NodeId, version: &VectorClock) {
        if let Some(peer) = self.peers.write().get_mut(id) {
            peer.version.merge(version);
        }
    }

    /// Successful sync: raise trust, refresh contact and learn the peer's version
    pub fn record_success(
        &self,
        id: &NodeId,
        acked: &VectorClock,
        now: u64,
    ) -> Option<StatusChange> {
        let mut peers = self.peers.write();
        let peer = peers.get_mut(id)?;
        peer.apply_outcome(true);
        peer.last_seen = peer.last_seen.max(now);
        peer.consecutive_failures = 0;
        peer.version.merge(acked);
        let change = peer.refresh(now);
        if let Some(change) = &change {
            change.log();
        }
        change
    }

    /// Failed sync: lower trust
    pub fn record_failure(&self, id: &NodeId, now: u64) -> Option<StatusChange> {
        let mut peers = self.peers.write();
        let peer = peers.get_mut(id)?;
        peer.apply_outcome(false);
        peer.consecutive_failures += 1;
        let change = peer.refresh(now);
        if let Some(change) = &change {
            change.log();
        }
        change
    }

    /// Recompute every status (silence alone can make a peer `Offline`)
    pub fn refresh_all(&self, now: u64) -> Vec<StatusChange> {
        let mut peers = self.peers.write();
        let changes: Vec<StatusChange> = peers
            .values_mut()
            .filter_map(|peer| peer.refresh(now))
            .collect();
        for change in &changes {
            change.log();
        }
        changes
    }

    /// Peers eligible for gossip
    pub fn selectable(&self) -> Vec<Peer> {
        self.peers
            .read()
            .values()
            .filter(|p| p.status.is_selectable())
            .cloned()
            .collect()
    }

    /// Remove peers not heard from for `max_age_ms` that are `Quarantined`,
    /// or `Offline` with failed syncs. A quiet peer that never failed stays.
    pub fn evict_stale(&self, max_age_ms: u64, now: u64) -> Vec<NodeId> {
        let mut peers = self.peers.write();
        let stale: Vec<NodeId> = peers
            .values()
            .filter(|p| match p.status {
                PeerStatus::Quarantined => true,
                PeerStatus::Offline => p.consecutive_failures > 0,
                _ => false,
            })
            .filter(|p| now.saturating_sub(p.last_seen) > max_age_ms)
            .map(|p| p.id.clone())
            .collect();
        for id in &stale {
            peers.remove(id);
            info!("Peer evicted: {}", id);
        }
        stale
    }

    /// All peers, ordered by id
    pub fn list(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.read().values().cloned().collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    pub fn stats(&self) -> PeerStats {
        let peers = self.peers.read();
        let count = |status: PeerStatus| peers.values().filter(|p| p.status == status).count();
        PeerStats {
            total: peers.len(),
            active: count(PeerStatus::Active),
            suspicious: count(PeerStatus::Suspicious),
            quarantined: count(PeerStatus::Quarantined),
            offline: count(PeerStatus::Offline),
        }
    }
}
