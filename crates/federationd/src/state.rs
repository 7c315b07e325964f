//! Replicated federation state and inbound sync handling
//!
//! Each CRDT sits behind its own lock. Local writers and inbound merges take
//! the write lock of the structure they touch; snapshots and deltas are built
//! under read locks and never held across an await.

use crate::peers::{FederationNode, PeerError, PeerRegistry, PeerStats};
use federation_core::{
    unix_millis, MerkleTree, NodeId, OrSet, PnCounter, Snapshot, SyncAck, SyncMessage,
    SyncPayload, ThreatIntelMap, VectorClock,
};
use federation_net::SyncHandler;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum FederationError {
    #[error(transparent)]
    Peer(#[from] PeerError),
    #[error("Invalid sync message: {0}")]
    InvalidMessage(String),
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] federation_core::Error),
}

/// Point-in-time view of this node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FederationStats {
    pub node_id: NodeId,
    pub total_peers: usize,
    pub active_peers: usize,
    pub suspicious_peers: usize,
    pub quarantined_peers: usize,
    pub offline_peers: usize,
    pub threat_intel_count: usize,
    pub detection_rules: usize,
    pub aggregated_metrics: i64,
    /// Last time a full snapshot was merged (unix millis)
    pub last_full_sync: Option<u64>,
    /// Merkle root over threat-intel registers
    pub threat_intel_root: String,
}

pub struct FederatedState {
    node_id: NodeId,
    threat_intel: RwLock<ThreatIntelMap>,
    rules: RwLock<OrSet<String>>,
    metrics: RwLock<PnCounter>,
    peers: PeerRegistry,
    last_full_sync: Mutex<Option<u64>>,
}

impl FederatedState {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            threat_intel: RwLock::new(ThreatIntelMap::new(node_id.clone())),
            rules: RwLock::new(OrSet::new()),
            metrics: RwLock::new(PnCounter::new(node_id.clone())),
            peers: PeerRegistry::new(node_id.clone()),
            last_full_sync: Mutex::new(None),
            node_id,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    // --- threat intelligence ---

    /// Write a threat-intel document. A JSON `null` reads back as absent.
    pub fn update_threat_intel(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let value = (!value.is_null()).then_some(value);
        debug!("Threat intel updated: {}", key);
        self.threat_intel.write().set(key, value);
    }

    pub fn get_threat_intel(&self, key: &str) -> Option<Value> {
        self.threat_intel.read().get(key).cloned()
    }

    pub fn delete_threat_intel(&self, key: impl Into<String>) {
        let key = key.into();
        debug!("Threat intel deleted: {}", key);
        self.threat_intel.write().delete(key);
    }

    pub fn threat_intel_keys(&self) -> Vec<String> {
        self.threat_intel.read().keys()
    }

    pub fn threat_intel_version(&self) -> VectorClock {
        self.threat_intel.read().version().clone()
    }

    /// Merkle tree over every threat-intel register in key order.
    ///
    /// Replicas holding the same registers produce the same root.
    pub fn threat_intel_digest(&self) -> MerkleTree {
        let map = self.threat_intel.read();
        let blocks: Vec<Vec<u8>> = map
            .iter()
            .filter_map(|entry| serde_json::to_vec(&entry).ok())
            .collect();
        MerkleTree::new(&blocks)
    }

    // --- detection rules ---

    /// Add a rule under a freshly minted tag; returns the tag
    pub fn add_detection_rule(&self, rule_id: impl Into<String>) -> String {
        let rule_id = rule_id.into();
        let tag = mint_tag(&self.node_id);
        debug!("Detection rule added: {} ({})", rule_id, tag);
        self.rules.write().add(rule_id, tag.clone());
        tag
    }

    /// Remove every tag this node has seen for a rule
    pub fn remove_detection_rule(&self, rule_id: &str) -> bool {
        let removed = self.rules.write().remove(&rule_id.to_string());
        if removed {
            debug!("Detection rule removed: {}", rule_id);
        }
        removed
    }

    pub fn has_detection_rule(&self, rule_id: &str) -> bool {
        self.rules.read().contains(&rule_id.to_string())
    }

    pub fn get_active_rules(&self) -> Vec<String> {
        self.rules.read().items()
    }

    // --- metrics ---

    pub fn increment_metric(&self, delta: u64) {
        self.metrics.write().increment(delta);
    }

    pub fn decrement_metric(&self, delta: u64) {
        self.metrics.write().decrement(delta);
    }

    pub fn get_metric_value(&self) -> i64 {
        self.metrics.read().value()
    }

    // --- peers ---

    pub fn add_peer(&self, node: FederationNode) -> Result<(), FederationError> {
        Ok(self.peers.add_peer(node, unix_millis())?)
    }

    pub fn remove_peer(&self, id: &NodeId) -> bool {
        self.peers.remove_peer(id).is_some()
    }

    pub fn record_sync_success(&self, peer: &NodeId, acked: &VectorClock) {
        self.peers.record_success(peer, acked, unix_millis());
    }

    pub fn record_sync_failure(&self, peer: &NodeId) {
        self.peers.record_failure(peer, unix_millis());
    }

    // --- snapshots ---

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            threat_intel: self.threat_intel.read().clone(),
            rules: self.rules.read().clone(),
            metrics: self.metrics.read().clone(),
        }
    }

    /// Fold a complete remote snapshot into local state
    pub fn merge_snapshot(&self, snapshot: &Snapshot) {
        self.threat_intel.write().merge(&snapshot.threat_intel);
        self.rules.write().merge(&snapshot.rules);
        self.metrics.write().merge(&snapshot.metrics);
        *self.last_full_sync.lock() = Some(unix_millis());
    }

    // --- outbound messages ---

    /// Delta of everything the peer is not known to hold.
    ///
    /// Rules and metrics are small state-based CRDTs and travel whole.
    pub fn build_delta_message(&self, peer: &NodeId) -> Result<SyncMessage, FederationError> {
        let since = self
            .peers
            .version(peer)
            .ok_or_else(|| PeerError::UnknownPeer(peer.clone()))?;

        let (threat_delta, version) = {
            let map = self.threat_intel.read();
            (map.compute_delta(&since), map.version().clone())
        };
        let rules_delta = Some(self.rules.read().clone());
        let metrics_delta = Some(self.metrics.read().clone());

        debug!(
            "Built delta for {}: {} threat intel changes",
            peer,
            threat_delta.len()
        );
        Ok(SyncMessage::new(
            self.node_id.clone(),
            peer.clone(),
            version,
            SyncPayload::Delta {
                threat_delta,
                rules_delta,
                metrics_delta,
            },
        ))
    }

    /// Unsolicited complete snapshot for a peer
    pub fn build_full_message(&self, peer: &NodeId) -> Result<SyncMessage, FederationError> {
        let full_state = self.snapshot().to_json()?;
        Ok(self.message_to(peer, SyncPayload::Full { full_state }))
    }

    pub fn build_request_message(&self, peer: &NodeId) -> SyncMessage {
        self.message_to(peer, SyncPayload::Request)
    }

    fn build_response_message(&self, peer: &NodeId) -> Result<SyncMessage, FederationError> {
        let full_state = self.snapshot().to_json()?;
        Ok(self.message_to(peer, SyncPayload::Response { full_state }))
    }

    fn message_to(&self, peer: &NodeId, payload: SyncPayload) -> SyncMessage {
        SyncMessage::new(
            self.node_id.clone(),
            peer.clone(),
            self.threat_intel_version(),
            payload,
        )
    }

    // --- inbound ---

    fn validate(&self, message: &SyncMessage) -> Result<(), FederationError> {
        if message.from_node.is_empty() {
            return Err(FederationError::InvalidMessage("missing sender".into()));
        }
        if message.from_node == self.node_id {
            return Err(FederationError::InvalidMessage("message from self".into()));
        }
        if !message.to_node.is_empty() && message.to_node != self.node_id {
            return Err(FederationError::InvalidMessage(format!(
                "addressed to {}",
                message.to_node
            )));
        }
        if !self.peers.contains(&message.from_node) {
            return Err(PeerError::UnknownPeer(message.from_node.clone()).into());
        }
        Ok(())
    }

    /// Apply an inbound sync message.
    ///
    /// Nothing is mutated unless the message is valid, comes from a known
    /// peer and any carried snapshot decodes completely.
    pub fn handle_sync_message(&self, message: SyncMessage) -> Result<SyncAck, FederationError> {
        self.validate(&message)?;
        let sender = message.from_node.clone();
        let snapshot = match &message.payload {
            SyncPayload::Full { .. } | SyncPayload::Response { .. } => Some(message.snapshot()?),
            _ => None,
        };

        self.peers.touch(&sender, unix_millis())?;
        debug!("Sync {} from {}", message.sync_type(), sender);

        match message.payload {
            SyncPayload::Delta {
                threat_delta,
                rules_delta,
                metrics_delta,
            } => {
                let applied = self.threat_intel.write().apply_delta(&threat_delta);
                if let Some(rules) = rules_delta {
                    self.rules.write().merge(&rules);
                }
                if let Some(metrics) = metrics_delta {
                    self.metrics.write().merge(&metrics);
                }
                self.peers.merge_version(&sender, &message.version);
                debug!("Applied {} threat intel changes from {}", applied, sender);
            }
            SyncPayload::Full { .. } | SyncPayload::Response { .. } => {
                if let Some(snapshot) = snapshot {
                    self.merge_snapshot(&snapshot);
                }
                self.peers.merge_version(&sender, &message.version);
                info!("Merged full state from {}", sender);
            }
            SyncPayload::Request => {
                let reply = self.build_response_message(&sender)?;
                return Ok(SyncAck::synced(self.threat_intel_version()).with_reply(reply));
            }
        }

        Ok(SyncAck::synced(self.threat_intel_version()))
    }

    pub fn get_stats(&self) -> FederationStats {
        let PeerStats {
            total,
            active,
            suspicious,
            quarantined,
            offline,
        } = self.peers.stats();
        FederationStats {
            node_id: self.node_id.clone(),
            total_peers: total,
            active_peers: active,
            suspicious_peers: suspicious,
            quarantined_peers: quarantined,
            offline_peers: offline,
            threat_intel_count: self.threat_intel.read().len(),
            detection_rules: self.rules.read().len(),
            aggregated_metrics: self.get_metric_value(),
            last_full_sync: *self.last_full_sync.lock(),
            threat_intel_root: self.threat_intel_digest().root_hex(),
        }
    }
}

impl SyncHandler for FederatedState {
    fn handle(&self, message: SyncMessage) -> Result<SyncAck, String> {
        self.handle_sync_message(message).map_err(|e| e.to_string())
    }
}

/// Unique add tag: node id, 8 random bytes, nanosecond clock
fn mint_tag(node: &NodeId) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{}-{}-{}", node, hex::encode(rand::random::<[u8; 8]>()), nanos)
}
