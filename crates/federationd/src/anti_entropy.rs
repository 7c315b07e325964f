//! Periodic anti-entropy gossip
//!
//! Every interval a random subset of eligible peers is sent a delta of what
//! each is not known to hold. Each peer exchange runs as its own task with a
//! timeout, so a slow or dead peer only costs its own slot in the round.

use crate::peers::{Peer, PeerError};
use crate::state::{FederatedState, FederationError};
use federation_core::{unix_millis, NodeId, SyncAck, SyncMessage, SyncType};
use federation_net::{SyncTransport, TransportError};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AntiEntropyConfig {
    /// Time between rounds
    pub interval: Duration,
    /// Peers contacted per round
    pub fanout: usize,
    /// Deadline for one peer exchange
    pub rpc_timeout: Duration,
    /// Silence after which quarantined or failing offline peers are dropped
    pub peer_eviction: Option<Duration>,
}

impl Default for AntiEntropyConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            fanout: 3,
            rpc_timeout: Duration::from_secs(5),
            peer_eviction: Some(Duration::from_secs(3600)),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Sync timed out after {0:?}")]
    Timeout(Duration),
    #[error("Sync cancelled")]
    Cancelled,
    #[error(transparent)]
    State(#[from] FederationError),
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl From<PeerError> for SyncError {
    fn from(err: PeerError) -> Self {
        SyncError::State(err.into())
    }
}

/// Outcome of one round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct AntiEntropy<T> {
    state: Arc<FederatedState>,
    transport: Arc<T>,
    config: AntiEntropyConfig,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl<T: SyncTransport> AntiEntropy<T> {
    pub fn new(state: Arc<FederatedState>, transport: Arc<T>, config: AntiEntropyConfig) -> Self {
        Self {
            state,
            transport,
            config,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn state(&self) -> &Arc<FederatedState> {
        &self.state
    }

    /// Start the periodic loop. The first round runs one interval after start.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = self.clone();
        self.tasks.spawn(async move {
            let mut ticker = interval(engine.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            info!(
                "Anti-entropy started: every {:?}, fanout {}",
                engine.config.interval, engine.config.fanout
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.prune();
                        let round = engine.clone();
                        engine.tasks.spawn(async move {
                            let report = round.run_round().await;
                            debug!(
                                "Anti-entropy round: {} selected, {} ok, {} failed",
                                report.selected, report.succeeded, report.failed
                            );
                        });
                    }
                    _ = engine.shutdown.cancelled() => {
                        break;
                    }
                }
            }
            info!("Anti-entropy stopped");
        })
    }

    /// Pull the full state of each bootstrap peer in the background
    pub fn spawn_bootstrap(self: &Arc<Self>, peers: Vec<NodeId>) {
        for peer in peers {
            let engine = self.clone();
            self.tasks.spawn(async move {
                match engine.request_full_state(&peer).await {
                    Ok(()) => info!("Bootstrapped from {}", peer),
                    Err(e) => warn!("Bootstrap from {} failed: {}", peer, e),
                }
            });
        }
    }

    /// Refresh statuses and evict peers silent past the eviction age
    pub fn prune(&self) -> Vec<NodeId> {
        let now = unix_millis();
        let peers = self.state.peers();
        peers.refresh_all(now);
        match self.config.peer_eviction {
            Some(max_age) => {
                let max_age_ms = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
                peers.evict_stale(max_age_ms, now)
            }
            None => Vec::new(),
        }
    }

    /// Up to `fanout` eligible peers in random order
    pub fn select_peers(&self) -> Vec<Peer> {
        self.state.peers().refresh_all(unix_millis());
        let mut eligible = self.state.peers().selectable();
        let fanout = self.config.fanout.min(eligible.len());
        let (chosen, _) = eligible.partial_shuffle(&mut rand::thread_rng(), fanout);
        chosen.to_vec()
    }

    /// Run one round and wait for every peer exchange to finish
    pub async fn run_round(self: &Arc<Self>) -> RoundReport {
        let selected = self.select_peers();
        let mut report = RoundReport {
            selected: selected.len(),
            ..Default::default()
        };

        let mut syncs = JoinSet::new();
        for peer in selected {
            let engine = self.clone();
            syncs.spawn(async move { engine.sync_with_peer(&peer).await });
        }

        while let Some(joined) = syncs.join_next().await {
            match joined {
                Ok(Ok(())) => report.succeeded += 1,
                Ok(Err(SyncError::Cancelled)) => {}
                Ok(Err(_)) => report.failed += 1,
                Err(e) => {
                    warn!("Peer sync task failed: {}", e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Push a delta to one peer and fold the outcome into its trust
    pub async fn sync_with_peer(&self, peer: &Peer) -> Result<(), SyncError> {
        let message = self.state.build_delta_message(&peer.id)?;
        let ack = self.deliver(peer, message).await?;
        debug!("Delta sync with {} acknowledged", peer.id);
        self.state.record_sync_success(&peer.id, &ack.version);
        Ok(())
    }

    /// Ask a peer for its complete snapshot and merge it
    pub async fn request_full_state(&self, peer_id: &NodeId) -> Result<(), SyncError> {
        let peer = self.known_peer(peer_id)?;
        let message = self.state.build_request_message(peer_id);
        let ack = self.deliver(&peer, message).await?;

        let version = ack.version.clone();
        if let Err(e) = self.merge_full_reply(peer_id, ack) {
            warn!("Full state from {} rejected: {}", peer_id, e);
            self.state.record_sync_failure(peer_id);
            return Err(e);
        }
        self.state.record_sync_success(peer_id, &version);
        info!("Full state received from {}", peer_id);
        Ok(())
    }

    fn merge_full_reply(&self, peer_id: &NodeId, ack: SyncAck) -> Result<(), SyncError> {
        let reply = ack
            .reply
            .ok_or_else(|| SyncError::UnexpectedReply("request answered without state".into()))?;
        if reply.sync_type() != SyncType::Response || reply.from_node != *peer_id {
            return Err(SyncError::UnexpectedReply(format!(
                "{} from {}",
                reply.sync_type(),
                reply.from_node
            )));
        }
        self.state.handle_sync_message(reply)?;
        Ok(())
    }

    /// Send our complete snapshot to a peer
    pub async fn push_full_state(&self, peer_id: &NodeId) -> Result<(), SyncError> {
        let peer = self.known_peer(peer_id)?;
        let message = self.state.build_full_message(peer_id)?;
        let ack = self.deliver(&peer, message).await?;
        self.state.record_sync_success(peer_id, &ack.version);
        Ok(())
    }

    /// Stop the loop, cancel in-flight exchanges and wait for tasks to end
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn known_peer(&self, id: &NodeId) -> Result<Peer, SyncError> {
        self.state
            .peers()
            .get(id)
            .ok_or_else(|| PeerError::UnknownPeer(id.clone()).into())
    }

    /// Send under the exchange deadline. Failures count against the peer's
    /// trust; cancellation does not.
    async fn deliver(&self, peer: &Peer, message: SyncMessage) -> Result<SyncAck, SyncError> {
        let deadline = self.config.rpc_timeout;
        let result = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(SyncError::Cancelled),
            sent = tokio::time::timeout(deadline, self.transport.send(&peer.address, message)) => {
                match sent {
                    Ok(Ok(ack)) => Ok(ack),
                    Ok(Err(e)) => Err(SyncError::Transport(e)),
                    Err(_) => Err(SyncError::Timeout(deadline)),
                }
            }
        };

        if let Err(e) = &result {
            warn!("Sync with {} failed: {}", peer.id, e);
            self.state.record_sync_failure(&peer.id);
        }
        result
    }
}
