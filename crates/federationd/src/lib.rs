//! federationd - swarm federation state reconciliation daemon
//!
//! This daemon provides:
//! - Replicated threat intel, detection rules and metrics
//! - Peer registry with trust scoring
//! - Periodic delta anti-entropy with bounded fanout
//! - HTTP sync endpoint and management API

pub mod anti_entropy;
pub mod config;
pub mod peers;
pub mod server;
pub mod state;

pub use anti_entropy::{AntiEntropy, AntiEntropyConfig, RoundReport, SyncError};
pub use config::Config;
pub use peers::{FederationNode, Peer, PeerRegistry, PeerStatus};
pub use state::{FederatedState, FederationError, FederationStats};
