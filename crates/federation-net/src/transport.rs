//! Transport traits and errors

use federation_core::{SyncAck, SyncMessage};
use std::future::Future;
use thiserror::Error;

/// Transport errors. Every variant counts as a failed sync attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Peer answered with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid acknowledgment: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Peer unreachable: {0}")]
    Unreachable(String),
    #[error("Peer rejected message: {0}")]
    Rejected(String),
}

/// Outbound delivery of a sync message to a peer address.
///
/// Implementations should bound their own latency; the engine applies a
/// timeout on top.
pub trait SyncTransport: Send + Sync + 'static {
    fn send(
        &self,
        address: &str,
        message: SyncMessage,
    ) -> impl Future<Output = Result<SyncAck, TransportError>> + Send;
}

/// Receiving side of a sync exchange
pub trait SyncHandler: Send + Sync {
    /// Apply an inbound message; the error string is reported to the sender
    fn handle(&self, message: SyncMessage) -> Result<SyncAck, String>;
}
