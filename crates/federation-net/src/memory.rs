//! In-process transport connecting handlers by address

use crate::transport::{SyncHandler, SyncTransport, TransportError};
use federation_core::{SyncAck, SyncMessage};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Endpoint {
    handler: Arc<dyn SyncHandler>,
    down: bool,
    delay: Duration,
}

/// Routes messages to registered handlers without a network.
///
/// Messages pass through JSON on the way, so the wire encoding is exercised
/// exactly as with HTTP. Endpoints can be taken down or slowed to simulate
/// partitions and unresponsive peers.
#[derive(Default)]
pub struct MemoryTransport {
    endpoints: RwLock<HashMap<String, Endpoint>>,
    delivered: AtomicU64,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: impl Into<String>, handler: Arc<dyn SyncHandler>) {
        self.endpoints.write().insert(
            address.into(),
            Endpoint {
                handler,
                down: false,
                delay: Duration::ZERO,
            },
        );
    }

    /// Make an address refuse (or accept again) every message
    pub fn set_down(&self, address: &str, down: bool) {
        if let Some(endpoint) = self.endpoints.write().get_mut(address) {
            endpoint.down = down;
        }
    }

    /// Delay delivery to an address
    pub fn set_delay(&self, address: &str, delay: Duration) {
        if let Some(endpoint) = self.endpoints.write().get_mut(address) {
            endpoint.delay = delay;
        }
    }

    /// Messages handed to a handler so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl SyncTransport for MemoryTransport {
    async fn send(&self, address: &str, message: SyncMessage) -> Result<SyncAck, TransportError> {
        let (handler, delay) = {
            let endpoints = self.endpoints.read();
            match endpoints.get(address) {
                Some(endpoint) if !endpoint.down => (endpoint.handler.clone(), endpoint.delay),
                _ => return Err(TransportError::Unreachable(address.to_string())),
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let wire = serde_json::to_vec(&message)?;
        let message: SyncMessage = serde_json::from_slice(&wire)?;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        let ack = handler.handle(message).map_err(TransportError::Rejected)?;

        let wire = serde_json::to_vec(&ack)?;
        Ok(serde_json::from_slice(&wire)?)
    }
}
