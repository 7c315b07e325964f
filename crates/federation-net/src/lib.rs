//! Transport layer for swarm federation
//!
//! This crate provides:
//! - The [`SyncTransport`] seam used by the anti-entropy engine
//! - An HTTP/JSON transport posting to `/federation/sync`
//! - An in-memory transport for simulations and tests

pub mod http;
pub mod memory;
pub mod transport;

pub use http::HttpTransport;
pub use memory::MemoryTransport;
pub use transport::{SyncHandler, SyncTransport, TransportError};
