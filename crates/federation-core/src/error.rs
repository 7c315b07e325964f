//! Error types for federation core

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Federation core error types
#[derive(Debug, Error)]
pub enum Error {
    /// Snapshot or payload (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A message carried a payload that does not match its type
    #[error("unexpected payload: expected {expected}, got {actual}")]
    UnexpectedPayload {
        expected: &'static str,
        actual: &'static str,
    },
}
