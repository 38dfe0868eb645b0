//! # Store Errors
//!
//! Failures of the store call itself. Per-command faults and batch aborts are
//! not errors at this level; they travel inside `ExecReply`.

use std::io;

use thiserror::Error;

/// Result type for store calls
pub type StoreResult<T> = Result<T, StoreError>;

/// Store call errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Connection refused, reset or closed mid-call
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Dial, read or write deadline exceeded
    #[error("Store call timed out after {0}ms")]
    Timeout(u64),

    /// The store answered with something the client cannot interpret
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A single-command call was rejected by the store (e.g. WRONGTYPE on GET)
    #[error("{0}")]
    Rejected(String),
}

impl StoreError {
    /// Error code for logs and API responses
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "STORE_UNAVAILABLE",
            StoreError::Timeout(_) => "STORE_TIMEOUT",
            StoreError::Protocol(_) => "STORE_PROTOCOL_ERROR",
            StoreError::Rejected(_) => "STORE_REJECTED",
        }
    }

    /// Whether the connection that produced this error must be discarded
    pub fn poisons_connection(&self) -> bool {
        !matches!(self, StoreError::Rejected(_))
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}
