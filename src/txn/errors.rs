//! # Transaction Errors
//!
//! Only failures that end a coordinator operation live here. Watch conflicts,
//! validation faults and per-command faults are outcomes, not errors.

use thiserror::Error;

use super::watch::SessionState;
use crate::store::StoreError;

/// Result type for coordinator operations
pub type TxnResult<T> = Result<T, TxnError>;

#[derive(Debug, Clone, Error)]
pub enum TxnError {
    /// The store could not be reached or answered nonsense
    #[error("{0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Watch session requires at least one key")]
    EmptyWatchSet,

    #[error("Watch session {session} is {actual}, expected {expected}")]
    InvalidSessionState {
        session: String,
        actual: SessionState,
        expected: SessionState,
    },

    #[error("Batch was already submitted")]
    BatchAlreadySubmitted,
}

impl TxnError {
    pub fn code(&self) -> &'static str {
        match self {
            TxnError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            TxnError::EmptyWatchSet => "EMPTY_WATCH_SET",
            TxnError::InvalidSessionState { .. } => "INVALID_SESSION_STATE",
            TxnError::BatchAlreadySubmitted => "BATCH_ALREADY_SUBMITTED",
        }
    }

    /// HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            TxnError::StoreUnavailable(StoreError::Timeout(_)) => 504,
            TxnError::StoreUnavailable(_) => 500,
            TxnError::EmptyWatchSet => 400,
            TxnError::InvalidSessionState { .. } | TxnError::BatchAlreadySubmitted => 409,
        }
    }
}
