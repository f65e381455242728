//! Mempool error types.

use thiserror::Error;

/// Mempool errors.
#[derive(Error, Debug)]
pub enum MempoolError {
    /// Transaction already present.
    #[error("Transaction already in mempool: {0}")]
    AlreadyExists(String),

    /// Transaction not found.
    #[error("Transaction not in mempool: {0}")]
    NotFound(String),

    /// An input is already spent by another mempool transaction.
    #[error("Conflicting spend of {0}")]
    Conflict(String),
}

/// Result type for mempool operations.
pub type MempoolResult<T> = Result<T, MempoolError>;
