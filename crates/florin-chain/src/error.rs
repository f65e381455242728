//! Chain error types.

use thiserror::Error;

/// Errors from chain-level types.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Decoding a serialized structure failed.
    #[error("Decode error: {0}")]
    Decode(#[from] crate::encode::DecodeError),

    /// A money string could not be parsed.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// A hash string could not be parsed.
    #[error("Invalid hash: {0}")]
    InvalidHash(String),
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
