//! State error types.

use thiserror::Error;

/// State errors.
#[derive(Error, Debug)]
pub enum StateError {
    /// The referenced previous block is unknown.
    #[error("Unknown previous block: {0}")]
    UnknownPrev(String),

    /// Validity was tested against a parent that is not the tip.
    #[error("Validity can only be tested against the current tip, not {0}")]
    NotTip(String),

    /// A header or block failed validation outright.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Consensus error.
    #[error("Consensus error: {0}")]
    Consensus(#[from] florin_consensus::ConsensusError),
}

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;
