//! Mining error types.

use thiserror::Error;

/// Mining errors.
#[derive(Error, Debug)]
pub enum MiningError {
    /// An assembled proof-of-work template failed the validity dry run.
    /// This is an assembler bug, not a recoverable condition.
    #[error("TestBlockValidity failed: {0}")]
    BadTemplate(String),

    /// State error.
    #[error("State error: {0}")]
    State(#[from] florin_state::StateError),

    /// Wallet error.
    #[error("Wallet error: {0}")]
    Wallet(#[from] florin_wallet::WalletError),
}

/// Result type for mining operations.
pub type MiningResult<T> = Result<T, MiningError>;
