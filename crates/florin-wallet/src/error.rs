//! Wallet error types.

use thiserror::Error;

/// Wallet errors.
#[derive(Error, Debug)]
pub enum WalletError {
    /// The keypool has no destinations left.
    #[error("Keypool ran out, please call keypoolrefill first")]
    KeypoolExhausted,

    /// The wallet is locked.
    #[error("Wallet is locked")]
    Locked,

    /// A script does not belong to this wallet.
    #[error("Script is not owned by this wallet")]
    NotOurs,
}

/// Result type for wallet operations.
pub type WalletResult<T> = Result<T, WalletError>;
