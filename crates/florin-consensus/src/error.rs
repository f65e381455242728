//! Consensus error types.

use thiserror::Error;

/// Consensus errors.
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// A compact bits value does not encode a valid target.
    #[error("Invalid compact target: {0:#010x}")]
    InvalidCompactTarget(u32),

    /// A referenced previous output is missing from the UTXO view.
    #[error("Stake kernel input not found: {0}")]
    KernelInputMissing(String),

    /// The kernel input is not mature enough to stake.
    #[error("Stake kernel input immature: depth {depth}, required {required}")]
    KernelImmature { depth: u32, required: u32 },

    /// The kernel hash does not meet the weighted target.
    #[error("Stake kernel hash does not meet target")]
    KernelTargetNotMet,

    /// A coinstake timestamp violates the protocol rules.
    #[error("Invalid coinstake time: {0}")]
    InvalidCoinstakeTime(i64),

    /// Structural problem with a coinstake transaction.
    #[error("Malformed coinstake: {0}")]
    MalformedCoinstake(String),
}

/// Result type for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
