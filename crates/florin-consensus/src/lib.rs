//! # florin-consensus
//!
//! Consensus checks for the Florin blockchain.
//!
//! This crate provides:
//! - Compact difficulty encoding and proof-of-work verification
//! - The per-proof-type continuous difficulty retarget
//! - Proof-of-stake kernel verification
//! - Block subsidy schedule
//! - Soft-fork deployment state and block version computation

mod deployments;
mod difficulty;
mod error;
mod kernel;
mod subsidy;

pub use deployments::{compute_block_version, deployment_active_after, Deployment};
pub use difficulty::{
    check_proof_of_work, compact_to_target, difficulty_from_bits, get_next_target_required,
    target_to_compact,
};
pub use error::{ConsensusError, ConsensusResult};
pub use kernel::{check_kernel, check_proof_of_stake, stake_kernel_hash, StakeCoin};
pub use subsidy::get_block_subsidy;

/// Interface the difficulty and kernel checks use to look at prior
/// headers.
///
/// Implemented by the chainstate's block index; kept minimal so the
/// consensus crate does not depend on the state crate.
pub trait HeaderView {
    fn height(&self) -> u32;
    fn time(&self) -> i64;
    fn bits(&self) -> u32;
    fn hash(&self) -> florin_chain::BlockHash;
    fn is_proof_of_stake(&self) -> bool;
    fn prev(&self) -> Option<&Self>;
}
