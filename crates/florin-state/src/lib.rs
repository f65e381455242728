//! # florin-state
//!
//! Chain state for the Florin node.
//!
//! This crate provides:
//! - The block index and active chain with median-time-past
//! - The in-memory UTXO view
//! - The chainstate manager: block acceptance, validity testing,
//!   witness commitments, best-block notifications
//! - One-shot block-checked listeners for submission reporting

mod chain;
mod coins;
mod error;
mod manager;
mod validation;

pub use chain::BlockIndex;
pub use coins::{Coin, CoinsView};
pub use error::{StateError, StateResult};
pub use manager::{BlockCheckedListener, BlockStatus, ChainstateManager};
pub use validation::{
    generate_coinbase_commitment, update_uncommitted_block_structures, witness_commitment_index,
    BlockValidationState, WITNESS_COMMITMENT_HEADER,
};
