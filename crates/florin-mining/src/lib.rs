//! # florin-mining
//!
//! Block template assembly and the proof-of-stake miner.
//!
//! This crate provides:
//! - The block assembler: greedy ancestor-feerate package selection
//!   under weight and sigop budgets
//! - The package accounting overlay used during selection
//! - The block template handed to miners and the staking loop
//! - Extra-nonce and witness-commitment touch-up utilities
//! - The background staking loop and its lifecycle
//! - The `MiningContext` owning all cross-call miner state

mod assembler;
mod commitment;
mod context;
mod error;
mod overlay;
mod staker;
mod template;

pub use assembler::{update_time, BlockAssembler, Options};
pub use commitment::{increment_extra_nonce, regenerate_commitments};
pub use context::{MiningContext, TemplateCacheEntry};
pub use error::{MiningError, MiningResult};
pub use overlay::{ModifiedEntry, ModifiedTxSet};
pub use staker::{
    interruptible_sleep, next_readiness_step, process_block_found, ReadinessStep, Staker,
    StakerConfig, StakerPredicates, StakerState, WARN_BLOCK_CREATION, WARN_DISABLED, WARN_LOCKED,
    WARN_SYNCING,
};
pub use template::BlockTemplate;

/// Default cap on assembled block weight, leaving headroom under the
/// consensus limit.
pub const DEFAULT_BLOCK_MAX_WEIGHT: u64 = 3_996_000;

/// Default minimum package feerate for inclusion, in mites per kvB.
pub const DEFAULT_BLOCK_MIN_TX_FEE: florin_chain::Amount = 1_000;

/// Weight reserved for the coinbase transaction.
pub const COINBASE_WEIGHT_RESERVATION: u64 = 4_000;

/// Sigop cost reserved for the coinbase transaction.
pub const COINBASE_SIGOPS_RESERVATION: i64 = 400;

/// Budget rejections in a row before assembly of a nearly full block
/// gives up.
pub const MAX_CONSECUTIVE_FAILURES: u64 = 1_000;

/// Default nonce iterations for the generate RPCs.
pub const DEFAULT_MAX_TRIES: u64 = 1_000_000;

/// Staking on by default.
pub const DEFAULT_STAKE: bool = true;

/// Default base stake search timeout in milliseconds.
pub const DEFAULT_STAKETIMIO: u64 = 500;
