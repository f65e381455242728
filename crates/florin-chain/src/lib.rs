//! # florin-chain
//!
//! Core chain types for the Florin blockchain.
//!
//! This crate provides:
//! - Hash newtypes (double-SHA256 block hashes and transaction ids)
//! - Amounts, money formatting and fee rates
//! - Minimal script handling for coinbase construction
//! - Transaction and block structures with weight and sigop accounting
//! - Chain parameters for mainnet, testnet and regtest
//! - The embedded fixed seed table

mod amount;
mod block;
mod encode;
mod error;
mod feerate;
mod hash;
mod params;
mod script;
mod seeds;
pub mod time;
mod transaction;

pub use amount::{format_money, parse_money, Amount, COIN, MAX_MONEY};
pub use block::{Block, BlockHeader, BLOCK_FLAG_PROOF_OF_STAKE};
pub use encode::{ByteReader, DecodeError};
pub use error::{ChainError, ChainResult};
pub use feerate::FeeRate;
pub use hash::{merkle_root_from_hashes, sha256d, BlockHash, TxId};
pub use params::{ChainParams, Network};
pub use script::{Script, OP_0, OP_CHECKMULTISIG, OP_CHECKSIG, OP_RETURN, OP_TRUE};
pub use seeds::{decode_seeds, CHAINPARAMS_SEED_MAIN, CHAINPARAMS_SEED_TEST};
pub use transaction::{OutPoint, Transaction, TxIn, TxOut, SEQUENCE_FINAL};

/// Maximum allowed block weight under the segwit accounting rule.
pub const MAX_BLOCK_WEIGHT: u64 = 4_000_000;

/// Maximum serialized block size in bytes.
pub const MAX_BLOCK_SERIALIZED_SIZE: u64 = 4_000_000;

/// Maximum witness-scaled signature operation cost per block.
pub const MAX_BLOCK_SIGOPS_COST: i64 = 80_000;

/// Scale factor between virtual size and weight.
pub const WITNESS_SCALE_FACTOR: u64 = 4;

/// Locktime values below this threshold are block heights, above it unix times.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;
