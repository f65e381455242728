//! # florin-wallet
//!
//! Staking wallet for the Florin node.
//!
//! This crate provides:
//! - An in-memory keystore with a reserve keypool
//! - Owned-coin scanning over the chainstate UTXO view
//! - Coinstake creation (the kernel search on the wallet side)
//! - Block signing for proof-of-stake blocks

mod error;
mod keystore;
mod wallet;

pub use error::{WalletError, WalletResult};
pub use keystore::{Destination, KeyStore};
pub use wallet::{OwnedCoin, StakingWallet};
