//! # florin-rpc
//!
//! JSON-RPC surface for the Florin node.
//!
//! A single axum POST endpoint dispatches the mining, generating and
//! staking method families: `getblocktemplate` (with BIP22 long-poll
//! and proposal mode), `submitblock`, `submitheader`, the regtest
//! generate calls, the info snapshots, `staking` and `checkkernel`.

pub mod error;
pub mod handlers;
mod server;
mod state;

pub use error::{RpcError, RpcResult};
pub use server::{build_router, dispatch, serve};
pub use state::AppState;
