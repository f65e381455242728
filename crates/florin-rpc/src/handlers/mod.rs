//! RPC method handlers, grouped the way the method table groups them.

pub mod generating;
pub mod mining;
pub mod staking;

use crate::error::{RPC_CLIENT_IN_INITIAL_DOWNLOAD, RPC_CLIENT_NOT_CONNECTED};
use crate::{AppState, RpcError};

/// Shared connectivity gate: mainnet refuses template work while
/// disconnected or syncing.
pub(crate) fn ensure_connected(state: &AppState) -> Result<(), RpcError> {
    if state.chainstate.params().is_test_chain() {
        return Ok(());
    }
    if state.peer_count_now() == 0 {
        return Err(RpcError::new(
            RPC_CLIENT_NOT_CONNECTED,
            "Florin is not connected!",
        ));
    }
    if state.chainstate.is_initial_block_download() {
        return Err(RpcError::new(
            RPC_CLIENT_IN_INITIAL_DOWNLOAD,
            "Florin is in initial sync and waiting for blocks...",
        ));
    }
    Ok(())
}
