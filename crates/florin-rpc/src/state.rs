//! Shared RPC handler state.

use florin_mempool::Mempool;
use florin_mining::{MiningContext, Options, Staker};
use florin_state::ChainstateManager;
use florin_wallet::StakingWallet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Everything the RPC handlers reach for.
#[derive(Clone)]
pub struct AppState {
    pub chainstate: Arc<ChainstateManager>,
    pub mempool: Arc<Mempool>,
    pub wallet: Option<Arc<StakingWallet>>,
    pub staker: Option<Arc<Staker>>,
    pub mining_ctx: Arc<MiningContext>,
    pub assembler_options: Options,
    /// Connected peer count, maintained by the network layer.
    pub peer_count: Arc<AtomicUsize>,
    /// Cleared when the server begins shutting down; long-poll waits
    /// fail fast on it.
    pub rpc_running: Arc<AtomicBool>,
}

impl AppState {
    pub fn rpc_running(&self) -> bool {
        self.rpc_running.load(Ordering::SeqCst)
    }

    pub fn peer_count_now(&self) -> usize {
        self.peer_count.load(Ordering::Relaxed)
    }
}
