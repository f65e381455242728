//! Cross-call miner state.
//!
//! Everything the ancestor codebase kept in module-level statics lives
//! here instead: one explicit value owned by the node and shared by the
//! assembler, the staking loop and the RPC surface.

use crate::BlockTemplate;
use florin_chain::time::adjusted_time;
use florin_chain::BlockHash;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Extra-nonce continuity across calls building on the same parent.
#[derive(Debug, Default)]
pub(crate) struct ExtraNonceState {
    pub last_prev_hash: BlockHash,
}

/// Cached `getblocktemplate` result.
pub struct TemplateCacheEntry {
    pub prev_hash: BlockHash,
    pub transactions_updated: u64,
    pub created: Instant,
    pub template: Arc<BlockTemplate>,
}

/// Shared miner state owned by the node.
pub struct MiningContext {
    enable_staking: AtomicBool,
    last_coinstake_search_interval: AtomicI64,
    last_coinstake_search_time: AtomicI64,
    miner_warning: Mutex<String>,
    last_block_tx_count: Mutex<Option<u64>>,
    last_block_weight: Mutex<Option<u64>>,
    pub(crate) extra_nonce: Mutex<ExtraNonceState>,
    pub(crate) staker_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) staker_cancel: Mutex<CancellationToken>,
    template_cache: Mutex<Option<TemplateCacheEntry>>,
}

impl Default for MiningContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MiningContext {
    pub fn new() -> Self {
        Self {
            enable_staking: AtomicBool::new(false),
            last_coinstake_search_interval: AtomicI64::new(0),
            // Initialized once at startup; the first search only runs
            // after the masked clock advances past this.
            last_coinstake_search_time: AtomicI64::new(adjusted_time()),
            miner_warning: Mutex::new(String::new()),
            last_block_tx_count: Mutex::new(None),
            last_block_weight: Mutex::new(None),
            extra_nonce: Mutex::new(ExtraNonceState::default()),
            staker_task: Mutex::new(None),
            staker_cancel: Mutex::new(CancellationToken::new()),
            template_cache: Mutex::new(None),
        }
    }

    pub fn staking_enabled(&self) -> bool {
        self.enable_staking.load(Ordering::SeqCst)
    }

    pub fn set_staking_enabled(&self, enabled: bool) {
        self.enable_staking.store(enabled, Ordering::SeqCst);
    }

    pub fn last_coinstake_search_interval(&self) -> i64 {
        self.last_coinstake_search_interval.load(Ordering::SeqCst)
    }

    pub fn set_last_coinstake_search_interval(&self, interval: i64) {
        self.last_coinstake_search_interval
            .store(interval, Ordering::SeqCst);
    }

    pub fn last_coinstake_search_time(&self) -> i64 {
        self.last_coinstake_search_time.load(Ordering::SeqCst)
    }

    pub fn set_last_coinstake_search_time(&self, time: i64) {
        self.last_coinstake_search_time.store(time, Ordering::SeqCst);
    }

    /// The user-visible staking status message.
    pub fn miner_warning(&self) -> String {
        self.miner_warning.lock().clone()
    }

    /// Publish a staking status message for the UI layer.
    pub fn set_miner_warning(&self, warning: impl Into<String>) {
        *self.miner_warning.lock() = warning.into();
    }

    /// Record the shape of the last assembled block.
    pub fn set_last_block_stats(&self, tx_count: u64, weight: u64) {
        *self.last_block_tx_count.lock() = Some(tx_count);
        *self.last_block_weight.lock() = Some(weight);
    }

    pub fn last_block_tx_count(&self) -> Option<u64> {
        *self.last_block_tx_count.lock()
    }

    pub fn last_block_weight(&self) -> Option<u64> {
        *self.last_block_weight.lock()
    }

    /// Access the `getblocktemplate` cache slot.
    pub fn template_cache(&self) -> MutexGuard<'_, Option<TemplateCacheEntry>> {
        self.template_cache.lock()
    }
}
