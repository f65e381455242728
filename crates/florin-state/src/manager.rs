//! The chainstate manager.
//!
//! Owns the block index, the active chain and the UTXO view. Blocks come
//! in through `process_new_block`, which validates, connects on top of
//! the current tip, fires block-checked listeners and publishes the new
//! best block on a watch channel.

use crate::{
    witness_commitment_index, BlockIndex, BlockValidationState, Coin, CoinsView, StateError,
    StateResult,
};
use florin_chain::time::adjusted_time;
use florin_chain::{
    Block, BlockHash, BlockHeader, ChainParams, OutPoint, MAX_BLOCK_SIGOPS_COST, MAX_BLOCK_WEIGHT,
};
use florin_consensus::{
    check_proof_of_stake, check_proof_of_work, compact_to_target, ConsensusError, StakeCoin,
};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How old the tip may be before the node considers itself in initial
/// block download.
const MAX_TIP_AGE_SECS: i64 = 24 * 60 * 60;

/// Validation status of an indexed block.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlockStatus {
    /// Header accepted; block data not validated against the chain.
    ValidHeader,
    /// Fully validated and connected at some point.
    ValidScripts,
    /// Failed validation.
    Failed,
}

/// One-shot listener capturing the validation outcome of a single block.
pub struct BlockCheckedListener {
    hash: BlockHash,
    state: Mutex<Option<BlockValidationState>>,
}

impl BlockCheckedListener {
    /// The captured outcome, if validation ran for the watched hash.
    pub fn result(&self) -> Option<BlockValidationState> {
        self.state.lock().clone()
    }
}

struct ChainstateInner {
    index: HashMap<BlockHash, Arc<BlockIndex>>,
    statuses: HashMap<BlockHash, BlockStatus>,
    chain: Vec<Arc<BlockIndex>>,
    coins: CoinsView,
}

type ConnectHook = Box<dyn Fn(&Block) + Send + Sync>;

/// Chain state: index, active chain, UTXO view, notifications.
pub struct ChainstateManager {
    params: ChainParams,
    inner: RwLock<ChainstateInner>,
    listeners: Mutex<Vec<Arc<BlockCheckedListener>>>,
    connect_hooks: Mutex<Vec<ConnectHook>>,
    best_block_tx: watch::Sender<BlockHash>,
}

impl ChainstateManager {
    /// Create a chainstate rooted at the network's genesis block.
    pub fn new(params: ChainParams) -> Self {
        let genesis = params.genesis_block();
        let genesis_index = Arc::new(BlockIndex::genesis(&genesis.header));
        let genesis_hash = genesis_index.hash;

        let mut index = HashMap::new();
        index.insert(genesis_hash, Arc::clone(&genesis_index));
        let mut statuses = HashMap::new();
        statuses.insert(genesis_hash, BlockStatus::ValidScripts);

        let mut coins = CoinsView::new();
        for tx in &genesis.transactions {
            coins.apply_transaction(tx, 0);
        }

        let (best_block_tx, _) = watch::channel(genesis_hash);

        info!(network = params.network.id(), genesis = %genesis_hash, "Chainstate initialized");

        Self {
            params,
            inner: RwLock::new(ChainstateInner {
                index,
                statuses,
                chain: vec![genesis_index],
                coins,
            }),
            listeners: Mutex::new(Vec::new()),
            connect_hooks: Mutex::new(Vec::new()),
            best_block_tx,
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// The current chain tip.
    pub fn tip(&self) -> Arc<BlockIndex> {
        let inner = self.inner.read();
        Arc::clone(inner.chain.last().expect("chain never empty"))
    }

    pub fn height(&self) -> u32 {
        self.tip().height
    }

    pub fn best_hash(&self) -> BlockHash {
        self.tip().hash
    }

    /// The active-chain entry at a height, if within the chain.
    pub fn chain_at(&self, height: u32) -> Option<Arc<BlockIndex>> {
        let inner = self.inner.read();
        inner.chain.get(height as usize).cloned()
    }

    pub fn lookup_block_index(&self, hash: &BlockHash) -> Option<Arc<BlockIndex>> {
        self.inner.read().index.get(hash).cloned()
    }

    pub fn block_status(&self, hash: &BlockHash) -> Option<BlockStatus> {
        self.inner.read().statuses.get(hash).copied()
    }

    /// Read access to the UTXO view at the tip.
    pub fn coins_tip(&self) -> parking_lot::MappedRwLockReadGuard<'_, CoinsView> {
        RwLockReadGuard::map(self.inner.read(), |inner| &inner.coins)
    }

    /// Subscribe to best-block changes.
    pub fn subscribe_best_block(&self) -> watch::Receiver<BlockHash> {
        self.best_block_tx.subscribe()
    }

    /// Register a callback invoked with every connected block.
    pub fn on_block_connected(&self, hook: impl Fn(&Block) + Send + Sync + 'static) {
        self.connect_hooks.lock().push(Box::new(hook));
    }

    /// Register a one-shot listener for the validation outcome of `hash`.
    pub fn register_block_checked(&self, hash: BlockHash) -> Arc<BlockCheckedListener> {
        let listener = Arc::new(BlockCheckedListener {
            hash,
            state: Mutex::new(None),
        });
        self.listeners.lock().push(Arc::clone(&listener));
        listener
    }

    /// Remove a previously registered listener.
    pub fn unregister_block_checked(&self, listener: &Arc<BlockCheckedListener>) {
        self.listeners
            .lock()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn fire_block_checked(&self, hash: &BlockHash, state: &BlockValidationState) {
        for listener in self.listeners.lock().iter() {
            if listener.hash == *hash {
                *listener.state.lock() = Some(state.clone());
            }
        }
    }

    /// Whether the node is still syncing. Test chains are never in IBD.
    pub fn is_initial_block_download(&self) -> bool {
        if self.params.is_test_chain() || self.params.mine_blocks_on_demand() {
            return false;
        }
        self.tip().time < adjusted_time() - MAX_TIP_AGE_SECS
    }

    /// Rough fraction of the expected chain this node has verified.
    pub fn verification_progress(&self) -> f64 {
        if !self.is_initial_block_download() {
            return 1.0;
        }
        let inner = self.inner.read();
        let genesis_time = inner.chain[0].time;
        let tip_height = inner.chain.len() as i64 - 1;
        drop(inner);

        let elapsed = (adjusted_time() - genesis_time).max(1);
        let expected = elapsed / self.params.target_spacing.max(1);
        if expected <= 0 {
            return 1.0;
        }
        (tip_height as f64 / expected as f64).min(1.0)
    }

    /// Validate and accept a block, connecting it when it extends the
    /// current tip. Returns whether the block was accepted.
    pub fn process_new_block(&self, block: &Block, _force: bool) -> bool {
        let hash = block.hash();
        let mut inner = self.inner.write();

        if let Some(BlockStatus::ValidScripts) = inner.statuses.get(&hash) {
            debug!(block = %hash, "Duplicate block");
            return true;
        }

        let prev = match inner.index.get(&block.header.prev_hash) {
            Some(prev) => Arc::clone(prev),
            None => {
                let state = BlockValidationState::invalid("prev-blk-not-found");
                drop(inner);
                self.fire_block_checked(&hash, &state);
                warn!(block = %hash, "Rejected block with unknown parent");
                return false;
            }
        };

        let is_tip = prev.hash == inner.chain.last().expect("chain never empty").hash;
        if !is_tip {
            // A stale or side-chain block: keep the header, do not
            // connect. Listeners only fire for blocks that reach full
            // validation.
            let index = Arc::new(BlockIndex::from_header(&block.header, prev));
            inner.statuses.insert(hash, BlockStatus::ValidHeader);
            inner.index.insert(hash, index);
            debug!(block = %hash, "Stored side-chain block header");
            return true;
        }

        let check_pow = !block.is_proof_of_stake();
        let state = self.check_block(block, &prev, &inner.coins, check_pow, true);
        if !state.is_valid() {
            inner.statuses.insert(hash, BlockStatus::Failed);
            let index = Arc::new(BlockIndex::from_header(&block.header, prev));
            inner.index.insert(hash, index);
            drop(inner);
            self.fire_block_checked(&hash, &state);
            warn!(block = %hash, %state, "Block failed validation");
            return false;
        }

        let index = Arc::new(BlockIndex::from_header(&block.header, prev));
        let height = index.height;
        for tx in &block.transactions {
            inner.coins.apply_transaction(tx, height);
        }
        inner.statuses.insert(hash, BlockStatus::ValidScripts);
        inner.index.insert(hash, Arc::clone(&index));
        inner.chain.push(index);
        drop(inner);

        self.fire_block_checked(&hash, &state);
        for hook in self.connect_hooks.lock().iter() {
            hook(block);
        }
        let _ = self.best_block_tx.send(hash);

        info!(block = %hash, height, pos = block.is_proof_of_stake(), "New best block");
        true
    }

    /// Accept a batch of headers as candidate chain tips.
    pub fn process_new_block_headers(&self, headers: &[BlockHeader]) -> StateResult<()> {
        let mut inner = self.inner.write();
        for header in headers {
            let hash = header.hash();
            if inner.index.contains_key(&hash) {
                continue;
            }
            let prev = match inner.index.get(&header.prev_hash) {
                Some(prev) => Arc::clone(prev),
                None => return Err(StateError::UnknownPrev(header.prev_hash.to_string())),
            };
            if !header.is_proof_of_stake() {
                compact_to_target(header.bits)
                    .ok_or(ConsensusError::InvalidCompactTarget(header.bits))?;
                if !check_proof_of_work(&hash, header.bits, &self.params) {
                    return Err(StateError::ValidationFailed("high-hash".to_string()));
                }
            }
            let index = Arc::new(BlockIndex::from_header(header, prev));
            inner.statuses.insert(hash, BlockStatus::ValidHeader);
            inner.index.insert(hash, index);
        }
        Ok(())
    }

    /// Dry-run validation of a block built on `prev`, without connecting.
    ///
    /// `prev` must be the current tip.
    pub fn test_block_validity(
        &self,
        block: &Block,
        prev: &BlockIndex,
        check_pow: bool,
        check_merkle: bool,
    ) -> StateResult<BlockValidationState> {
        let inner = self.inner.read();
        let tip_hash = inner.chain.last().expect("chain never empty").hash;
        if prev.hash != tip_hash {
            return Err(StateError::NotTip(prev.hash.to_string()));
        }
        Ok(self.check_block(block, prev, &inner.coins, check_pow, check_merkle))
    }

    /// Consensus checks for a block extending `prev` against `coins`.
    fn check_block(
        &self,
        block: &Block,
        prev: &BlockIndex,
        coins: &CoinsView,
        check_pow: bool,
        check_merkle: bool,
    ) -> BlockValidationState {
        let params = &self.params;
        let height = prev.height + 1;
        let mtp = prev.median_time_past();

        if block.transactions.is_empty() || !block.transactions[0].is_coinbase() {
            return BlockValidationState::invalid("bad-cb-missing");
        }
        if block.transactions.iter().skip(1).any(|tx| tx.is_coinbase()) {
            return BlockValidationState::invalid("bad-cb-multiple");
        }

        if check_merkle && block.merkle_root() != block.header.merkle_root {
            return BlockValidationState::invalid("bad-txnmrklroot");
        }

        if block.weight() > MAX_BLOCK_WEIGHT {
            return BlockValidationState::invalid("bad-blk-weight");
        }
        let sigops: i64 = block.transactions.iter().map(|tx| tx.sigop_cost()).sum();
        if sigops > MAX_BLOCK_SIGOPS_COST {
            return BlockValidationState::invalid("bad-blk-sigops");
        }

        if (block.header.time as i64) <= mtp {
            return BlockValidationState::invalid("time-too-old");
        }

        if block.is_proof_of_stake() {
            if !block.header.is_proof_of_stake() {
                return BlockValidationState::invalid("bad-pos-flag");
            }
            let coinstake = &block.transactions[1];
            if block.header.time != coinstake.time {
                return BlockValidationState::invalid("bad-cs-time");
            }
            if block.transactions[0].outputs.iter().any(|o| o.value != 0) {
                return BlockValidationState::invalid("bad-cb-not-empty");
            }
            if block.signature.is_empty() {
                return BlockValidationState::invalid("bad-blk-signature");
            }
            let lookup = |outpoint: &OutPoint| coins.get(outpoint).map(coin_to_stake);
            if let Err(err) = check_proof_of_stake(
                prev,
                coinstake,
                block.header.bits,
                coinstake.time as i64,
                lookup,
                params,
            ) {
                return BlockValidationState::invalid(format!("bad-cs-kernel: {err}"));
            }
        } else if check_pow && !check_proof_of_work(&block.hash(), block.header.bits, params) {
            return BlockValidationState::invalid("high-hash");
        }

        // Finality and input availability over the in-block view.
        let mut created: HashMap<OutPoint, ()> = HashMap::new();
        for (i, tx) in block.transactions.iter().enumerate() {
            if !tx.is_final(height, mtp) {
                return BlockValidationState::invalid("bad-txns-nonfinal");
            }
            if i > 0 {
                for input in &tx.inputs {
                    if !coins.contains(&input.prevout) && !created.contains_key(&input.prevout) {
                        return BlockValidationState::invalid("bad-txns-inputs-missingorspent");
                    }
                }
            }
            let txid = tx.txid();
            for vout in 0..tx.outputs.len() {
                created.insert(OutPoint::new(txid, vout as u32), ());
            }
        }

        // A committed witness must still be backed by the coinbase nonce.
        if witness_commitment_index(block).is_some()
            && block.transactions[0].inputs[0].witness.is_empty()
        {
            return BlockValidationState::invalid("bad-witness-nonce-size");
        }

        BlockValidationState::valid()
    }
}

fn coin_to_stake(coin: &Coin) -> StakeCoin {
    StakeCoin {
        value: coin.output.value,
        time: coin.time,
        height: coin.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use florin_chain::{Network, Script, Transaction, TxIn, TxOut};

    fn regtest_manager() -> ChainstateManager {
        ChainstateManager::new(ChainParams::new(Network::Regtest))
    }

    fn build_pow_block(manager: &ChainstateManager, time_offset: i64) -> Block {
        let tip = manager.tip();
        let params = manager.params();
        let height = tip.height + 1;

        let mut input = TxIn::new(OutPoint::null());
        input.script_sig.push_int(height as i64);
        let mut script_pubkey = Script::new();
        script_pubkey.push_opcode(florin_chain::OP_TRUE);
        let coinbase = Transaction {
            time: (tip.median_time_past() + 1 + time_offset) as u32,
            inputs: vec![input],
            outputs: vec![TxOut::new(50, script_pubkey)],
            ..Default::default()
        };

        let mut block = Block {
            transactions: vec![coinbase],
            ..Default::default()
        };
        block.header.prev_hash = tip.hash;
        block.header.time = (tip.median_time_past() + 1 + time_offset) as u32;
        block.header.bits = params.pow_limit_bits;
        block.header.merkle_root = block.merkle_root();
        while !check_proof_of_work(&block.hash(), block.header.bits, params) {
            block.header.nonce += 1;
        }
        block
    }

    #[test]
    fn test_connect_pow_block() {
        let manager = regtest_manager();
        let block = build_pow_block(&manager, 10);
        assert!(manager.process_new_block(&block, true));
        assert_eq!(manager.height(), 1);
        assert_eq!(manager.best_hash(), block.hash());
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let manager = regtest_manager();
        let mut block = build_pow_block(&manager, 10);
        block.header.prev_hash = BlockHash([9; 32]);
        block.header.merkle_root = block.merkle_root();
        assert!(!manager.process_new_block(&block, true));
        assert_eq!(manager.height(), 0);
    }

    #[test]
    fn test_bad_merkle_rejected_and_listener_fires() {
        let manager = regtest_manager();
        let mut block = build_pow_block(&manager, 10);
        block.header.merkle_root = [1; 32];

        let listener = manager.register_block_checked(block.hash());
        assert!(!manager.process_new_block(&block, true));
        let state = listener.result().expect("listener fired");
        assert!(state.is_invalid());
        manager.unregister_block_checked(&listener);
    }

    #[test]
    fn test_best_block_watch_fires() {
        let manager = regtest_manager();
        let rx = manager.subscribe_best_block();
        let block = build_pow_block(&manager, 10);
        assert!(manager.process_new_block(&block, true));
        assert_eq!(*rx.borrow(), block.hash());
    }

    #[test]
    fn test_stale_block_keeps_tip() {
        let manager = regtest_manager();
        let first = build_pow_block(&manager, 10);
        assert!(manager.process_new_block(&first, true));

        // A second block on the genesis parent is stale now.
        let mut stale = build_pow_block(&manager, 20);
        stale.header.prev_hash = manager.chain_at(0).unwrap().hash;
        stale.header.merkle_root = stale.merkle_root();
        assert!(manager.process_new_block(&stale, true));
        assert_eq!(manager.best_hash(), first.hash());
        assert_eq!(
            manager.block_status(&stale.hash()),
            Some(BlockStatus::ValidHeader)
        );
    }

    #[test]
    fn test_test_block_validity_requires_tip_parent() {
        let manager = regtest_manager();
        let block = build_pow_block(&manager, 10);
        let genesis = manager.tip();
        assert!(manager
            .test_block_validity(&block, &genesis, false, true)
            .unwrap()
            .is_valid());

        assert!(manager.process_new_block(&block, true));
        let result = manager.test_block_validity(&block, &genesis, false, true);
        assert!(matches!(result, Err(StateError::NotTip(_))));
    }

    #[test]
    fn test_headers_accepted() {
        let manager = regtest_manager();
        let block = build_pow_block(&manager, 10);
        assert!(manager.process_new_block_headers(&[block.header]).is_ok());
        assert!(manager.lookup_block_index(&block.hash()).is_some());
        // Header-only acceptance does not move the tip.
        assert_eq!(manager.height(), 0);
    }

    #[test]
    fn test_headers_with_unknown_parent_rejected() {
        let manager = regtest_manager();
        let mut header = build_pow_block(&manager, 10).header;
        header.prev_hash = BlockHash([9; 32]);
        let result = manager.process_new_block_headers(&[header]);
        assert!(matches!(result, Err(StateError::UnknownPrev(_))));
    }
}
