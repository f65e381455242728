//! Block assembly.
//!
//! The selection algorithm orders the mempool by the feerate of each
//! transaction including its unconfirmed ancestors. Transactions are not
//! removed from the pool as they are selected, so the assembler keeps a
//! temporary overlay of residual package metrics for descendants of
//! already-selected transactions and, on every step, compares the best
//! overlay entry against the next pool entry.

use crate::{
    BlockTemplate, MiningContext, MiningError, MiningResult, ModifiedTxSet,
    COINBASE_SIGOPS_RESERVATION, COINBASE_WEIGHT_RESERVATION, DEFAULT_BLOCK_MAX_WEIGHT,
    DEFAULT_BLOCK_MIN_TX_FEE, MAX_CONSECUTIVE_FAILURES,
};
use florin_chain::time::adjusted_time;
use florin_chain::{
    Amount, Block, ChainParams, FeeRate, OutPoint, Script, Transaction, TxId, TxIn, TxOut,
    BLOCK_FLAG_PROOF_OF_STAKE, MAX_BLOCK_SIGOPS_COST, MAX_BLOCK_WEIGHT, OP_0,
    WITNESS_SCALE_FACTOR,
};
use florin_consensus::{
    compute_block_version, deployment_active_after, get_block_subsidy, get_next_target_required,
    Deployment,
};
use florin_mempool::{compare_ancestor_fee, Mempool, MempoolEntry, MempoolView};
use florin_state::{generate_coinbase_commitment, BlockIndex, ChainstateManager};
use florin_wallet::StakingWallet;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// Assembly options.
#[derive(Clone, Debug)]
pub struct Options {
    /// Packages below this feerate are not included.
    pub min_fee_rate: FeeRate,
    /// Weight cap for assembled blocks; clamped on construction.
    pub max_weight: u64,
    /// Version override, honored on regtest only.
    pub block_version: Option<i32>,
    /// Log per-transaction fee and txid on inclusion.
    pub print_priority: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            min_fee_rate: FeeRate::from_per_kvb(DEFAULT_BLOCK_MIN_TX_FEE),
            max_weight: DEFAULT_BLOCK_MAX_WEIGHT,
            block_version: None,
            print_priority: false,
        }
    }
}

/// Builds block templates from the chain tip and the mempool.
pub struct BlockAssembler {
    chainstate: Arc<ChainstateManager>,
    mempool: Arc<Mempool>,
    ctx: Arc<MiningContext>,
    params: ChainParams,
    options: Options,
    min_fee_rate: FeeRate,
    max_weight: u64,

    // Per-call selection state.
    in_block: HashSet<TxId>,
    failed: HashSet<TxId>,
    block_weight: u64,
    block_sigops: i64,
    block_tx_count: u64,
    fees_total: Amount,
    include_witness: bool,
    height: u32,
    locktime_cutoff: i64,
}

impl BlockAssembler {
    pub fn new(
        chainstate: Arc<ChainstateManager>,
        mempool: Arc<Mempool>,
        ctx: Arc<MiningContext>,
        options: Options,
    ) -> Self {
        let params = chainstate.params().clone();
        // Limit weight to between 4K and MAX_BLOCK_WEIGHT-4K for sanity.
        let max_weight = options
            .max_weight
            .clamp(COINBASE_WEIGHT_RESERVATION, MAX_BLOCK_WEIGHT - COINBASE_WEIGHT_RESERVATION);
        let min_fee_rate = options.min_fee_rate;
        Self {
            chainstate,
            mempool,
            ctx,
            params,
            options,
            min_fee_rate,
            max_weight,
            in_block: HashSet::new(),
            failed: HashSet::new(),
            block_weight: 0,
            block_sigops: 0,
            block_tx_count: 0,
            fees_total: 0,
            include_witness: false,
            height: 0,
            locktime_cutoff: 0,
        }
    }

    fn reset(&mut self) {
        self.in_block.clear();
        self.failed.clear();
        // Reserve space for the coinbase.
        self.block_weight = COINBASE_WEIGHT_RESERVATION;
        self.block_sigops = COINBASE_SIGOPS_RESERVATION;
        self.block_tx_count = 0;
        self.fees_total = 0;
        self.include_witness = false;
    }

    /// Assemble a new block template on top of the current tip.
    ///
    /// With a wallet, attempts a proof-of-stake template: a coinstake is
    /// searched at the current masked timestamp, and `None` is returned
    /// with `*pos_cancel = true` when no kernel was found. Without a
    /// wallet a proof-of-work template is built and checked against
    /// `test_block_validity`; a failure there is a hard error.
    pub fn create_new_block(
        &mut self,
        coinbase_script: Script,
        wallet: Option<&StakingWallet>,
        mut pos_cancel: Option<&mut bool>,
        fees_out: Option<&mut Amount>,
    ) -> MiningResult<Option<BlockTemplate>> {
        let started = Instant::now();
        self.reset();

        let mut template = BlockTemplate::new();
        let prev = self.chainstate.tip();
        let height = prev.height + 1;
        self.height = height;

        template.block.header.time = adjusted_time() as u32;

        let mut coinbase = Transaction {
            time: template.block.header.time,
            inputs: vec![TxIn::new(OutPoint::null())],
            outputs: vec![TxOut::default()],
            ..Default::default()
        };

        if wallet.is_none() {
            template.block.header.bits = get_next_target_required(prev.as_ref(), &self.params, false);
            coinbase.outputs[0] = TxOut::new(
                self.fees_total + get_block_subsidy(height, &self.params),
                coinbase_script,
            );
        }

        // Dummy coinbase as the first transaction; finalized at the end.
        template.block.transactions.push(Transaction::default());
        template.tx_fees.push(-1);
        template.tx_sigops.push(-1);

        if let Some(wallet) = wallet {
            // Flush orphaned coinstakes, then attempt a kernel search at
            // the masked wall clock, once per mask step.
            wallet.abandon_orphaned_coinstakes();
            if let Some(flag) = pos_cancel.as_mut() {
                **flag = true;
            }

            let pos_bits = get_next_target_required(prev.as_ref(), &self.params, true);
            template.block.header.bits = pos_bits;

            let mask = self.params.stake_timestamp_mask as i64;
            let search_time = adjusted_time() & !mask;
            let last_search_time = self.ctx.last_coinstake_search_time();

            let mut coinstake_found = None;
            if search_time > last_search_time {
                match wallet.create_coinstake(pos_bits, 1, search_time, self.fees_total) {
                    Ok(Some(coinstake)) => {
                        if coinstake.time as i64 >= prev.median_time_past() + 1 {
                            coinstake_found = Some(coinstake);
                        }
                    }
                    Ok(None) => {}
                    Err(err) => debug!(%err, "Coinstake creation failed"),
                }
                self.ctx
                    .set_last_coinstake_search_interval(search_time - last_search_time);
                self.ctx.set_last_coinstake_search_time(search_time);
            }

            match coinstake_found {
                Some(coinstake) => {
                    // Empty coinbase, header time pinned to the
                    // coinstake time, stake flag set.
                    coinbase.outputs[0].set_empty();
                    coinbase.time = coinstake.time;
                    template.block.header.time = coinstake.time;
                    template.block.header.flags |= BLOCK_FLAG_PROOF_OF_STAKE;
                    template.tx_fees.push(0);
                    template.tx_sigops.push(coinstake.sigop_cost());
                    template.block.transactions.push(coinstake);
                    if let Some(flag) = pos_cancel.as_mut() {
                        **flag = false;
                    }
                }
                // No point continuing without a coinstake.
                None => return Ok(None),
            }
        }

        template.block.header.version = compute_block_version(Some(prev.as_ref()), &self.params);
        if self.params.mine_blocks_on_demand() {
            if let Some(version) = self.options.block_version {
                template.block.header.version = version;
            }
        }

        let median_time_past = prev.median_time_past();
        self.locktime_cutoff = median_time_past;
        self.include_witness =
            deployment_active_after(Some(prev.as_ref()), &self.params, Deployment::Segwit);

        let mempool = Arc::clone(&self.mempool);
        let view = mempool.read();
        let (packages_selected, descendants_updated) = self.add_package_txs(&view, &mut template);
        drop(view);

        self.ctx
            .set_last_block_stats(self.block_tx_count, self.block_weight);

        // Finalize the coinbase.
        let mut script_sig = Script::new();
        script_sig.push_int(height as i64).push_opcode(OP_0);
        coinbase.inputs[0].script_sig = script_sig;
        template.block.transactions[0] = coinbase;
        if self.include_witness {
            template.coinbase_commitment =
                generate_coinbase_commitment(&mut template.block, Some(prev.as_ref()), &self.params);
        }
        template.tx_fees[0] = -self.fees_total;
        if let Some(out) = fees_out {
            *out = self.fees_total;
        }

        // Fill in the header. A proof-of-stake header keeps the
        // coinstake time; proof-of-work floors at MTP+1 and the latest
        // transaction time.
        template.block.header.prev_hash = prev.hash;
        if !template.block.is_proof_of_stake() {
            let floor = (median_time_past + 1).max(template.block.max_transaction_time());
            if (template.block.header.time as i64) < floor {
                template.block.header.time = floor as u32;
            }
            update_time(&mut template.block, &self.params, prev.as_ref());
        }
        template.block.header.nonce = 0;
        template.tx_sigops[0] = template.block.transactions[0].sigop_cost();
        template.block.header.merkle_root = template.block.merkle_root();

        if !template.block.is_proof_of_stake() {
            let state =
                self.chainstate
                    .test_block_validity(&template.block, prev.as_ref(), false, false)?;
            if !state.is_valid() {
                return Err(MiningError::BadTemplate(state.to_string()));
            }
        }

        debug!(
            weight = self.block_weight,
            txs = self.block_tx_count,
            fees = self.fees_total,
            sigops = self.block_sigops,
            packages_selected,
            descendants_updated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Assembled block template"
        );

        Ok(Some(template))
    }

    /// Whether a package still fits the weight and sigop budgets.
    fn test_package(&self, package_size: u64, package_sigops: i64) -> bool {
        if self.block_weight + WITNESS_SCALE_FACTOR * package_size >= self.max_weight {
            return false;
        }
        if self.block_sigops + package_sigops >= MAX_BLOCK_SIGOPS_COST {
            return false;
        }
        true
    }

    /// Per-transaction checks: finality at the next height, and no
    /// witness data before the deployment is active.
    fn test_package_transactions(&self, view: &MempoolView<'_>, package: &HashSet<TxId>) -> bool {
        for txid in package {
            let Some(entry) = view.entry(txid) else {
                return false;
            };
            if !entry.tx.is_final(self.height, self.locktime_cutoff) {
                return false;
            }
            if !self.include_witness && entry.tx.has_witness() {
                return false;
            }
        }
        true
    }

    fn add_to_block(&mut self, entry: &MempoolEntry, template: &mut BlockTemplate) {
        template.block.transactions.push((*entry.tx).clone());
        template.tx_fees.push(entry.fee);
        template.tx_sigops.push(entry.sigop_cost);
        self.block_weight += entry.weight();
        self.block_tx_count += 1;
        self.block_sigops += entry.sigop_cost;
        self.fees_total += entry.fee;
        self.in_block.insert(entry.txid);

        if self.options.print_priority {
            debug!(
                fee = %FeeRate::from_fee(entry.modified_fee, entry.vsize),
                txid = %entry.txid,
                "Package transaction added"
            );
        }
    }

    /// The greedy selection walk. Returns the number of packages
    /// selected and descendant updates performed.
    fn add_package_txs(
        &mut self,
        view: &MempoolView<'_>,
        template: &mut BlockTemplate,
    ) -> (usize, usize) {
        let mut overlay = ModifiedTxSet::new();
        let mut descendants_updated = overlay.seed(view, &self.in_block);
        let mut packages_selected = 0usize;
        let mut consecutive_failures = 0u64;

        let mut pool_iter = view.iter_by_ancestor_score().peekable();

        loop {
            // Skip pool entries already placed, already failed, or
            // shadowed by a residual overlay entry.
            while let Some(entry) = pool_iter.peek() {
                let txid = entry.txid;
                if self.in_block.contains(&txid)
                    || self.failed.contains(&txid)
                    || overlay.contains(&txid)
                {
                    pool_iter.next();
                } else {
                    break;
                }
            }

            let pool_candidate = pool_iter.peek().map(|entry| {
                (
                    entry.txid,
                    entry.fees_with_ancestors,
                    entry.size_with_ancestors,
                    entry.sigops_with_ancestors,
                )
            });
            let overlay_candidate = overlay.best().map(|entry| {
                (
                    entry.txid,
                    entry.fees_with_ancestors,
                    entry.size_with_ancestors,
                    entry.sigops_with_ancestors,
                )
            });

            let (txid, package_fees, package_size, package_sigops, using_modified) =
                match (pool_candidate, overlay_candidate) {
                    (None, None) => break,
                    (Some(pool), None) => {
                        pool_iter.next();
                        (pool.0, pool.1, pool.2, pool.3, false)
                    }
                    (None, Some(modified)) => {
                        (modified.0, modified.1, modified.2, modified.3, true)
                    }
                    (Some(pool), Some(modified)) => {
                        let overlay_wins =
                            match compare_ancestor_fee(modified.1, modified.2, pool.1, pool.2) {
                                Ordering::Greater => true,
                                Ordering::Equal => modified.0 < pool.0,
                                Ordering::Less => false,
                            };
                        if overlay_wins {
                            (modified.0, modified.1, modified.2, modified.3, true)
                        } else {
                            pool_iter.next();
                            (pool.0, pool.1, pool.2, pool.3, false)
                        }
                    }
                };

            debug_assert!(!self.in_block.contains(&txid));

            if package_fees < self.min_fee_rate.fee(package_size) {
                // Everything else we might consider has a lower feerate.
                break;
            }

            if !self.test_package(package_size, package_sigops) {
                if using_modified {
                    // The overlay always yields its best entry; failed
                    // entries must leave so the next best can surface.
                    overlay.erase(&txid);
                    self.failed.insert(txid);
                }

                consecutive_failures += 1;
                if consecutive_failures > MAX_CONSECUTIVE_FAILURES
                    && self.block_weight > self.max_weight - COINBASE_WEIGHT_RESERVATION
                {
                    // Close to full and nothing fits.
                    break;
                }
                continue;
            }

            let mut package = view.calculate_ancestors(&txid);
            package.retain(|ancestor| !self.in_block.contains(ancestor));
            package.insert(txid);

            if !self.test_package_transactions(view, &package) {
                if using_modified {
                    overlay.erase(&txid);
                    self.failed.insert(txid);
                }
                continue;
            }

            consecutive_failures = 0;

            // Parents before children: ancestor count gives a valid
            // topological order within the package.
            let mut sorted: Vec<&MempoolEntry> =
                package.iter().filter_map(|id| view.entry(id)).collect();
            sorted.sort_by(|a, b| {
                a.count_with_ancestors
                    .cmp(&b.count_with_ancestors)
                    .then_with(|| a.txid.cmp(&b.txid))
            });
            for entry in sorted {
                self.add_to_block(entry, template);
                overlay.erase(&entry.txid);
            }

            packages_selected += 1;
            trace!(package = %txid, size = package_size, fees = package_fees, "Package committed");

            descendants_updated += overlay.update_for_parent_inclusion(view, &package);
        }

        (packages_selected, descendants_updated)
    }
}

/// Raise the block time to the later of MTP+1 and the wall clock; on
/// chains that allow min-difficulty blocks this can change the required
/// target, so bits are recomputed. Returns the applied delta.
pub fn update_time(block: &mut Block, params: &ChainParams, prev: &BlockIndex) -> i64 {
    let old_time = block.header.time as i64;
    let new_time = (prev.median_time_past() + 1).max(adjusted_time());
    if old_time < new_time {
        block.header.time = new_time as u32;
    }

    if params.allow_min_difficulty_blocks {
        block.header.bits =
            get_next_target_required(prev, params, block.header.is_proof_of_stake());
    }

    new_time - old_time
}

#[cfg(test)]
mod tests {
    use super::*;
    use florin_chain::Network;

    fn regtest_rig() -> (Arc<ChainstateManager>, Arc<Mempool>, Arc<MiningContext>) {
        let chainstate = Arc::new(ChainstateManager::new(ChainParams::new(Network::Regtest)));
        (chainstate, Arc::new(Mempool::new()), Arc::new(MiningContext::new()))
    }

    fn anyone_can_spend() -> Script {
        let mut script = Script::new();
        script.push_opcode(florin_chain::OP_TRUE);
        script
    }

    #[test]
    fn test_empty_mempool_gives_coinbase_only() {
        let (chainstate, mempool, ctx) = regtest_rig();
        let mut assembler = BlockAssembler::new(
            Arc::clone(&chainstate),
            mempool,
            Arc::clone(&ctx),
            Options::default(),
        );

        let template = assembler
            .create_new_block(anyone_can_spend(), None, None, None)
            .unwrap()
            .expect("PoW template");

        assert_eq!(template.block.transactions.len(), 1);
        assert!(template.block.transactions[0].is_coinbase());
        assert_eq!(template.tx_fees[0], 0);
        assert_eq!(template.block.header.merkle_root, template.block.merkle_root());
        assert!(!template.block.is_proof_of_stake());
        // Last-block stats recorded for the info RPCs.
        assert_eq!(ctx.last_block_tx_count(), Some(0));
    }

    #[test]
    fn test_options_clamp_weight() {
        let (chainstate, mempool, ctx) = regtest_rig();
        let assembler = BlockAssembler::new(
            chainstate,
            mempool,
            ctx,
            Options {
                max_weight: 10,
                ..Default::default()
            },
        );
        assert_eq!(assembler.max_weight, COINBASE_WEIGHT_RESERVATION);

        let (chainstate, mempool, ctx) = regtest_rig();
        let assembler = BlockAssembler::new(
            chainstate,
            mempool,
            ctx,
            Options {
                max_weight: MAX_BLOCK_WEIGHT * 2,
                ..Default::default()
            },
        );
        assert_eq!(assembler.max_weight, MAX_BLOCK_WEIGHT - COINBASE_WEIGHT_RESERVATION);
    }

    #[test]
    fn test_pos_template_without_kernel_cancels() {
        let (chainstate, mempool, ctx) = regtest_rig();
        let wallet = StakingWallet::with_keys(Arc::clone(&chainstate), 4);
        // Allow the search window to open.
        ctx.set_last_coinstake_search_time(0);

        let mut assembler = BlockAssembler::new(
            Arc::clone(&chainstate),
            mempool,
            Arc::clone(&ctx),
            Options::default(),
        );
        let mut cancel = false;
        let template = assembler
            .create_new_block(Script::new(), Some(&wallet), Some(&mut cancel), None)
            .unwrap();

        // No mature coins, no kernel: template is withheld and the
        // cancel flag set for the caller's back-off path.
        assert!(template.is_none());
        assert!(cancel);
    }

    #[test]
    fn test_block_version_override_applies_on_regtest() {
        let (chainstate, mempool, ctx) = regtest_rig();
        let mut assembler = BlockAssembler::new(
            chainstate,
            mempool,
            ctx,
            Options {
                block_version: Some(7),
                ..Default::default()
            },
        );
        let template = assembler
            .create_new_block(anyone_can_spend(), None, None, None)
            .unwrap()
            .unwrap();
        assert_eq!(template.block.header.version, 7);
    }
}
