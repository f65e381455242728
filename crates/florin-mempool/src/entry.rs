//! Mempool entries.

use florin_chain::{Amount, Transaction, TxId};
use std::collections::HashSet;
use std::sync::Arc;

/// One transaction in the pool, with cached package totals.
///
/// The `*_with_ancestors` fields aggregate over the entry and all of its
/// unconfirmed in-pool ancestors; they are maintained by the pool on
/// insertion and removal and drive the ancestor-feerate index.
#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub tx: Arc<Transaction>,
    pub txid: TxId,
    /// Actual fee paid.
    pub fee: Amount,
    /// Fee used for prioritization; equals `fee` unless adjusted.
    pub modified_fee: Amount,
    /// Virtual size in bytes.
    pub vsize: u64,
    /// Witness-scaled signature operation cost.
    pub sigop_cost: i64,
    /// Insertion order stamp.
    pub sequence: u64,
    /// In-pool parents (direct dependencies).
    pub parents: HashSet<TxId>,
    /// In-pool children (direct dependents).
    pub children: HashSet<TxId>,
    pub count_with_ancestors: u64,
    pub size_with_ancestors: u64,
    pub fees_with_ancestors: Amount,
    pub sigops_with_ancestors: i64,
}

impl MempoolEntry {
    pub fn new(tx: Arc<Transaction>, fee: Amount, sigop_cost: i64, sequence: u64) -> Self {
        let txid = tx.txid();
        let vsize = tx.vsize();
        Self {
            tx,
            txid,
            fee,
            modified_fee: fee,
            vsize,
            sigop_cost,
            sequence,
            parents: HashSet::new(),
            children: HashSet::new(),
            count_with_ancestors: 1,
            size_with_ancestors: vsize,
            fees_with_ancestors: fee,
            sigops_with_ancestors: sigop_cost,
        }
    }

    /// Weight of the transaction itself.
    pub fn weight(&self) -> u64 {
        self.tx.weight()
    }
}
