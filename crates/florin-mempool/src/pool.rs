//! Transaction pool implementation.

use crate::{AncestorScoreKey, MempoolEntry, MempoolError, MempoolResult};
use florin_chain::{Amount, Block, OutPoint, Transaction, TxId};
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

struct PoolInner {
    entries: HashMap<TxId, MempoolEntry>,
    by_ancestor_score: BTreeSet<AncestorScoreKey>,
    spends: HashMap<OutPoint, TxId>,
}

impl PoolInner {
    fn score_key(entry: &MempoolEntry) -> AncestorScoreKey {
        AncestorScoreKey::new(
            entry.fees_with_ancestors,
            entry.size_with_ancestors,
            entry.txid,
        )
    }

    /// All in-pool ancestors of `txid`, excluding the entry itself.
    fn calculate_ancestors(&self, txid: &TxId) -> HashSet<TxId> {
        let mut out = HashSet::new();
        let mut queue: VecDeque<TxId> = match self.entries.get(txid) {
            Some(entry) => entry.parents.iter().copied().collect(),
            None => return out,
        };
        while let Some(parent) = queue.pop_front() {
            if !out.insert(parent) {
                continue;
            }
            if let Some(entry) = self.entries.get(&parent) {
                queue.extend(entry.parents.iter().copied());
            }
        }
        out
    }

    /// All in-pool descendants of `txid`, including the entry itself.
    fn calculate_descendants(&self, txid: &TxId) -> HashSet<TxId> {
        let mut out = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(*txid);
        while let Some(current) = queue.pop_front() {
            if !out.insert(current) {
                continue;
            }
            if let Some(entry) = self.entries.get(&current) {
                queue.extend(entry.children.iter().copied());
            }
        }
        out
    }

    /// Remove one entry, updating links, descendant aggregates and the
    /// score index.
    fn remove_entry(&mut self, txid: &TxId) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        self.by_ancestor_score.remove(&Self::score_key(&entry));
        for input in &entry.tx.inputs {
            self.spends.remove(&input.prevout);
        }
        for parent in &entry.parents {
            if let Some(parent_entry) = self.entries.get_mut(parent) {
                parent_entry.children.remove(txid);
            }
        }

        // Descendants lose this entry as an ancestor. The walk starts
        // from the removed entry's own child links; the entry itself is
        // already out of the map.
        let mut descendants: HashSet<TxId> = HashSet::new();
        let mut queue: VecDeque<TxId> = entry.children.iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            if !descendants.insert(current) {
                continue;
            }
            if let Some(child_entry) = self.entries.get(&current) {
                queue.extend(child_entry.children.iter().copied());
            }
        }
        for desc in descendants {
            if let Some(desc_entry) = self.entries.get_mut(&desc) {
                self.by_ancestor_score.remove(&Self::score_key(desc_entry));
                desc_entry.parents.remove(txid);
                desc_entry.count_with_ancestors -= 1;
                desc_entry.size_with_ancestors -= entry.vsize;
                desc_entry.fees_with_ancestors -= entry.modified_fee;
                desc_entry.sigops_with_ancestors -= entry.sigop_cost;
                self.by_ancestor_score.insert(Self::score_key(desc_entry));
            }
        }
        Some(entry)
    }
}

/// The transaction mempool.
///
/// A single lock guards all indexes so one [`MempoolView`] sees a
/// consistent pool for the whole of a block assembly call.
pub struct Mempool {
    inner: RwLock<PoolInner>,
    transactions_updated: AtomicU64,
    next_sequence: AtomicU64,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}

impl Mempool {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(PoolInner {
                entries: HashMap::new(),
                by_ancestor_score: BTreeSet::new(),
                spends: HashMap::new(),
            }),
            transactions_updated: AtomicU64::new(0),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Add a transaction. In-pool parents must already be present; the
    /// admission pipeline upstream of this call is responsible for
    /// policy and ordering.
    pub fn add(&self, tx: Arc<Transaction>, fee: Amount, sigop_cost: i64) -> MempoolResult<()> {
        let txid = tx.txid();
        let mut inner = self.inner.write();

        if inner.entries.contains_key(&txid) {
            return Err(MempoolError::AlreadyExists(txid.to_string()));
        }
        for input in &tx.inputs {
            if let Some(existing) = inner.spends.get(&input.prevout) {
                return Err(MempoolError::Conflict(existing.to_string()));
            }
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let mut entry = MempoolEntry::new(tx, fee, sigop_cost, sequence);

        for input in &entry.tx.inputs {
            if inner.entries.contains_key(&input.prevout.txid) {
                entry.parents.insert(input.prevout.txid);
            }
        }

        // Aggregate over the full ancestor set.
        let mut seen: HashSet<TxId> = HashSet::new();
        let mut queue: VecDeque<TxId> = entry.parents.iter().copied().collect();
        while let Some(ancestor) = queue.pop_front() {
            if !seen.insert(ancestor) {
                continue;
            }
            let ancestor_entry = &inner.entries[&ancestor];
            entry.count_with_ancestors += 1;
            entry.size_with_ancestors += ancestor_entry.vsize;
            entry.fees_with_ancestors += ancestor_entry.modified_fee;
            entry.sigops_with_ancestors += ancestor_entry.sigop_cost;
            queue.extend(ancestor_entry.parents.iter().copied());
        }

        for parent in entry.parents.clone() {
            inner
                .entries
                .get_mut(&parent)
                .expect("parent present")
                .children
                .insert(txid);
        }
        for input in &entry.tx.inputs {
            inner.spends.insert(input.prevout, txid);
        }
        inner.by_ancestor_score.insert(PoolInner::score_key(&entry));
        inner.entries.insert(txid, entry);
        drop(inner);

        self.transactions_updated.fetch_add(1, Ordering::Relaxed);
        debug!(tx = %txid, "Transaction added to mempool");
        Ok(())
    }

    /// Remove everything a connected block confirmed or conflicted.
    pub fn remove_for_block(&self, block: &Block) {
        let mut inner = self.inner.write();
        let mut removed = 0usize;
        for tx in &block.transactions {
            if inner.remove_entry(&tx.txid()).is_some() {
                removed += 1;
            }
            if tx.is_coinbase() {
                continue;
            }
            // Anything in the pool spending an input this block consumed
            // is now a conflict; drop it and its descendants.
            for input in &tx.inputs {
                if let Some(conflicting) = inner.spends.get(&input.prevout).copied() {
                    for desc in inner.calculate_descendants(&conflicting) {
                        if inner.remove_entry(&desc).is_some() {
                            removed += 1;
                        }
                    }
                }
            }
        }
        drop(inner);
        if removed > 0 {
            self.transactions_updated.fetch_add(1, Ordering::Relaxed);
            debug!(removed, "Removed confirmed transactions from mempool");
        }
    }

    /// Monotonic counter bumped on every pool change; consumed by the
    /// template long-poll.
    pub fn transactions_updated(&self) -> u64 {
        self.transactions_updated.load(Ordering::Relaxed)
    }

    pub fn size(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn contains(&self, txid: &TxId) -> bool {
        self.inner.read().entries.contains_key(txid)
    }

    pub fn get(&self, txid: &TxId) -> Option<Arc<Transaction>> {
        self.inner.read().entries.get(txid).map(|e| Arc::clone(&e.tx))
    }

    /// Take a consistent read view for the duration of an assembly call.
    pub fn read(&self) -> MempoolView<'_> {
        MempoolView {
            guard: self.inner.read(),
        }
    }
}

/// A consistent snapshot view over the pool.
pub struct MempoolView<'a> {
    guard: RwLockReadGuard<'a, PoolInner>,
}

impl MempoolView<'_> {
    pub fn len(&self) -> usize {
        self.guard.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.entries.is_empty()
    }

    pub fn contains(&self, txid: &TxId) -> bool {
        self.guard.entries.contains_key(txid)
    }

    pub fn entry(&self, txid: &TxId) -> Option<&MempoolEntry> {
        self.guard.entries.get(txid)
    }

    /// Iterate entries best ancestor-feerate first.
    pub fn iter_by_ancestor_score(&self) -> impl Iterator<Item = &MempoolEntry> {
        let inner = &*self.guard;
        inner
            .by_ancestor_score
            .iter()
            .filter_map(move |key| inner.entries.get(&key.txid))
    }

    /// All in-pool ancestors of `txid`, excluding the entry itself.
    pub fn calculate_ancestors(&self, txid: &TxId) -> HashSet<TxId> {
        self.guard.calculate_ancestors(txid)
    }

    /// All in-pool descendants of `txid`, including the entry itself.
    pub fn calculate_descendants(&self, txid: &TxId) -> HashSet<TxId> {
        self.guard.calculate_descendants(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use florin_chain::{Script, TxIn, TxOut};

    fn spend(prevouts: &[OutPoint], marker: u8, vsize_pad: usize) -> Arc<Transaction> {
        let mut tx = Transaction {
            time: marker as u32,
            ..Default::default()
        };
        for prevout in prevouts {
            tx.inputs.push(TxIn::new(*prevout));
        }
        let mut script = Script::new();
        script.push_slice(&vec![marker; vsize_pad]);
        tx.outputs.push(TxOut::new(1000, script));
        Arc::new(tx)
    }

    fn root(marker: u8) -> Arc<Transaction> {
        spend(&[OutPoint::new(TxId([marker; 32]), 0)], marker, 20)
    }

    #[test]
    fn test_add_and_query() {
        let pool = Mempool::new();
        let tx = root(1);
        pool.add(Arc::clone(&tx), 1000, 4).unwrap();

        assert_eq!(pool.size(), 1);
        assert!(pool.contains(&tx.txid()));
        assert_eq!(pool.transactions_updated(), 1);

        let view = pool.read();
        let entry = view.entry(&tx.txid()).unwrap();
        assert_eq!(entry.fees_with_ancestors, 1000);
        assert_eq!(entry.count_with_ancestors, 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let pool = Mempool::new();
        let tx = root(1);
        pool.add(Arc::clone(&tx), 1000, 0).unwrap();
        assert!(matches!(
            pool.add(tx, 1000, 0),
            Err(MempoolError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_conflict_rejected() {
        let pool = Mempool::new();
        let shared = OutPoint::new(TxId([7; 32]), 0);
        pool.add(spend(&[shared], 1, 20), 1000, 0).unwrap();
        assert!(matches!(
            pool.add(spend(&[shared], 2, 20), 2000, 0),
            Err(MempoolError::Conflict(_))
        ));
    }

    #[test]
    fn test_ancestor_aggregates() {
        let pool = Mempool::new();
        let parent = root(1);
        pool.add(Arc::clone(&parent), 500, 4).unwrap();

        let child = spend(&[OutPoint::new(parent.txid(), 0)], 2, 20);
        pool.add(Arc::clone(&child), 2000, 8).unwrap();

        let grandchild = spend(&[OutPoint::new(child.txid(), 0)], 3, 20);
        pool.add(Arc::clone(&grandchild), 100, 0).unwrap();

        let view = pool.read();
        let entry = view.entry(&grandchild.txid()).unwrap();
        assert_eq!(entry.count_with_ancestors, 3);
        assert_eq!(entry.fees_with_ancestors, 2600);
        assert_eq!(entry.sigops_with_ancestors, 12);
        assert_eq!(
            entry.size_with_ancestors,
            parent.vsize() + child.vsize() + grandchild.vsize()
        );

        let ancestors = view.calculate_ancestors(&grandchild.txid());
        assert_eq!(ancestors.len(), 2);
        assert!(ancestors.contains(&parent.txid()));

        let descendants = view.calculate_descendants(&parent.txid());
        assert_eq!(descendants.len(), 3);
        assert!(descendants.contains(&parent.txid()));
    }

    #[test]
    fn test_iteration_order_uses_package_feerate() {
        let pool = Mempool::new();
        // Low-fee parent, high-fee child: the child package outranks a
        // middling standalone transaction.
        let parent = root(1);
        pool.add(Arc::clone(&parent), 0, 0).unwrap();
        let child = spend(&[OutPoint::new(parent.txid(), 0)], 2, 20);
        pool.add(Arc::clone(&child), 4000, 0).unwrap();
        let standalone = root(3);
        pool.add(Arc::clone(&standalone), 10, 0).unwrap();

        let view = pool.read();
        let order: Vec<TxId> = view.iter_by_ancestor_score().map(|e| e.txid).collect();
        assert_eq!(order[0], child.txid());
        assert_eq!(order[2], parent.txid());
    }

    #[test]
    fn test_remove_for_block_updates_descendants() {
        let pool = Mempool::new();
        let parent = root(1);
        pool.add(Arc::clone(&parent), 500, 4).unwrap();
        let child = spend(&[OutPoint::new(parent.txid(), 0)], 2, 20);
        pool.add(Arc::clone(&child), 2000, 8).unwrap();

        let mut block = Block::default();
        let mut coinbase = Transaction::default();
        coinbase.inputs.push(TxIn::new(OutPoint::null()));
        coinbase.outputs.push(TxOut::new(50, Script::new()));
        block.transactions.push(coinbase);
        block.transactions.push((*parent).clone());
        pool.remove_for_block(&block);

        assert!(!pool.contains(&parent.txid()));
        assert!(pool.contains(&child.txid()));

        let view = pool.read();
        let entry = view.entry(&child.txid()).unwrap();
        assert_eq!(entry.count_with_ancestors, 1);
        assert_eq!(entry.fees_with_ancestors, 2000);
        assert!(entry.parents.is_empty());
    }

    #[test]
    fn test_remove_for_block_drops_conflicts() {
        let pool = Mempool::new();
        let shared = OutPoint::new(TxId([7; 32]), 0);
        let pooled = spend(&[shared], 1, 20);
        pool.add(Arc::clone(&pooled), 1000, 0).unwrap();
        let pooled_child = spend(&[OutPoint::new(pooled.txid(), 0)], 2, 20);
        pool.add(Arc::clone(&pooled_child), 1000, 0).unwrap();

        // The block confirms a different spend of the same outpoint.
        let mut block = Block::default();
        let mut coinbase = Transaction::default();
        coinbase.inputs.push(TxIn::new(OutPoint::null()));
        coinbase.outputs.push(TxOut::new(50, Script::new()));
        block.transactions.push(coinbase);
        block.transactions.push((*spend(&[shared], 9, 20)).clone());
        pool.remove_for_block(&block);

        assert!(!pool.contains(&pooled.txid()));
        assert!(!pool.contains(&pooled_child.txid()));
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn test_update_counter_bumps() {
        let pool = Mempool::new();
        let before = pool.transactions_updated();
        pool.add(root(1), 100, 0).unwrap();
        assert!(pool.transactions_updated() > before);
    }
}
