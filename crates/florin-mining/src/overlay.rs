//! Package accounting overlay.
//!
//! Selecting a package must not mutate the mempool, so the assembler
//! keeps this overlay of residual package metrics for candidates whose
//! ancestors are already committed to the block. Entries are indexed by
//! txid and, secondarily, by ancestor feerate so the best next package
//! is one ordered lookup away.

use florin_chain::{Amount, TxId};
use florin_mempool::{AncestorScoreKey, MempoolView};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Residual package metrics for one candidate transaction.
///
/// The `*_with_ancestors` fields start from the mempool's cached totals
/// and shrink as this candidate's ancestors are placed in the block.
#[derive(Clone, Copy, Debug)]
pub struct ModifiedEntry {
    pub txid: TxId,
    pub size_with_ancestors: u64,
    pub fees_with_ancestors: Amount,
    pub sigops_with_ancestors: i64,
}

impl ModifiedEntry {
    fn score_key(&self) -> AncestorScoreKey {
        AncestorScoreKey::new(self.fees_with_ancestors, self.size_with_ancestors, self.txid)
    }
}

/// The overlay: residual entries indexed by txid and ancestor feerate.
///
/// Lives only for the duration of one assembly call.
#[derive(Default)]
pub struct ModifiedTxSet {
    by_txid: HashMap<TxId, ModifiedEntry>,
    by_score: BTreeSet<AncestorScoreKey>,
}

impl ModifiedTxSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_txid.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_txid.len()
    }

    pub fn contains(&self, txid: &TxId) -> bool {
        self.by_txid.contains_key(txid)
    }

    pub fn get(&self, txid: &TxId) -> Option<&ModifiedEntry> {
        self.by_txid.get(txid)
    }

    /// The entry with the best ancestor feerate; ties break by txid.
    pub fn best(&self) -> Option<&ModifiedEntry> {
        self.by_score
            .iter()
            .next()
            .and_then(|key| self.by_txid.get(&key.txid))
    }

    pub fn erase(&mut self, txid: &TxId) -> Option<ModifiedEntry> {
        let entry = self.by_txid.remove(txid)?;
        self.by_score.remove(&entry.score_key());
        Some(entry)
    }

    fn insert(&mut self, entry: ModifiedEntry) {
        self.by_score.insert(entry.score_key());
        self.by_txid.insert(entry.txid, entry);
    }

    /// Seed the overlay from a set of already-placed transactions:
    /// every in-pool descendant of the set picks up residuals with the
    /// set's contributions subtracted.
    pub fn seed(&mut self, view: &MempoolView<'_>, in_block: &HashSet<TxId>) -> usize {
        self.update_for_parent_inclusion(view, in_block)
    }

    /// Account for newly-included parents: each tracked descendant loses
    /// the parent's own size, modified fee and sigops from its
    /// residuals; untracked descendants enter the overlay seeded from
    /// their mempool totals minus the parent's contribution.
    ///
    /// Returns the number of descendant updates performed.
    pub fn update_for_parent_inclusion(
        &mut self,
        view: &MempoolView<'_>,
        added: &HashSet<TxId>,
    ) -> usize {
        let mut updated = 0usize;
        for parent in added {
            let Some(parent_entry) = view.entry(parent) else {
                continue;
            };
            let (parent_size, parent_fee, parent_sigops) = (
                parent_entry.vsize,
                parent_entry.modified_fee,
                parent_entry.sigop_cost,
            );
            for desc in view.calculate_descendants(parent) {
                if added.contains(&desc) {
                    continue;
                }
                updated += 1;
                match self.erase(&desc) {
                    Some(mut entry) => {
                        entry.size_with_ancestors -= parent_size;
                        entry.fees_with_ancestors -= parent_fee;
                        entry.sigops_with_ancestors -= parent_sigops;
                        self.insert(entry);
                    }
                    None => {
                        let desc_entry = view.entry(&desc).expect("descendant present");
                        self.insert(ModifiedEntry {
                            txid: desc,
                            size_with_ancestors: desc_entry.size_with_ancestors - parent_size,
                            fees_with_ancestors: desc_entry.fees_with_ancestors - parent_fee,
                            sigops_with_ancestors: desc_entry.sigops_with_ancestors - parent_sigops,
                        });
                    }
                }
            }
        }
        updated
    }
}
