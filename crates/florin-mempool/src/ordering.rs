//! Ancestor-feerate ordering.

use florin_chain::{Amount, TxId};
use std::cmp::Ordering;

/// Compare two packages by feerate using integer cross-multiplication:
/// `a_fee / a_size` versus `b_fee / b_size` without division, widened to
/// 128 bits so no realistic fee and size can overflow.
///
/// Returns `Greater` when `a` has the higher feerate.
pub fn compare_ancestor_fee(
    a_fee: Amount,
    a_size: u64,
    b_fee: Amount,
    b_size: u64,
) -> Ordering {
    let lhs = a_fee as i128 * b_size as i128;
    let rhs = b_fee as i128 * a_size as i128;
    lhs.cmp(&rhs)
}

/// Key for the ordered ancestor-score index.
///
/// Sorts best-first: higher ancestor feerate before lower, ties broken
/// deterministically by txid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AncestorScoreKey {
    pub fees_with_ancestors: Amount,
    pub size_with_ancestors: u64,
    pub txid: TxId,
}

impl AncestorScoreKey {
    pub fn new(fees_with_ancestors: Amount, size_with_ancestors: u64, txid: TxId) -> Self {
        Self {
            fees_with_ancestors,
            size_with_ancestors,
            txid,
        }
    }
}

impl PartialOrd for AncestorScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AncestorScoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the best package iterates first out of a BTreeSet.
        compare_ancestor_fee(
            other.fees_with_ancestors,
            other.size_with_ancestors,
            self.fees_with_ancestors,
            self.size_with_ancestors,
        )
        .then_with(|| self.txid.cmp(&other.txid))
    }
}
