//! The block template.

use florin_chain::{Amount, Block};

/// Output of one assembly call.
///
/// `transactions[0]` is the coinbase; `transactions[1]` the coinstake on
/// proof-of-stake templates. `tx_fees` and `tx_sigops` are aligned with
/// the transaction list; `tx_fees[0]` carries the negated fee total.
/// Immutable after assembly except for the extra-nonce and commitment
/// touch-ups.
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    pub block: Block,
    pub tx_fees: Vec<Amount>,
    pub tx_sigops: Vec<i64>,
    /// Raw witness commitment script, empty when no commitment was made.
    pub coinbase_commitment: Vec<u8>,
}

impl BlockTemplate {
    pub fn new() -> Self {
        Self {
            block: Block::default(),
            tx_fees: Vec::new(),
            tx_sigops: Vec::new(),
            coinbase_commitment: Vec::new(),
        }
    }
}

impl Default for BlockTemplate {
    fn default() -> Self {
        Self::new()
    }
}
