//! Coinbase mutation utilities for external block assembly.

use crate::MiningContext;
use florin_chain::{Block, Script};
use florin_state::{
    generate_coinbase_commitment, witness_commitment_index, BlockIndex, ChainstateManager,
};

/// Bump the extra nonce and rewrite the coinbase scriptSig as
/// `[height, extra_nonce]`, then recompute the merkle root.
///
/// The context carries the last parent hash seen; building on a new
/// parent resets the caller's counter. Callers racing on one context
/// must serialize.
pub fn increment_extra_nonce(
    ctx: &MiningContext,
    block: &mut Block,
    prev: &BlockIndex,
    extra_nonce: &mut u32,
) {
    {
        let mut state = ctx.extra_nonce.lock();
        if state.last_prev_hash != block.header.prev_hash {
            *extra_nonce = 0;
            state.last_prev_hash = block.header.prev_hash;
        }
    }
    *extra_nonce += 1;

    let height = prev.height + 1;
    let mut script_sig = Script::new();
    script_sig.push_int(height as i64).push_int(*extra_nonce as i64);
    assert!(script_sig.len() <= 100);

    let coinbase = &mut block.transactions[0];
    coinbase.inputs[0].script_sig = script_sig;
    block.header.merkle_root = block.merkle_root();
}

/// Strip the witness commitment from the coinbase, regenerate it over
/// the block's current transactions, and recompute the merkle root.
///
/// Used by `generateblock` after user transactions were appended to an
/// already assembled block.
pub fn regenerate_commitments(block: &mut Block, chainstate: &ChainstateManager) {
    if let Some(index) = witness_commitment_index(block) {
        block.transactions[0].outputs.remove(index);
    }

    let prev = chainstate.lookup_block_index(&block.header.prev_hash);
    generate_coinbase_commitment(block, prev.as_deref(), chainstate.params());
    block.header.merkle_root = block.merkle_root();
}

#[cfg(test)]
mod tests {
    use super::*;
    use florin_chain::{ChainParams, Network, OutPoint, Transaction, TxIn, TxOut};
    use florin_state::ChainstateManager;

    fn block_on_tip(chainstate: &ChainstateManager) -> (Block, std::sync::Arc<BlockIndex>) {
        let tip = chainstate.tip();
        let mut coinbase = Transaction::default();
        let mut input = TxIn::new(OutPoint::null());
        input.script_sig.push_int((tip.height + 1) as i64);
        coinbase.inputs.push(input);
        coinbase.outputs.push(TxOut::new(50, Script::new()));

        let mut block = Block {
            transactions: vec![coinbase],
            ..Default::default()
        };
        block.header.prev_hash = tip.hash;
        block.header.merkle_root = block.merkle_root();
        (block, tip)
    }

    #[test]
    fn test_increment_extra_nonce_counts_and_resets() {
        let chainstate = ChainstateManager::new(ChainParams::new(Network::Regtest));
        let ctx = MiningContext::new();
        let (mut block, tip) = block_on_tip(&chainstate);

        let mut extra_nonce = 0u32;
        increment_extra_nonce(&ctx, &mut block, &tip, &mut extra_nonce);
        assert_eq!(extra_nonce, 1);
        increment_extra_nonce(&ctx, &mut block, &tip, &mut extra_nonce);
        assert_eq!(extra_nonce, 2);

        // A different parent resets the counter.
        block.header.prev_hash = florin_chain::BlockHash([5; 32]);
        increment_extra_nonce(&ctx, &mut block, &tip, &mut extra_nonce);
        assert_eq!(extra_nonce, 1);
    }

    #[test]
    fn test_increment_extra_nonce_keeps_merkle_consistent() {
        let chainstate = ChainstateManager::new(ChainParams::new(Network::Regtest));
        let ctx = MiningContext::new();
        let (mut block, tip) = block_on_tip(&chainstate);

        let mut extra_nonce = 0u32;
        increment_extra_nonce(&ctx, &mut block, &tip, &mut extra_nonce);
        assert_eq!(block.header.merkle_root, block.merkle_root());

        // Serialization round-trips the mutated block byte for byte.
        let decoded = Block::decode_all(&block.encode()).unwrap();
        assert_eq!(decoded.hash(), block.hash());
        assert_eq!(decoded.weight(), block.weight());
    }

    #[test]
    fn test_regenerate_commitments_single_output() {
        let chainstate = ChainstateManager::new(ChainParams::new(Network::Regtest));
        let (mut block, _tip) = block_on_tip(&chainstate);

        regenerate_commitments(&mut block, &chainstate);
        let first = witness_commitment_index(&block).expect("commitment present");

        // Running again replaces rather than stacks commitments.
        regenerate_commitments(&mut block, &chainstate);
        assert_eq!(witness_commitment_index(&block), Some(first));
        let commitment_outputs = block.transactions[0]
            .outputs
            .iter()
            .enumerate()
            .filter(|(i, _)| witness_commitment_index(&block) == Some(*i))
            .count();
        assert_eq!(commitment_outputs, 1);
        assert_eq!(block.header.merkle_root, block.merkle_root());
    }
}
