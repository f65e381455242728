//! Block index entries.

use florin_chain::{BlockHash, BlockHeader, BLOCK_FLAG_PROOF_OF_STAKE};
use florin_consensus::{compact_to_target, HeaderView};
use primitive_types::U256;
use std::sync::Arc;

/// One entry in the block index: a header plus its chain position.
#[derive(Clone, Debug)]
pub struct BlockIndex {
    pub hash: BlockHash,
    pub prev: Option<Arc<BlockIndex>>,
    pub height: u32,
    pub version: i32,
    pub time: i64,
    pub bits: u32,
    pub nonce: u32,
    pub flags: u32,
    /// Cumulative work up to and including this block.
    pub chain_work: U256,
}

impl BlockIndex {
    /// Index entry for a genesis header.
    pub fn genesis(header: &BlockHeader) -> Self {
        Self {
            hash: header.hash(),
            prev: None,
            height: 0,
            version: header.version,
            time: header.time as i64,
            bits: header.bits,
            nonce: header.nonce,
            flags: header.flags,
            chain_work: block_work(header.bits),
        }
    }

    /// Index entry for a header extending `prev`.
    pub fn from_header(header: &BlockHeader, prev: Arc<BlockIndex>) -> Self {
        let chain_work = prev.chain_work.saturating_add(block_work(header.bits));
        Self {
            hash: header.hash(),
            height: prev.height + 1,
            prev: Some(prev),
            version: header.version,
            time: header.time as i64,
            bits: header.bits,
            nonce: header.nonce,
            flags: header.flags,
            chain_work,
        }
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.flags & BLOCK_FLAG_PROOF_OF_STAKE != 0
    }

    /// Median timestamp over the last eleven blocks ending here.
    pub fn median_time_past(&self) -> i64 {
        let mut times = Vec::with_capacity(11);
        let mut cursor = Some(self);
        while let Some(index) = cursor {
            times.push(index.time);
            if times.len() == 11 {
                break;
            }
            cursor = index.prev.as_deref();
        }
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// Walk back to the ancestor at a given height.
    pub fn ancestor(&self, height: u32) -> Option<&BlockIndex> {
        if height > self.height {
            return None;
        }
        let mut cursor = self;
        while cursor.height > height {
            cursor = cursor.prev.as_deref()?;
        }
        Some(cursor)
    }
}

/// Expected work to find a block at the given compact target.
fn block_work(bits: u32) -> U256 {
    match compact_to_target(bits) {
        // work = floor(2^256 / (target + 1)), computed as (~target / (target + 1)) + 1
        Some(target) => (!target / (target + U256::one())) + U256::one(),
        None => U256::zero(),
    }
}

impl HeaderView for BlockIndex {
    fn height(&self) -> u32 {
        self.height
    }
    fn time(&self) -> i64 {
        self.time
    }
    fn bits(&self) -> u32 {
        self.bits
    }
    fn hash(&self) -> BlockHash {
        self.hash
    }
    fn is_proof_of_stake(&self) -> bool {
        self.is_proof_of_stake()
    }
    fn prev(&self) -> Option<&Self> {
        self.prev.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_of(times: &[i64]) -> Arc<BlockIndex> {
        let mut header = BlockHeader {
            time: times[0] as u32,
            bits: 0x207f_ffff,
            ..Default::default()
        };
        let mut tip = Arc::new(BlockIndex::genesis(&header));
        for &t in &times[1..] {
            header.time = t as u32;
            header.prev_hash = tip.hash;
            header.nonce += 1;
            tip = Arc::new(BlockIndex::from_header(&header, tip));
        }
        tip
    }

    #[test]
    fn test_median_time_past_short_chain() {
        let tip = chain_of(&[10, 20, 30]);
        assert_eq!(tip.median_time_past(), 20);
    }

    #[test]
    fn test_median_time_past_window_of_eleven() {
        let times: Vec<i64> = (1..=20).collect();
        let tip = chain_of(&times);
        // Window is blocks 10..=20; median is 15.
        assert_eq!(tip.median_time_past(), 15);
    }

    #[test]
    fn test_chain_work_accumulates() {
        let tip = chain_of(&[10, 20]);
        assert!(tip.chain_work > tip.prev.as_ref().unwrap().chain_work);
    }

    #[test]
    fn test_ancestor_walk() {
        let tip = chain_of(&[10, 20, 30, 40]);
        assert_eq!(tip.ancestor(0).unwrap().height, 0);
        assert_eq!(tip.ancestor(2).unwrap().height, 2);
        assert!(tip.ancestor(9).is_none());
    }
}
