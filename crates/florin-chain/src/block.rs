//! Block structures.

use crate::encode::{write_vec, ByteReader, DecodeError};
use crate::{merkle_root_from_hashes, sha256d, BlockHash, Transaction};

/// Header flag marking a proof-of-stake block.
pub const BLOCK_FLAG_PROOF_OF_STAKE: u32 = 1 << 0;

/// Block header.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_hash: BlockHash,
    pub merkle_root: [u8; 32],
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub flags: u32,
}

impl Default for BlockHeader {
    fn default() -> Self {
        Self {
            version: 1,
            prev_hash: BlockHash::zero(),
            merkle_root: [0u8; 32],
            time: 0,
            bits: 0,
            nonce: 0,
            flags: 0,
        }
    }
}

impl BlockHeader {
    pub fn hash(&self) -> BlockHash {
        BlockHash(sha256d(&self.encode()))
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.flags & BLOCK_FLAG_PROOF_OF_STAKE != 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(84);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(self.prev_hash.as_bytes());
        out.extend_from_slice(&self.merkle_root);
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&self.bits.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out
    }

    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            version: reader.read_i32()?,
            prev_hash: BlockHash(reader.read_hash()?),
            merkle_root: reader.read_hash()?,
            time: reader.read_u32()?,
            bits: reader.read_u32()?,
            nonce: reader.read_u32()?,
            flags: reader.read_u32()?,
        })
    }

    pub fn decode_all(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let header = Self::decode(&mut reader)?;
        reader.finish()?;
        Ok(header)
    }
}

/// A block: header, transactions, and the block signature a staker
/// appends over proof-of-stake blocks.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub signature: Vec<u8>,
}

impl Block {
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    /// A block is proof-of-stake when its second transaction is a coinstake.
    pub fn is_proof_of_stake(&self) -> bool {
        self.transactions.len() > 1 && self.transactions[1].is_coinstake()
    }

    /// Merkle root over the transaction ids.
    pub fn merkle_root(&self) -> [u8; 32] {
        let leaves: Vec<[u8; 32]> = self.transactions.iter().map(|tx| tx.txid().0).collect();
        merkle_root_from_hashes(&leaves)
    }

    /// Merkle root over witness transaction ids; the coinbase leaf is zero.
    pub fn witness_merkle_root(&self) -> [u8; 32] {
        let leaves: Vec<[u8; 32]> = self
            .transactions
            .iter()
            .enumerate()
            .map(|(i, tx)| if i == 0 { [0u8; 32] } else { tx.wtxid().0 })
            .collect();
        merkle_root_from_hashes(&leaves)
    }

    /// Block weight: header plus all transaction weights.
    pub fn weight(&self) -> u64 {
        let header_weight = self.header.encode().len() as u64 * crate::WITNESS_SCALE_FACTOR;
        header_weight + self.transactions.iter().map(|tx| tx.weight()).sum::<u64>()
    }

    /// Latest transaction timestamp in the block.
    pub fn max_transaction_time(&self) -> i64 {
        self.transactions
            .iter()
            .map(|tx| tx.time as i64)
            .max()
            .unwrap_or(0)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.header.encode();
        out.extend_from_slice(&(self.transactions.len() as u32).to_le_bytes());
        for tx in &self.transactions {
            let tx_bytes = tx.encode(true);
            write_vec(&mut out, &tx_bytes);
        }
        write_vec(&mut out, &self.signature);
        out
    }

    pub fn decode_all(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let header = BlockHeader::decode(&mut reader)?;
        let tx_count = reader.read_u32()? as usize;
        let mut transactions = Vec::with_capacity(tx_count.min(1024));
        for _ in 0..tx_count {
            let tx_bytes = reader.read_vec()?;
            transactions.push(Transaction::decode_all(&tx_bytes)?);
        }
        let signature = reader.read_vec()?;
        reader.finish()?;
        Ok(Self {
            header,
            transactions,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OutPoint, Script, TxIn, TxOut, TxId};

    fn coinbase(height: u32) -> Transaction {
        let mut input = TxIn::new(OutPoint::null());
        input.script_sig.push_int(height as i64);
        Transaction {
            inputs: vec![input],
            outputs: vec![TxOut::new(50, Script::new())],
            ..Default::default()
        }
    }

    #[test]
    fn test_block_round_trip() {
        let mut block = Block::default();
        block.header.time = 12345;
        block.transactions.push(coinbase(7));
        block.signature = vec![1, 2, 3];
        block.header.merkle_root = block.merkle_root();

        let decoded = Block::decode_all(&block.encode()).unwrap();
        assert_eq!(block, decoded);
        assert_eq!(block.hash(), decoded.hash());
    }

    #[test]
    fn test_merkle_root_tracks_transactions() {
        let mut block = Block::default();
        block.transactions.push(coinbase(1));
        let root_one = block.merkle_root();

        let mut spend = Transaction::default();
        spend.inputs.push(TxIn::new(OutPoint::new(TxId([9; 32]), 0)));
        spend.outputs.push(TxOut::new(10, Script::new()));
        block.transactions.push(spend);

        assert_ne!(root_one, block.merkle_root());
    }

    #[test]
    fn test_proof_of_stake_detection() {
        let mut block = Block::default();
        block.transactions.push(coinbase(1));
        assert!(!block.is_proof_of_stake());

        let mut stake = Transaction::default();
        stake.inputs.push(TxIn::new(OutPoint::new(TxId([2; 32]), 0)));
        stake.outputs.push(TxOut::default());
        stake.outputs.push(TxOut::new(60, Script::new()));
        block.transactions.push(stake);
        assert!(block.is_proof_of_stake());
    }

    #[test]
    fn test_header_hash_changes_with_nonce() {
        let mut header = BlockHeader::default();
        let h1 = header.hash();
        header.nonce += 1;
        assert_ne!(h1, header.hash());
    }
}
