//! Transaction structures.

use crate::encode::{write_vec, ByteReader, DecodeError};
use crate::{sha256d, Amount, Script, TxId, LOCKTIME_THRESHOLD, WITNESS_SCALE_FACTOR};

/// Sequence value that opts a transaction input out of locktime.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// Reference to an output of a prior transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct OutPoint {
    pub txid: TxId,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: TxId, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// The null outpoint, used by coinbase inputs.
    pub fn null() -> Self {
        Self {
            txid: TxId::zero(),
            vout: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }
}

/// Transaction input.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    pub fn new(prevout: OutPoint) -> Self {
        Self {
            prevout,
            script_sig: Script::new(),
            sequence: SEQUENCE_FINAL,
            witness: Vec::new(),
        }
    }
}

/// Transaction output.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn new(value: Amount, script_pubkey: Script) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }

    /// Turn this output into the canonical empty output used by the
    /// coinbase of a proof-of-stake block.
    pub fn set_empty(&mut self) {
        self.value = 0;
        self.script_pubkey = Script::new();
    }

    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_pubkey.is_empty()
    }
}

/// A transaction.
///
/// Transactions carry a timestamp, a trait of the hybrid PoW/PoS chain
/// family: the coinstake kernel is searched over quantized transaction
/// times.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Transaction {
    pub version: i32,
    pub time: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            version: 1,
            time: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        }
    }
}

impl Transaction {
    /// Transaction id: hash of the serialization without witness data.
    pub fn txid(&self) -> TxId {
        TxId(sha256d(&self.encode(false)))
    }

    /// Witness transaction id: hash of the full serialization.
    pub fn wtxid(&self) -> TxId {
        TxId(sha256d(&self.encode(true)))
    }

    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// A coinstake spends a real input and has an empty first output
    /// marking the stake.
    pub fn is_coinstake(&self) -> bool {
        !self.inputs.is_empty()
            && !self.inputs[0].prevout.is_null()
            && self.outputs.len() >= 2
            && self.outputs[0].is_empty()
    }

    /// Serialized size without witness data.
    pub fn base_size(&self) -> u64 {
        self.encode(false).len() as u64
    }

    /// Serialized size including witness data.
    pub fn total_size(&self) -> u64 {
        self.encode(true).len() as u64
    }

    /// Weight under the segwit accounting rule.
    pub fn weight(&self) -> u64 {
        self.base_size() * (WITNESS_SCALE_FACTOR - 1) + self.total_size()
    }

    /// Virtual size: weight divided by the scale factor, rounded up.
    pub fn vsize(&self) -> u64 {
        (self.weight() + WITNESS_SCALE_FACTOR - 1) / WITNESS_SCALE_FACTOR
    }

    /// Legacy signature operation count, witness-scaled.
    pub fn sigop_cost(&self) -> i64 {
        let legacy: usize = self
            .inputs
            .iter()
            .map(|input| input.script_sig.sigop_count())
            .chain(self.outputs.iter().map(|o| o.script_pubkey.sigop_count()))
            .sum();
        WITNESS_SCALE_FACTOR as i64 * legacy as i64
    }

    /// Sum of output values.
    pub fn value_out(&self) -> Amount {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Whether the transaction is final at the given height and time cutoff.
    pub fn is_final(&self, height: u32, locktime_cutoff: i64) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let cutoff = if self.lock_time < LOCKTIME_THRESHOLD {
            height as i64
        } else {
            locktime_cutoff
        };
        if (self.lock_time as i64) < cutoff {
            return true;
        }
        self.inputs
            .iter()
            .all(|input| input.sequence == SEQUENCE_FINAL)
    }

    /// Serialize to bytes, optionally including witness data.
    pub fn encode(&self, with_witness: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.time.to_le_bytes());

        let with_witness = with_witness && self.has_witness();
        out.push(u8::from(with_witness));

        out.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            out.extend_from_slice(input.prevout.txid.as_bytes());
            out.extend_from_slice(&input.prevout.vout.to_le_bytes());
            write_vec(&mut out, input.script_sig.as_bytes());
            out.extend_from_slice(&input.sequence.to_le_bytes());
            if with_witness {
                out.extend_from_slice(&(input.witness.len() as u32).to_le_bytes());
                for item in &input.witness {
                    write_vec(&mut out, item);
                }
            }
        }

        out.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_vec(&mut out, output.script_pubkey.as_bytes());
        }

        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    /// Decode a transaction from a reader.
    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let version = reader.read_i32()?;
        let time = reader.read_u32()?;
        let with_witness = reader.read_u8()? != 0;

        let input_count = reader.read_u32()? as usize;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            let txid = TxId(reader.read_hash()?);
            let vout = reader.read_u32()?;
            let script_sig = Script::from_bytes(reader.read_vec()?);
            let sequence = reader.read_u32()?;
            let mut witness = Vec::new();
            if with_witness {
                let item_count = reader.read_u32()? as usize;
                for _ in 0..item_count {
                    witness.push(reader.read_vec()?);
                }
            }
            inputs.push(TxIn {
                prevout: OutPoint::new(txid, vout),
                script_sig,
                sequence,
                witness,
            });
        }

        let output_count = reader.read_u32()? as usize;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            let value = reader.read_i64()?;
            let script_pubkey = Script::from_bytes(reader.read_vec()?);
            outputs.push(TxOut {
                value,
                script_pubkey,
            });
        }

        let lock_time = reader.read_u32()?;
        Ok(Self {
            version,
            time,
            inputs,
            outputs,
            lock_time,
        })
    }

    /// Decode from a standalone byte slice; rejects trailing bytes.
    pub fn decode_all(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let tx = Self::decode(&mut reader)?;
        reader.finish()?;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        let mut script = Script::new();
        script.push_slice(&[0xaa; 20]);
        Transaction {
            version: 2,
            time: 1_700_000_000,
            inputs: vec![TxIn::new(OutPoint::new(TxId([7u8; 32]), 1))],
            outputs: vec![TxOut::new(50_000, script)],
            lock_time: 0,
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let tx = sample_tx();
        let decoded = Transaction::decode_all(&tx.encode(true)).unwrap();
        assert_eq!(tx, decoded);
        assert_eq!(tx.txid(), decoded.txid());
    }

    #[test]
    fn test_witness_round_trip() {
        let mut tx = sample_tx();
        tx.inputs[0].witness = vec![vec![1, 2, 3], vec![4]];
        let decoded = Transaction::decode_all(&tx.encode(true)).unwrap();
        assert_eq!(tx, decoded);
        // txid must not depend on witness data
        let mut stripped = tx.clone();
        stripped.inputs[0].witness.clear();
        assert_eq!(tx.txid(), stripped.txid());
        assert_ne!(tx.wtxid(), stripped.wtxid());
    }

    #[test]
    fn test_coinbase_detection() {
        let mut tx = Transaction::default();
        tx.inputs.push(TxIn::new(OutPoint::null()));
        assert!(tx.is_coinbase());
        assert!(!tx.is_coinstake());
    }

    #[test]
    fn test_coinstake_detection() {
        let mut tx = Transaction::default();
        tx.inputs.push(TxIn::new(OutPoint::new(TxId([1; 32]), 0)));
        tx.outputs.push(TxOut::default());
        tx.outputs.push(TxOut::new(100, Script::new()));
        assert!(tx.is_coinstake());
        assert!(!tx.is_coinbase());
    }

    #[test]
    fn test_weight_accounts_for_witness() {
        let mut tx = sample_tx();
        let base_weight = tx.weight();
        tx.inputs[0].witness = vec![vec![0u8; 72]];
        let witness_weight = tx.weight();
        assert!(witness_weight > base_weight);
        // Witness bytes count once, base bytes four times.
        assert!(witness_weight < base_weight + 4 * 80);
    }

    #[test]
    fn test_finality() {
        let mut tx = sample_tx();
        assert!(tx.is_final(100, 0));

        tx.lock_time = 200; // height-based
        tx.inputs[0].sequence = 0;
        assert!(!tx.is_final(100, 0));
        assert!(tx.is_final(201, 0));

        tx.inputs[0].sequence = SEQUENCE_FINAL;
        assert!(tx.is_final(100, 0));
    }
}
