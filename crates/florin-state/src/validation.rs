//! Block validation state and witness commitment handling.

use crate::BlockIndex;
use florin_chain::{sha256d, Block, ChainParams, Script, TxOut, OP_RETURN};
use florin_consensus::{deployment_active_after, Deployment};

/// Marker bytes identifying the witness commitment output.
pub const WITNESS_COMMITMENT_HEADER: [u8; 4] = [0xaa, 0x21, 0xa9, 0xed];

/// Outcome of validating one block.
#[derive(Clone, Debug)]
pub enum BlockValidationState {
    /// The block passed.
    Valid,
    /// The block broke a consensus rule.
    Invalid { reject_reason: String },
    /// Validation itself failed; represents a local bug or resource
    /// problem, not a verdict about the block.
    Error { message: String },
}

impl BlockValidationState {
    pub fn valid() -> Self {
        Self::Valid
    }

    pub fn invalid(reject_reason: impl Into<String>) -> Self {
        Self::Invalid {
            reject_reason: reject_reason.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn reject_reason(&self) -> &str {
        match self {
            Self::Invalid { reject_reason } => reject_reason,
            _ => "",
        }
    }
}

impl std::fmt::Display for BlockValidationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::Invalid { reject_reason } => write!(f, "invalid: {reject_reason}"),
            Self::Error { message } => write!(f, "error: {message}"),
        }
    }
}

/// Find the witness commitment output in the coinbase, if any.
///
/// The last matching output wins, mirroring the ancestor family rule.
pub fn witness_commitment_index(block: &Block) -> Option<usize> {
    let coinbase = block.transactions.first()?;
    let mut found = None;
    for (i, output) in coinbase.outputs.iter().enumerate() {
        let bytes = output.script_pubkey.as_bytes();
        if bytes.len() >= 38
            && bytes[0] == OP_RETURN
            && bytes[1] == 36
            && bytes[2..6] == WITNESS_COMMITMENT_HEADER
        {
            found = Some(i);
        }
    }
    found
}

/// Compute and append the witness commitment output to the coinbase.
///
/// No-op when segwit is not active at the next height. Returns the raw
/// commitment script bytes (empty when no commitment was made). The
/// caller recomputes the merkle root.
pub fn generate_coinbase_commitment(
    block: &mut Block,
    prev: Option<&BlockIndex>,
    params: &ChainParams,
) -> Vec<u8> {
    if !deployment_active_after(prev, params, Deployment::Segwit) {
        return Vec::new();
    }
    if block.transactions.is_empty() {
        return Vec::new();
    }

    let witness_root = block.witness_merkle_root();
    let witness_nonce = [0u8; 32];

    let mut preimage = Vec::with_capacity(64);
    preimage.extend_from_slice(&witness_root);
    preimage.extend_from_slice(&witness_nonce);
    let commitment = sha256d(&preimage);

    let mut script = Script::new();
    script.push_opcode(OP_RETURN);
    let mut payload = Vec::with_capacity(36);
    payload.extend_from_slice(&WITNESS_COMMITMENT_HEADER);
    payload.extend_from_slice(&commitment);
    script.push_slice(&payload);

    let script_bytes = script.as_bytes().to_vec();
    let coinbase = &mut block.transactions[0];
    coinbase.outputs.push(TxOut::new(0, script));
    coinbase.inputs[0].witness = vec![witness_nonce.to_vec()];
    script_bytes
}

/// Fill in block structures a miner may have omitted: currently the
/// coinbase witness nonce backing the witness commitment.
pub fn update_uncommitted_block_structures(
    block: &mut Block,
    _prev: Option<&BlockIndex>,
    _params: &ChainParams,
) {
    if witness_commitment_index(block).is_some() {
        if let Some(coinbase) = block.transactions.first_mut() {
            if coinbase.inputs[0].witness.is_empty() {
                coinbase.inputs[0].witness = vec![vec![0u8; 32]];
            }
        }
    }
}
