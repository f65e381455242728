//! Proof-of-stake kernel verification.

use crate::{compact_to_target, ConsensusError, ConsensusResult, HeaderView};
use florin_chain::{sha256d, Amount, BlockHash, ChainParams, OutPoint, Transaction, COIN};
use primitive_types::U256;

/// What the kernel check needs to know about the staked output.
#[derive(Clone, Copy, Debug)]
pub struct StakeCoin {
    /// Value of the output.
    pub value: Amount,
    /// Timestamp of the transaction that created the output.
    pub time: u32,
    /// Height of the block that confirmed the output.
    pub height: u32,
}

/// The kernel hash binding a stake modifier, the staked output, and a
/// candidate timestamp.
pub fn stake_kernel_hash(
    stake_modifier: &BlockHash,
    coin_time: u32,
    prevout: &OutPoint,
    time: i64,
) -> [u8; 32] {
    let mut buf = Vec::with_capacity(32 + 4 + 36 + 8);
    buf.extend_from_slice(stake_modifier.as_bytes());
    buf.extend_from_slice(&coin_time.to_le_bytes());
    buf.extend_from_slice(prevout.txid.as_bytes());
    buf.extend_from_slice(&prevout.vout.to_le_bytes());
    buf.extend_from_slice(&time.to_le_bytes());
    sha256d(&buf)
}

/// Check whether `prevout` is a valid kernel for the block following
/// `prev` at the given (already masked) timestamp.
///
/// The target scales with the staked value: heavier coins find kernels
/// proportionally more often. The stake modifier is the previous block
/// hash.
pub fn check_kernel<H, F>(
    prev: &H,
    bits: u32,
    time: i64,
    prevout: &OutPoint,
    lookup: F,
    params: &ChainParams,
) -> ConsensusResult<()>
where
    H: HeaderView,
    F: Fn(&OutPoint) -> Option<StakeCoin>,
{
    let coin = lookup(prevout).ok_or_else(|| {
        ConsensusError::KernelInputMissing(format!("{}:{}", prevout.txid, prevout.vout))
    })?;

    let next_height = prev.height() + 1;
    let depth = next_height.saturating_sub(coin.height);
    if depth < params.coinbase_maturity {
        return Err(ConsensusError::KernelImmature {
            depth,
            required: params.coinbase_maturity,
        });
    }

    if time < coin.time as i64 {
        return Err(ConsensusError::InvalidCoinstakeTime(time));
    }

    let target = compact_to_target(bits).ok_or(ConsensusError::InvalidCompactTarget(bits))?;
    let weight = (coin.value / COIN).max(1) as u64;
    let weighted_target = target.saturating_mul(U256::from(weight));

    let hash = stake_kernel_hash(&prev.hash(), coin.time, prevout, time);
    if U256::from_little_endian(&hash) > weighted_target {
        return Err(ConsensusError::KernelTargetNotMet);
    }
    Ok(())
}

/// Verify the coinstake of a proof-of-stake block against the UTXO view.
pub fn check_proof_of_stake<H, F>(
    prev: &H,
    coinstake: &Transaction,
    bits: u32,
    time: i64,
    lookup: F,
    params: &ChainParams,
) -> ConsensusResult<()>
where
    H: HeaderView,
    F: Fn(&OutPoint) -> Option<StakeCoin>,
{
    if !coinstake.is_coinstake() {
        return Err(ConsensusError::MalformedCoinstake(
            "not a coinstake transaction".to_string(),
        ));
    }
    if time & params.stake_timestamp_mask as i64 != 0 {
        return Err(ConsensusError::InvalidCoinstakeTime(time));
    }
    check_kernel(prev, bits, time, &coinstake.inputs[0].prevout, lookup, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use florin_chain::{Network, Script, TxId, TxIn, TxOut};

    struct FakeHeader {
        hash: BlockHash,
        height: u32,
    }

    impl HeaderView for FakeHeader {
        fn height(&self) -> u32 {
            self.height
        }
        fn time(&self) -> i64 {
            0
        }
        fn bits(&self) -> u32 {
            0x207f_ffff
        }
        fn hash(&self) -> BlockHash {
            self.hash
        }
        fn is_proof_of_stake(&self) -> bool {
            false
        }
        fn prev(&self) -> Option<&Self> {
            None
        }
    }

    fn regtest() -> ChainParams {
        ChainParams::new(Network::Regtest)
    }

    fn mature_coin() -> StakeCoin {
        StakeCoin {
            value: 100 * COIN,
            time: 100,
            height: 1,
        }
    }

    #[test]
    fn test_kernel_passes_on_easy_target() {
        let params = regtest();
        let prev = FakeHeader {
            hash: BlockHash([3; 32]),
            height: 100,
        };
        let prevout = OutPoint::new(TxId([9; 32]), 0);
        let result = check_kernel(&prev, params.pos_limit_bits, 10_000, &prevout, |_| {
            Some(mature_coin())
        }, &params);
        assert!(result.is_ok());
    }

    #[test]
    fn test_kernel_missing_input() {
        let params = regtest();
        let prev = FakeHeader {
            hash: BlockHash([3; 32]),
            height: 100,
        };
        let prevout = OutPoint::new(TxId([9; 32]), 0);
        let result = check_kernel(&prev, params.pos_limit_bits, 10_000, &prevout, |_| None, &params);
        assert!(matches!(result, Err(ConsensusError::KernelInputMissing(_))));
    }

    #[test]
    fn test_kernel_immature_input() {
        let params = regtest();
        let prev = FakeHeader {
            hash: BlockHash([3; 32]),
            height: 3,
        };
        let prevout = OutPoint::new(TxId([9; 32]), 0);
        let result = check_kernel(&prev, params.pos_limit_bits, 10_000, &prevout, |_| {
            Some(mature_coin())
        }, &params);
        assert!(matches!(result, Err(ConsensusError::KernelImmature { .. })));
    }

    #[test]
    fn test_kernel_rejects_hard_target() {
        let params = regtest();
        let prev = FakeHeader {
            hash: BlockHash([3; 32]),
            height: 100,
        };
        let prevout = OutPoint::new(TxId([9; 32]), 0);
        // A target of one is effectively impossible.
        let result = check_kernel(&prev, 0x0300_0001, 10_000, &prevout, |_| {
            Some(StakeCoin {
                value: 1,
                time: 100,
                height: 1,
            })
        }, &params);
        assert!(matches!(result, Err(ConsensusError::KernelTargetNotMet)));
    }

    #[test]
    fn test_check_proof_of_stake_masked_time() {
        let params = regtest();
        let prev = FakeHeader {
            hash: BlockHash([3; 32]),
            height: 100,
        };
        let mut coinstake = Transaction::default();
        coinstake
            .inputs
            .push(TxIn::new(OutPoint::new(TxId([9; 32]), 0)));
        coinstake.outputs.push(TxOut::default());
        coinstake.outputs.push(TxOut::new(COIN, Script::new()));

        // Unmasked timestamp must be rejected.
        let result = check_proof_of_stake(&prev, &coinstake, params.pos_limit_bits, 10_001, |_| {
            Some(mature_coin())
        }, &params);
        assert!(matches!(
            result,
            Err(ConsensusError::InvalidCoinstakeTime(_))
        ));

        let result = check_proof_of_stake(&prev, &coinstake, params.pos_limit_bits, 10_000, |_| {
            Some(mature_coin())
        }, &params);
        assert!(result.is_ok());
    }
}
