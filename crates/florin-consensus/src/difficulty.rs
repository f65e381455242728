//! Compact difficulty encoding and the continuous retarget.

use crate::HeaderView;
use florin_chain::{BlockHash, ChainParams};
use primitive_types::U256;

/// Expand a compact bits value into a 256-bit target.
///
/// Returns `None` for zero, negative, or overflowing encodings.
pub fn compact_to_target(bits: u32) -> Option<U256> {
    let size = (bits >> 24) as usize;
    let word = bits & 0x007f_ffff;
    if bits & 0x0080_0000 != 0 {
        return None; // sign bit
    }
    if word == 0 {
        return None;
    }
    let target = if size <= 3 {
        U256::from(word >> (8 * (3 - size)))
    } else {
        if size > 32 {
            return None;
        }
        U256::from(word) << (8 * (size - 3))
    };
    if target.is_zero() {
        None
    } else {
        Some(target)
    }
}

/// Compress a target into compact bits form.
pub fn target_to_compact(target: U256) -> u32 {
    if target.is_zero() {
        return 0;
    }
    let mut size = (target.bits() + 7) / 8;
    let mut word: u32 = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        ((target >> (8 * (size - 3))).low_u64()) as u32
    };
    // Avoid setting the sign bit.
    if word & 0x0080_0000 != 0 {
        word >>= 8;
        size += 1;
    }
    ((size as u32) << 24) | word
}

/// Check that a block hash satisfies its claimed compact target, and
/// that the target is within the chain's proof-of-work limit.
pub fn check_proof_of_work(hash: &BlockHash, bits: u32, params: &ChainParams) -> bool {
    let target = match compact_to_target(bits) {
        Some(t) => t,
        None => return false,
    };
    let limit = match compact_to_target(params.pow_limit_bits) {
        Some(t) => t,
        None => return false,
    };
    if target > limit {
        return false;
    }
    U256::from_little_endian(hash.as_bytes()) <= target
}

/// Walk back to the most recent block of the requested proof type.
fn last_block_of_type<H: HeaderView>(index: &H, proof_of_stake: bool) -> Option<&H> {
    let mut cursor = Some(index);
    while let Some(block) = cursor {
        if block.is_proof_of_stake() == proof_of_stake {
            return Some(block);
        }
        cursor = block.prev();
    }
    None
}

/// Compute the required compact target for the block following `prev`.
///
/// Continuous per-proof-type retarget: each block nudges the target of
/// its proof type toward the configured spacing using the actual spacing
/// of the last two same-type blocks.
pub fn get_next_target_required<H: HeaderView>(
    prev: &H,
    params: &ChainParams,
    proof_of_stake: bool,
) -> u32 {
    let limit_bits = if proof_of_stake {
        params.pos_limit_bits
    } else {
        params.pow_limit_bits
    };

    let last = match last_block_of_type(prev, proof_of_stake) {
        Some(b) => b,
        None => return limit_bits,
    };
    let last_prev = match last.prev().and_then(|p| last_block_of_type(p, proof_of_stake)) {
        Some(b) => b,
        None => return limit_bits,
    };

    let mut actual_spacing = last.time() - last_prev.time();
    if actual_spacing < 0 {
        actual_spacing = params.target_spacing;
    }

    let limit = match compact_to_target(limit_bits) {
        Some(t) => t,
        None => return limit_bits,
    };
    let last_target = match compact_to_target(last.bits()) {
        Some(t) => t,
        None => return limit_bits,
    };

    // new = old * ((interval - 1) * spacing + 2 * actual) / ((interval + 1) * spacing)
    let interval = params.target_timespan / params.target_spacing;
    let numerator = U256::from(((interval - 1) * params.target_spacing + 2 * actual_spacing) as u64);
    let denominator = U256::from(((interval + 1) * params.target_spacing) as u64);

    let new_target = last_target
        .checked_mul(numerator)
        .map(|t| t / denominator)
        .unwrap_or(limit);

    if new_target > limit || new_target.is_zero() {
        limit_bits
    } else {
        target_to_compact(new_target)
    }
}

/// Floating-point difficulty relative to the conventional 0x1d00ffff
/// reference target, as reported by the RPC surface.
pub fn difficulty_from_bits(bits: u32) -> f64 {
    let mut shift = (bits >> 24) & 0xff;
    let word = bits & 0x00ff_ffff;
    if word == 0 {
        return 0.0;
    }
    let mut diff = 65535.0 / word as f64;
    while shift < 29 {
        diff *= 256.0;
        shift += 1;
    }
    while shift > 29 {
        diff /= 256.0;
        shift -= 1;
    }
    diff
}
