//! Hash newtypes and merkle computation.

use crate::{ChainError, ChainResult};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Compute double-SHA256 of the given bytes.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

fn fmt_reversed_hex(bytes: &[u8; 32], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut reversed = *bytes;
    reversed.reverse();
    f.write_str(&hex::encode(reversed))
}

fn parse_reversed_hex(s: &str) -> ChainResult<[u8; 32]> {
    let raw = hex::decode(s).map_err(|_| ChainError::InvalidHash(s.to_string()))?;
    let mut bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| ChainError::InvalidHash(s.to_string()))?;
    bytes.reverse();
    Ok(bytes)
}

/// A block hash.
///
/// Displayed in byte-reversed hex, matching the convention of the
/// chain family this node descends from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// The all-zero hash.
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Whether this is the all-zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_reversed_hex(&self.0, f)
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self)
    }
}

impl FromStr for BlockHash {
    type Err = ChainError;

    fn from_str(s: &str) -> ChainResult<Self> {
        Ok(Self(parse_reversed_hex(s)?))
    }
}

/// A transaction id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_reversed_hex(&self.0, f)
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self)
    }
}

impl FromStr for TxId {
    type Err = ChainError;

    fn from_str(s: &str) -> ChainResult<Self> {
        Ok(Self(parse_reversed_hex(s)?))
    }
}

/// Compute a merkle root over a list of 32-byte leaf hashes.
///
/// Uses the duplicate-last-on-odd rule of the ancestor chain family.
/// An empty list hashes to all zeros.
pub fn merkle_root_from_hashes(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut level: Vec<[u8; 32]> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len() / 2 + 1);
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(left);
            buf[32..].copy_from_slice(right);
            next.push(sha256d(&buf));
        }
        level = next;
    }
    level[0]
}
