// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! 128-bit leaf and node hashes.
//!
//! Hashes are xxh3-128 (seed 0) and travel as 32 lowercase hex digits,
//! high 64 bits first.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use xxhash_rust::xxh3::xxh3_128_with_seed;

/// A node hash in the tree (leaf, internal, or root).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafHash(pub u128);

/// Hash of a leaf with no items (xxh3-128 of the empty input).
pub const EMPTY_HASH: LeafHash = LeafHash(0x99aa_06d3_0147_98d8_6001_c324_468d_497f);

impl LeafHash {
    #[inline]
    pub fn high(&self) -> u64 {
        (self.0 >> 64) as u64
    }

    #[inline]
    pub fn low(&self) -> u64 {
        self.0 as u64
    }

    #[inline]
    pub fn is_empty_leaf(&self) -> bool {
        *self == EMPTY_HASH
    }
}

/// Hash an arbitrary buffer.
#[inline]
pub fn hash_bytes(bytes: &[u8]) -> LeafHash {
    LeafHash(xxh3_128_with_seed(bytes, 0))
}

/// Fold two child hashes into their parent.
///
/// The buffer holds each 64-bit half as little-endian bytes, i.e. each half of
/// the hex rendering byte-reversed: `left.high, left.low, right.high, right.low`.
pub fn combine(left: LeafHash, right: LeafHash) -> LeafHash {
    let mut buf = [0u8; 32];
    buf[0..8].copy_from_slice(&left.high().to_le_bytes());
    buf[8..16].copy_from_slice(&left.low().to_le_bytes());
    buf[16..24].copy_from_slice(&right.high().to_le_bytes());
    buf[24..32].copy_from_slice(&right.low().to_le_bytes());
    hash_bytes(&buf)
}

/// Hash the `(id, version)` pairs of one leaf, already in hashing order.
pub(crate) fn leaf_hash<I>(pairs: I) -> LeafHash
where
    I: IntoIterator<Item = (u64, u64)>,
{
    let mut buf = Vec::new();
    for (id, version) in pairs {
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&version.to_le_bytes());
    }
    if buf.is_empty() {
        return EMPTY_HASH;
    }
    hash_bytes(&buf)
}

impl fmt::Display for LeafHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for LeafHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LeafHash({self})")
    }
}

impl FromStr for LeafHash {
    type Err = hex::FromHexError;

    /// Parses up to 32 hex digits; shorter inputs are zero-padded on the left.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let padded = format!("{s:0>32}");
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(padded, &mut bytes)?;
        Ok(LeafHash(u128::from_be_bytes(bytes)))
    }
}

impl Serialize for LeafHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LeafHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Default for LeafHash {
    fn default() -> Self {
        EMPTY_HASH
    }
}
