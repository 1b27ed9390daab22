// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fixed-width hash tree for efficient sync verification.
//!
//! # Design
//!
//! Items are bucketed into a power-of-two number of leaves by `id mod leaf_count`.
//! Each leaf folds its sorted `(id, version)` pairs into a 128-bit hash, and leaf
//! hashes fold pairwise into a single root:
//!
//! ```text
//!                 root = combine(n0, n1)
//!                /                     \
//!       n0 = combine(l0, l1)     n1 = combine(l2, l3)
//!        /        \                /        \
//!      l0          l1            l2          l3
//!   ids 0,4,8   ids 1,5,9     ids 2,6     ids 3,7,11
//! ```
//!
//! # Sync Protocol
//!
//! 1. Remote reports its root hash (heartbeat)
//! 2. If different, local fetches the remote's full hash list
//! 3. Local diffs the leaf section against its own leaf hashes
//! 4. Local sends its item identities for the differing leaves only
//! 5. Remote pushes back whatever the local side is missing or has stale
//!
//! This is O(divergent leaves) per round instead of O(total items).

mod hash;
mod tree;

pub use hash::{combine, hash_bytes, LeafHash, EMPTY_HASH};
pub use tree::HashTree;
pub(crate) use tree::validate_leaf_count;
