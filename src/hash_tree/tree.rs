// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Keyed store of versioned items with per-leaf hashing.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument};

use super::hash::{combine, leaf_hash, LeafHash, EMPTY_HASH};
use crate::error::{Result, SyncError};
use crate::item::{Item, ObjectType, Operation};

/// Leaf contents: type -> id -> version. Sorted maps give hashing order for free.
type Leaf = BTreeMap<ObjectType, BTreeMap<u64, u64>>;

/// A hash tree over a fixed number of leaves.
///
/// # Example
///
/// ```
/// use hashtree_sync::{HashTree, Item, ObjectType, EMPTY_HASH};
///
/// let mut tree = HashTree::empty(4).unwrap();
/// assert!(tree.put_item(&Item::new(ObjectType::Participant, 5, 1)));
/// assert_ne!(tree.leaf_hash(1), Some(EMPTY_HASH));
/// assert_eq!(tree.leaf_hash(0), Some(EMPTY_HASH));
///
/// // Stale versions are ignored
/// assert!(!tree.put_item(&Item::new(ObjectType::Participant, 5, 1)));
/// ```
#[derive(Debug, Clone)]
pub struct HashTree {
    leaves: Vec<Leaf>,
    leaf_hashes: Vec<LeafHash>,
}

/// Leaf counts must be 0 or a power of two.
pub(crate) fn validate_leaf_count(leaf_count: usize) -> Result<()> {
    if leaf_count == 0 || leaf_count.is_power_of_two() {
        Ok(())
    } else {
        Err(SyncError::Configuration { leaf_count })
    }
}

impl HashTree {
    /// Build a tree pre-seeded with `items`.
    pub fn new<I>(items: I, leaf_count: usize) -> Result<Self>
    where
        I: IntoIterator<Item = Item>,
    {
        validate_leaf_count(leaf_count)?;
        let mut tree = Self {
            leaves: vec![Leaf::new(); leaf_count],
            leaf_hashes: vec![EMPTY_HASH; leaf_count],
        };
        let items: Vec<Item> = items.into_iter().collect();
        tree.put_items(&items);
        Ok(tree)
    }

    pub fn empty(leaf_count: usize) -> Result<Self> {
        Self::new(std::iter::empty(), leaf_count)
    }

    #[inline]
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn total_item_count(&self) -> usize {
        self.leaves
            .iter()
            .flat_map(|leaf| leaf.values())
            .map(BTreeMap::len)
            .sum()
    }

    #[inline]
    fn leaf_index(&self, id: u64) -> Option<usize> {
        if self.leaves.is_empty() {
            None
        } else {
            Some((id % self.leaves.len() as u64) as usize)
        }
    }

    /// Insert without rehashing. Returns the touched leaf when applied.
    fn put_unhashed(&mut self, item: &Item) -> Option<usize> {
        let index = self.leaf_index(item.id)?;
        let bucket = self.leaves[index].entry(item.object_type).or_default();
        match bucket.get(&item.id) {
            Some(&stored) if stored >= item.version => None,
            _ => {
                bucket.insert(item.id, item.version);
                Some(index)
            }
        }
    }

    /// Remove without rehashing. Returns the touched leaf when applied.
    fn remove_unhashed(&mut self, item: &Item) -> Option<usize> {
        let index = self.leaf_index(item.id)?;
        let leaf = &mut self.leaves[index];
        let bucket = leaf.get_mut(&item.object_type)?;
        let stored = *bucket.get(&item.id)?;
        if item.version < stored {
            return None;
        }
        bucket.remove(&item.id);
        if bucket.is_empty() {
            leaf.remove(&item.object_type);
        }
        Some(index)
    }

    fn refresh_leaf_hashes(&mut self, touched: BTreeSet<usize>) {
        for index in touched {
            self.leaf_hashes[index] = self.compute_leaf_hash(index);
        }
    }

    /// Insert or update one item. Applied only if newer than what is stored.
    pub fn put_item(&mut self, item: &Item) -> bool {
        self.put_items(std::slice::from_ref(item))[0]
    }

    /// Insert a batch; each touched leaf is rehashed once at the end.
    pub fn put_items(&mut self, items: &[Item]) -> Vec<bool> {
        let mut touched = BTreeSet::new();
        let applied = items
            .iter()
            .map(|item| match self.put_unhashed(item) {
                Some(index) => {
                    touched.insert(index);
                    true
                }
                None => false,
            })
            .collect();
        self.refresh_leaf_hashes(touched);
        applied
    }

    /// Remove one item if `item.version` is at least the stored version.
    pub fn remove_item(&mut self, item: &Item) -> bool {
        self.remove_items(std::slice::from_ref(item))[0]
    }

    pub fn remove_items(&mut self, items: &[Item]) -> Vec<bool> {
        let mut touched = BTreeSet::new();
        let applied = items
            .iter()
            .map(|item| match self.remove_unhashed(item) {
                Some(index) => {
                    touched.insert(index);
                    true
                }
                None => false,
            })
            .collect();
        self.refresh_leaf_hashes(touched);
        applied
    }

    /// Apply a mixed batch of updates and removals in order.
    pub fn update_items(&mut self, operations: &[Operation]) -> Vec<bool> {
        let mut touched = BTreeSet::new();
        let applied = operations
            .iter()
            .map(|op| {
                let result = match op {
                    Operation::Update(item) => self.put_unhashed(item),
                    Operation::Remove(item) => self.remove_unhashed(item),
                };
                result.map(|index| touched.insert(index)).is_some()
            })
            .collect();
        self.refresh_leaf_hashes(touched);
        applied
    }

    /// Hash the current contents of one leaf. Out-of-range leaves hash as empty.
    pub fn compute_leaf_hash(&self, index: usize) -> LeafHash {
        match self.leaves.get(index) {
            Some(leaf) => leaf_hash(
                leaf.values()
                    .flat_map(|bucket| bucket.iter().map(|(&id, &version)| (id, version))),
            ),
            None => EMPTY_HASH,
        }
    }

    /// Cached hash of one leaf.
    pub fn leaf_hash(&self, index: usize) -> Option<LeafHash> {
        self.leaf_hashes.get(index).copied()
    }

    pub fn leaf_hashes(&self) -> &[LeafHash] {
        &self.leaf_hashes
    }

    /// All node hashes: internal levels top-down (root first), then the leaves.
    pub fn compute_tree_hashes(&self) -> Vec<LeafHash> {
        if self.leaf_hashes.is_empty() {
            return vec![EMPTY_HASH];
        }

        let mut levels = vec![self.leaf_hashes.clone()];
        while let Some(current) = levels.last().filter(|level| level.len() > 1) {
            let next = current
                .chunks(2)
                .map(|pair| combine(pair[0], *pair.get(1).unwrap_or(&pair[0])))
                .collect();
            levels.push(next);
        }

        levels.into_iter().rev().flatten().collect()
    }

    pub fn root_hash(&self) -> LeafHash {
        self.compute_tree_hashes()
            .first()
            .copied()
            .unwrap_or(EMPTY_HASH)
    }

    pub fn hashes(&self) -> Vec<LeafHash> {
        self.compute_tree_hashes()
    }

    /// Items of one leaf, sorted by id. Invalid indices yield nothing.
    pub fn leaf_data(&self, index: usize) -> Vec<Item> {
        let Some(leaf) = self.leaves.get(index) else {
            return Vec::new();
        };
        let mut items: Vec<Item> = leaf
            .iter()
            .flat_map(|(&object_type, bucket)| {
                bucket
                    .iter()
                    .map(move |(&id, &version)| Item::new(object_type, id, version))
            })
            .collect();
        items.sort_by_key(|item| (item.id, item.object_type));
        items
    }

    /// Every stored item, leaf by leaf.
    pub fn all_items(&self) -> Vec<Item> {
        (0..self.leaves.len())
            .flat_map(|index| self.leaf_data(index))
            .collect()
    }

    /// Redistribute every item over `leaf_count` leaves.
    ///
    /// Returns `false` when the leaf count is unchanged.
    #[instrument(skip(self), fields(from = self.leaves.len()), level = "debug")]
    pub fn resize(&mut self, leaf_count: usize) -> Result<bool> {
        validate_leaf_count(leaf_count)?;
        if leaf_count == self.leaves.len() {
            return Ok(false);
        }

        let items = self.all_items();
        self.leaves = vec![Leaf::new(); leaf_count];
        self.leaf_hashes = vec![EMPTY_HASH; leaf_count];
        self.put_items(&items);

        debug!(items = items.len(), "Hash tree resized");
        Ok(true)
    }

    /// Leaf indices whose hash differs from the leaf section of `external`.
    ///
    /// `external` is laid out like [`compute_tree_hashes`](Self::compute_tree_hashes).
    /// A list too short to hold a full leaf section marks every leaf divergent.
    pub fn diff_hashes(&self, external: &[LeafHash]) -> Vec<usize> {
        let leaf_count = self.leaves.len();
        if leaf_count == 0 {
            return Vec::new();
        }
        if external.len() < leaf_count {
            return (0..leaf_count).collect();
        }

        let remote_leaves = &external[external.len() - leaf_count..];
        self.leaf_hashes
            .iter()
            .zip(remote_leaves)
            .enumerate()
            .filter(|(_, (local, remote))| local != remote)
            .map(|(index, _)| index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: u64, version: u64) -> Item {
        Item::new(ObjectType::Participant, id, version)
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        for bad in [3, 5, 6, 12, 100] {
            let err = HashTree::empty(bad).unwrap_err();
            assert!(matches!(err, SyncError::Configuration { leaf_count } if leaf_count == bad));
        }
        for good in [0, 1, 2, 4, 64] {
            assert!(HashTree::empty(good).is_ok());
        }

        let mut tree = HashTree::empty(4).unwrap();
        assert!(tree.resize(7).is_err());
        assert_eq!(tree.leaf_count(), 4);
    }

    #[test]
    fn test_empty_tree_root() {
        let tree = HashTree::empty(4).unwrap();
        let pair = combine(EMPTY_HASH, EMPTY_HASH);
        assert_eq!(tree.root_hash(), combine(pair, pair));

        let hashes = tree.compute_tree_hashes();
        assert_eq!(hashes.len(), 7);
        assert_eq!(&hashes[1..3], &[pair, pair]);
        assert!(hashes[3..].iter().all(|h| *h == EMPTY_HASH));
    }

    #[test]
    fn test_zero_leaves() {
        let mut tree = HashTree::empty(0).unwrap();
        assert_eq!(tree.compute_tree_hashes(), vec![EMPTY_HASH]);
        assert_eq!(tree.root_hash(), EMPTY_HASH);
        assert!(!tree.put_item(&p(1, 1)));
        assert_eq!(tree.total_item_count(), 0);
        assert!(tree.diff_hashes(&[EMPTY_HASH]).is_empty());
        assert!(tree.diff_hashes(&[LeafHash(1), LeafHash(2)]).is_empty());
    }

    #[test]
    fn test_single_leaf_root_is_leaf() {
        let tree = HashTree::new([p(1, 1)], 1).unwrap();
        assert_eq!(tree.compute_tree_hashes(), vec![tree.leaf_hash(0).unwrap()]);
    }

    #[test]
    fn test_put_changes_only_owning_leaf() {
        let mut tree = HashTree::empty(4).unwrap();
        let before = tree.compute_tree_hashes();

        assert!(tree.put_item(&p(5, 1)));
        let after = tree.compute_tree_hashes();

        // [root, n0, n1, l0, l1, l2, l3]
        assert_ne!(before[0], after[0]);
        assert_eq!(before[2], after[2]);
        assert_eq!(after[3], EMPTY_HASH);
        assert_ne!(after[4], EMPTY_HASH);
        assert_eq!(after[5], EMPTY_HASH);
        assert_eq!(after[6], EMPTY_HASH);
    }

    #[test]
    fn test_stale_put_is_noop() {
        let mut tree = HashTree::new([p(5, 3)], 4).unwrap();
        let root = tree.root_hash();

        assert!(!tree.put_item(&p(5, 3)));
        assert!(!tree.put_item(&p(5, 2)));
        assert_eq!(tree.root_hash(), root);

        assert!(tree.put_item(&p(5, 4)));
        assert_ne!(tree.root_hash(), root);
        assert_eq!(tree.leaf_data(1), vec![p(5, 4)]);
    }

    #[test]
    fn test_remove_requires_version_at_least_stored() {
        let mut tree = HashTree::empty(4).unwrap();
        tree.put_item(&p(5, 1));

        assert!(!tree.remove_item(&p(5, 0)));
        assert_ne!(tree.leaf_hash(1), Some(EMPTY_HASH));

        assert!(tree.remove_item(&p(5, 1)));
        assert_eq!(tree.leaf_hash(1), Some(EMPTY_HASH));
        assert_eq!(tree.root_hash(), HashTree::empty(4).unwrap().root_hash());

        // Already gone
        assert!(!tree.remove_item(&p(5, 9)));
    }

    #[test]
    fn test_remove_matches_type() {
        let mut tree = HashTree::new([p(5, 1)], 4).unwrap();
        assert!(!tree.remove_item(&Item::new(ObjectType::Locus, 5, 1)));
        assert_eq!(tree.total_item_count(), 1);
    }

    #[test]
    fn test_batch_flags_and_mixed_updates() {
        let mut tree = HashTree::new([p(1, 1), p(2, 1)], 2).unwrap();
        let applied = tree.put_items(&[p(1, 1), p(3, 1), p(2, 2)]);
        assert_eq!(applied, vec![false, true, true]);

        let applied = tree.update_items(&[
            Operation::Remove(p(1, 1)),
            Operation::Update(p(4, 1)),
            Operation::Remove(p(2, 1)),
        ]);
        assert_eq!(applied, vec![true, true, false]);
        assert_eq!(tree.total_item_count(), 3);

        let applied = tree.remove_items(&[p(3, 1), p(4, 1)]);
        assert_eq!(applied, vec![true, true]);
        assert_eq!(tree.all_items(), vec![p(2, 2)]);
    }

    #[test]
    fn test_leaf_hash_follows_type_then_id_order() {
        let tree = HashTree::new(
            [
                Item::new(ObjectType::SelfState, 4, 2),
                p(8, 1),
                Item::new(ObjectType::Locus, 0, 7),
                p(0, 3),
            ],
            4,
        )
        .unwrap();

        // locus < participant < self; ids ascending within a type
        let expected = leaf_hash([(0, 7), (0, 3), (8, 1), (4, 2)]);
        assert_eq!(tree.leaf_hash(0), Some(expected));
        assert_eq!(tree.compute_leaf_hash(0), expected);
    }

    #[test]
    fn test_leaf_data_sorted_by_id() {
        let tree = HashTree::new([p(12, 1), p(4, 1), Item::new(ObjectType::Info, 8, 1)], 4).unwrap();
        let ids: Vec<u64> = tree.leaf_data(0).iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![4, 8, 12]);
        assert!(tree.leaf_data(17).is_empty());
    }

    #[test]
    fn test_resize_redistributes_and_round_trips() {
        let items: Vec<Item> = (0..20).map(|id| p(id, id + 1)).collect();
        let mut tree = HashTree::new(items.clone(), 4).unwrap();
        let root = tree.root_hash();

        assert!(!tree.resize(4).unwrap());
        assert!(tree.resize(16).unwrap());
        assert_eq!(tree.leaf_count(), 16);
        assert_eq!(tree.total_item_count(), 20);
        assert_eq!(tree.leaf_data(13), vec![p(13, 14)]);

        assert!(tree.resize(4).unwrap());
        assert_eq!(tree.root_hash(), root);
        assert_eq!(tree.root_hash(), HashTree::new(items, 4).unwrap().root_hash());
    }

    #[test]
    fn test_diff_hashes() {
        let local = HashTree::new([p(1, 1), p(2, 1)], 4).unwrap();
        assert!(local.diff_hashes(&local.hashes()).is_empty());

        let remote = HashTree::new([p(1, 2), p(2, 1), p(7, 1)], 4).unwrap();
        assert_eq!(local.diff_hashes(&remote.hashes()), vec![1, 3]);

        // Only the trailing leaf section matters
        let leaves_only = remote.leaf_hashes().to_vec();
        assert_eq!(local.diff_hashes(&leaves_only), vec![1, 3]);

        // Too short: everything diverges
        assert_eq!(local.diff_hashes(&[EMPTY_HASH]), vec![0, 1, 2, 3]);
    }
}
