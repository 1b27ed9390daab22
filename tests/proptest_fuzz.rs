//! Property-based tests for hash tree invariants and message parsing.
//!
//! Uses proptest to generate random item sets and malformed inputs and verify
//! the tree's algebraic properties hold and parsing never panics.
//!
//! Run with: `cargo test --test proptest_fuzz`

use proptest::prelude::*;
use serde_json::Value;

use hashtree_sync::discovery::discover;
use hashtree_sync::{HashTree, HashTreeMessage, Item, ObjectType, StateUpdate, TaggedObject, EMPTY_HASH};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn object_type_strategy() -> impl Strategy<Value = ObjectType> {
    prop::sample::select(ObjectType::ALL.to_vec())
}

fn item_strategy() -> impl Strategy<Value = Item> {
    (object_type_strategy(), 0u64..64, 0u64..8)
        .prop_map(|(object_type, id, version)| Item::new(object_type, id, version))
}

/// Items with unique (type, id) keys, so insertion order cannot matter
fn unique_items_strategy() -> impl Strategy<Value = Vec<Item>> {
    prop::collection::btree_map((object_type_strategy(), 0u64..256), 0u64..100, 0..40).prop_map(
        |entries| {
            entries
                .into_iter()
                .map(|((object_type, id), version)| Item::new(object_type, id, version))
                .collect()
        },
    )
}

/// Single-type items: leaf hashes cover (id, version) only, so mixing types
/// could make two different leaves hash alike
fn participant_items_strategy() -> impl Strategy<Value = Vec<Item>> {
    prop::collection::btree_map(0u64..256, 0u64..100, 0..40).prop_map(|entries| {
        entries
            .into_iter()
            .map(|(id, version)| Item::new(ObjectType::Participant, id, version))
            .collect()
    })
}

fn leaf_count_strategy() -> impl Strategy<Value = usize> {
    (0u32..7).prop_map(|shift| 1usize << shift)
}

/// Generate arbitrary JSON values (including invalid structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,   // depth
        64,  // max nodes
        10,  // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(
                    prop_oneof![Just("htMeta".to_string()), ".*".prop_map(String::from)],
                    inner,
                    0..10
                )
                .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

// =============================================================================
// Hash Tree Properties
// =============================================================================

proptest! {
    /// Root depends only on the final item set, not insertion order
    #[test]
    fn prop_root_order_independent(
        items in unique_items_strategy(),
        leaf_count in leaf_count_strategy(),
        seed in any::<u64>(),
    ) {
        let forward = HashTree::new(items.clone(), leaf_count).unwrap();

        let mut shuffled = items;
        let len = shuffled.len();
        if len > 1 {
            for i in 0..len {
                let j = (seed.wrapping_mul(i as u64 + 1) % len as u64) as usize;
                shuffled.swap(i, j);
            }
        }
        let reordered = HashTree::new(shuffled, leaf_count).unwrap();

        prop_assert_eq!(forward.root_hash(), reordered.root_hash());
    }

    /// Stale or duplicate puts never change the tree
    #[test]
    fn prop_stale_put_is_noop(
        items in unique_items_strategy(),
        probe in item_strategy(),
    ) {
        let mut tree = HashTree::new(items, 8).unwrap();
        let before = tree.hashes();

        let stored = tree
            .leaf_data((probe.id % 8) as usize)
            .into_iter()
            .find(|item| item.key() == probe.key());

        let applied = tree.put_item(&probe);
        match stored {
            Some(stored) if stored.version >= probe.version => {
                prop_assert!(!applied);
                prop_assert_eq!(tree.hashes(), before);
            }
            _ => {
                prop_assert!(applied);
                prop_assert_ne!(tree.root_hash(), before[0]);
            }
        }
    }

    /// A newer put changes exactly the owning leaf
    #[test]
    fn prop_newer_put_touches_one_leaf(
        items in unique_items_strategy(),
        leaf_count in (1u32..6).prop_map(|s| 1usize << s),
        object_type in object_type_strategy(),
        id in 0u64..256,
    ) {
        let mut tree = HashTree::new(items, leaf_count).unwrap();
        let before = tree.leaf_hashes().to_vec();

        prop_assert!(tree.put_item(&Item::new(object_type, id, 1000)));

        let owner = (id % leaf_count as u64) as usize;
        for (index, (old, new)) in before.iter().zip(tree.leaf_hashes()).enumerate() {
            if index == owner {
                prop_assert_ne!(old, new);
            } else {
                prop_assert_eq!(old, new);
            }
        }
    }

    /// Resizing away and back reproduces the root
    #[test]
    fn prop_resize_round_trip(
        items in unique_items_strategy(),
        from in leaf_count_strategy(),
        to in leaf_count_strategy(),
    ) {
        let mut tree = HashTree::new(items.clone(), from).unwrap();
        let root = tree.root_hash();
        let count = tree.total_item_count();

        tree.resize(to).unwrap();
        if to > 0 {
            prop_assert_eq!(tree.total_item_count(), count);
        }
        tree.resize(from).unwrap();

        // A zero-leaf tree cannot hold items, so only compare when nothing was dropped
        if to > 0 {
            prop_assert_eq!(tree.root_hash(), root);
        }
    }

    /// A tree never diverges from itself
    #[test]
    fn prop_self_diff_empty(
        items in unique_items_strategy(),
        leaf_count in leaf_count_strategy(),
    ) {
        let tree = HashTree::new(items, leaf_count).unwrap();
        prop_assert!(tree.diff_hashes(&tree.hashes()).is_empty());
    }

    /// Diffing against another tree finds exactly the leaves whose contents differ
    #[test]
    fn prop_diff_matches_leaf_contents(
        left in participant_items_strategy(),
        right in participant_items_strategy(),
    ) {
        let a = HashTree::new(left, 16).unwrap();
        let b = HashTree::new(right, 16).unwrap();

        let expected: Vec<usize> = (0..16).filter(|&i| a.leaf_data(i) != b.leaf_data(i)).collect();
        prop_assert_eq!(a.diff_hashes(&b.hashes()), expected);
    }

    /// Removing everything returns every leaf to the empty hash
    #[test]
    fn prop_remove_all_restores_empty(items in unique_items_strategy()) {
        let mut tree = HashTree::new(items.clone(), 4).unwrap();
        let results = tree.remove_items(&items);
        prop_assert!(results.iter().all(|&removed| removed));
        prop_assert_eq!(tree.total_item_count(), 0);
        prop_assert!(tree.leaf_hashes().iter().all(|&hash| hash == EMPTY_HASH));
        prop_assert_eq!(tree.root_hash(), HashTree::empty(4).unwrap().root_hash());
    }

    /// Non power-of-two leaf counts are always rejected
    #[test]
    fn prop_invalid_leaf_count_rejected(leaf_count in 1usize..4096) {
        let result = HashTree::empty(leaf_count);
        prop_assert_eq!(result.is_ok(), leaf_count.is_power_of_two());
    }
}

// =============================================================================
// Message Fuzz Tests
// =============================================================================

proptest! {
    /// Message deserialization should never panic on arbitrary bytes
    #[test]
    fn fuzz_message_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
        let _ = serde_json::from_slice::<HashTreeMessage>(&bytes);
        let _ = serde_json::from_slice::<TaggedObject>(&bytes);
    }

    /// Arbitrary JSON either parses as a message or fails cleanly
    #[test]
    fn fuzz_message_from_arbitrary_json(json in arbitrary_json_strategy()) {
        let _ = serde_json::from_value::<HashTreeMessage>(json.clone());
        let _ = serde_json::from_value::<StateUpdate>(json);
    }

    /// Discovery walks any document without panicking
    #[test]
    fn fuzz_discovery_arbitrary_json(json in arbitrary_json_strategy()) {
        for object in discover(&json) {
            prop_assert!(object.data.is_some());
        }
    }
}
