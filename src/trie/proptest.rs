//! Property-Based Tests for the Trie and Codec
//!
//! # Test Properties
//!
//! 1. **Shape Equivalence**: trie and matrix encodings decode to the same tree
//! 2. **Canonical Shape**: no empty branch survives any insert/remove sequence
//! 3. **Selection**: selecting a removed subtree yields nothing

#![cfg(test)]

use proptest::prelude::*;
use serde_json::{json, Value};

use super::codec::{decode_data, encode, Mode};
use super::node::{Node, Target};
use crate::key::{Level, Segment};

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for string keys that no container would coerce to integers.
fn token_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["A", "B", "K", "X", "07", "a-1"]).prop_map(String::from)
}

/// Strategy for a full leaf key below L5.
fn leaf_path_strategy() -> impl Strategy<Value = Vec<Segment>> {
    (0u64..3, token_strategy(), token_strategy(), token_strategy(), 0u64..4).prop_map(
        |(l5, l4, l3, l2, l1)| {
            vec![
                Segment::Int(l5),
                Segment::Str(l4),
                Segment::Str(l3),
                Segment::Str(l2),
                Segment::Int(l1),
            ]
        },
    )
}

/// Strategy for payloads of mixed JSON shape.
fn payload_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,6}".prop_map(Value::from),
        Just(json!({"nested": [1, 2, 3]})),
        Just(Value::Null),
    ]
}

fn tree_strategy() -> impl Strategy<Value = Node> {
    prop::collection::vec((leaf_path_strategy(), payload_strategy()), 0..40).prop_map(|leaves| {
        let mut node = Node::branch();
        for (path, payload) in leaves {
            node.insert(&path, payload);
        }
        node
    })
}

/// Strategy for an operation sequence: insert (true) or remove a prefix (false).
fn ops_strategy() -> impl Strategy<Value = Vec<(bool, Vec<Segment>, usize)>> {
    prop::collection::vec((any::<bool>(), leaf_path_strategy(), 1usize..=5), 1..60)
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Trie and matrix encodings of the same tree decode identically.
    #[test]
    fn prop_trie_matrix_equivalence(tree in tree_strategy()) {
        let trie = encode(&tree, Level::L5, Mode::Trie);
        let matrix = encode(&tree, Level::L5, Mode::Matrix);

        let from_trie = decode_data(&trie, Level::L5, Mode::Trie, true).unwrap();
        let from_matrix = decode_data(&matrix, Level::L5, Mode::Matrix, true).unwrap();

        prop_assert_eq!(&from_trie, &tree);
        prop_assert_eq!(&from_matrix, &tree);
    }

    /// Matrix output has exactly one record per leaf.
    #[test]
    fn prop_matrix_record_per_leaf(tree in tree_strategy()) {
        let matrix = encode(&tree, Level::L5, Mode::Matrix);
        let records = matrix.as_array().map(Vec::len).unwrap_or_default();
        prop_assert_eq!(records as u64, tree.leaf_count());
    }

    /// Any insert/remove sequence leaves the tree canonical.
    #[test]
    fn prop_no_dangling_branches(ops in ops_strategy()) {
        let mut tree = Node::branch();
        for (insert, path, depth) in ops {
            if insert {
                tree.insert(&path, json!(depth));
            } else {
                tree.remove(&path[..depth]);
            }
            prop_assert!(tree.is_canonical(5));
        }
    }

    /// After removing a subtree, selecting it yields an empty tree.
    #[test]
    fn prop_removed_subtree_selects_nothing(
        tree in tree_strategy(),
        path in leaf_path_strategy(),
        depth in 1usize..=5,
    ) {
        let mut tree = tree;
        tree.remove(&path[..depth]);

        let mut target = Target::default();
        target.add_path(&path[..depth]);
        prop_assert!(tree.select(&target).is_empty());
    }
}
