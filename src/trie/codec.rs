//! Trie/Matrix Codec
//!
//! Converts between the two wire shapes callers use and the internal trees.
//!
//! ```text
//! trie:    {"1": {"X": {"K": {"K": {"1": "a", "2": "b"}}}}}
//! matrix:  [{"l5": 1, "l4": "X", "l3": "K", "l2": "K", "l1": 1, "l0": "a"},
//!           {"l5": 1, "l4": "X", "l3": "K", "l2": "K", "l1": 2, "l0": "b"}]
//! ```
//!
//! Both decode to the same [`Node`]. Depth decides where a trie ends: the
//! value under an L1 key is always the payload, whatever its JSON type.
//! Matrix records may stop above L1 and carry the remaining levels as a
//! nested trie in `l0`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::node::{Node, Target};
use crate::error::{Error, Result};
use crate::key::{validator, Level, Segment};

/// Field carrying the payload (or a nested trie) in matrix records
pub const PAYLOAD_FIELD: &str = "l0";

/// Terminal value that drops a whole subtree when trapping is enabled
pub const WILDCARD: &str = "*";

// =============================================================================
// Mode
// =============================================================================

/// Wire shape of a request or response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Nested maps
    #[default]
    Trie,
    /// Flat list of records
    Matrix,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Trie => write!(f, "trie"),
            Mode::Matrix => write!(f, "matrix"),
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "trie" => Ok(Mode::Trie),
            "matrix" => Ok(Mode::Matrix),
            other => Err(Error::InvalidControl(format!(
                "mode must be 'trie' or 'matrix', got '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// Target Options
// =============================================================================

/// How terminal values in a request tree are interpreted
#[derive(Debug, Clone)]
pub enum Terminals {
    /// Any scalar selects the whole subtree (queries)
    Any,
    /// Only the wildcard, and only at the listed levels (drops)
    Trapped(BTreeSet<Level>),
}

/// Options for decoding a request tree
#[derive(Debug, Clone)]
pub struct TargetOptions {
    /// Apply strict key validation
    pub strict: bool,
    /// Terminal interpretation
    pub terminals: Terminals,
}

impl TargetOptions {
    /// Options for query requests
    pub fn query(strict: bool) -> Self {
        Self {
            strict,
            terminals: Terminals::Any,
        }
    }

    /// Options for drop requests with wildcards enabled at `trap` levels
    pub fn drop(strict: bool, trap: BTreeSet<Level>) -> Self {
        Self {
            strict,
            terminals: Terminals::Trapped(trap),
        }
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode data whose top keys sit at `level` into a canonical branch
pub fn decode_data(value: &Value, level: Level, mode: Mode, strict: bool) -> Result<Node> {
    match mode {
        Mode::Trie => decode_trie_data(value, level, strict),
        Mode::Matrix => decode_matrix_data(value, level, strict),
    }
}

/// Decode a request tree whose top keys sit at `level`
pub fn decode_target(
    value: &Value,
    level: Level,
    mode: Mode,
    opts: &TargetOptions,
) -> Result<Target> {
    match mode {
        Mode::Trie => decode_trie_target(value, level, opts),
        Mode::Matrix => decode_matrix_target(value, level, opts),
    }
}

fn decode_trie_data(value: &Value, level: Level, strict: bool) -> Result<Node> {
    let map = value.as_object().ok_or_else(|| {
        Error::invalid_key(format!("expected a map of {} keys", level))
    })?;
    let mut node = Node::branch();
    for (key, child) in map {
        let segment = validator::map_key(level, key, strict)?;
        let subtree = match level.child() {
            None => Node::Leaf(child.clone()),
            Some(next) => decode_trie_data(child, next, strict)?,
        };
        if subtree.is_empty() {
            continue;
        }
        if node.graft(&[segment.clone()], subtree).is_some() {
            return Err(Error::DuplicateKey {
                key: format!("{} key '{}'", level, segment),
            });
        }
    }
    Ok(node)
}

fn decode_matrix_data(value: &Value, level: Level, strict: bool) -> Result<Node> {
    let records = value
        .as_array()
        .ok_or_else(|| Error::invalid_key("expected a list of matrix records"))?;
    let mut node = Node::branch();
    for record in records {
        let (path, next) = record_path(record, level, strict)?;
        let subtree = match (next, record.get(PAYLOAD_FIELD)) {
            (None, Some(payload)) => Node::Leaf(payload.clone()),
            (Some(next), Some(nested)) => decode_trie_data(nested, next, strict)?,
            (_, None) => {
                return Err(Error::invalid_key(format!(
                    "matrix record {} has no '{}' field",
                    record, PAYLOAD_FIELD
                )))
            }
        };
        for (rel, payload) in subtree_leaves(&subtree) {
            let full: Vec<Segment> = path.iter().cloned().chain(rel).collect();
            if node.insert(&full, payload.clone()).is_some() {
                return Err(Error::DuplicateKey {
                    key: display_path(&full),
                });
            }
        }
    }
    Ok(node)
}

fn decode_trie_target(value: &Value, level: Level, opts: &TargetOptions) -> Result<Target> {
    match value {
        Value::Object(map) => {
            let mut target = Target::default();
            for (key, child) in map {
                let segment = validator::map_key(level, key, opts.strict)?;
                let sub = decode_terminal(child, level, opts)?;
                if let Target::Children(children) = &mut target {
                    children.entry(segment).or_default().merge(sub);
                }
            }
            Ok(target)
        }
        Value::Array(_) => {
            let mut target = Target::default();
            for segment in validator::segments(level, value, opts.strict)? {
                target.add_path(&[segment]);
            }
            Ok(target)
        }
        other => Err(Error::invalid_key(format!(
            "expected a map or set of {} keys, got {}",
            level, other
        ))),
    }
}

/// Decode the value found under a key of `level`
fn decode_terminal(value: &Value, level: Level, opts: &TargetOptions) -> Result<Target> {
    let Some(next) = level.child() else {
        return Ok(Target::All);
    };
    match value {
        Value::Object(_) | Value::Array(_) => decode_trie_target(value, next, opts),
        scalar => match &opts.terminals {
            Terminals::Any => Ok(Target::All),
            Terminals::Trapped(levels) => match scalar.as_str() {
                Some(WILDCARD) if levels.contains(&level) => Ok(Target::All),
                Some(WILDCARD) => Err(Error::invalid_key(format!(
                    "wildcard drop at {} requires trap_{}",
                    level,
                    level.name()
                ))),
                _ => Err(Error::invalid_key(format!(
                    "drop terminal at {} must be a map, a set or '{}', got {}",
                    level, WILDCARD, scalar
                ))),
            },
        },
    }
}

fn decode_matrix_target(value: &Value, level: Level, opts: &TargetOptions) -> Result<Target> {
    let records = value
        .as_array()
        .ok_or_else(|| Error::invalid_key("expected a list of matrix records"))?;
    let mut target = Target::default();
    for record in records {
        let (path, next) = record_path(record, level, opts.strict)?;
        let nested = record.get(PAYLOAD_FIELD);
        let sub = match (next, nested) {
            (Some(next), Some(nested @ (Value::Object(_) | Value::Array(_)))) => {
                decode_trie_target(nested, next, opts)?
            }
            _ => Target::All,
        };
        let mut single = Target::default();
        graft_target(&mut single, &path, sub);
        target.merge(single);
    }
    Ok(target)
}

fn graft_target(target: &mut Target, path: &[Segment], sub: Target) {
    let Some((first, rest)) = path.split_first() else {
        *target = sub;
        return;
    };
    if let Target::Children(children) = target {
        graft_target(children.entry(first.clone()).or_default(), rest, sub);
    }
}

/// Read the contiguous key fields of a record starting at `level`.
///
/// Returns the segments and the first level the record leaves unnamed.
fn record_path(
    record: &Value,
    level: Level,
    strict: bool,
) -> Result<(Vec<Segment>, Option<Level>)> {
    let fields: &Map<String, Value> = record
        .as_object()
        .ok_or_else(|| Error::invalid_key(format!("matrix record must be a map, got {}", record)))?;
    let levels = &Level::ALL[level.depth()..];
    let mut path = Vec::new();
    let mut next: Option<Level> = None;
    for &current in levels {
        match fields.get(current.name()) {
            Some(value) if next.is_none() => path.push(validator::segment(current, value, strict)?),
            Some(_) => {
                return Err(Error::invalid_key(format!(
                    "matrix record {} skips {}",
                    record,
                    next.map(|l| l.to_string()).unwrap_or_default()
                )))
            }
            None => {
                if next.is_none() {
                    next = Some(current);
                }
            }
        }
    }
    if path.is_empty() {
        return Err(Error::invalid_key(format!(
            "matrix record {} names no {} key",
            record, level
        )));
    }
    Ok((path, next))
}

fn subtree_leaves(node: &Node) -> Vec<(Vec<Segment>, &Value)> {
    match node {
        Node::Leaf(value) => vec![(Vec::new(), value)],
        Node::Branch(_) => node.leaves(),
    }
}

fn display_path(path: &[Segment]) -> String {
    path.iter().map(|s| format!("/{}", s)).collect()
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode a branch whose top keys sit at `level`
pub fn encode(node: &Node, level: Level, mode: Mode) -> Value {
    match mode {
        Mode::Trie => encode_trie(node),
        Mode::Matrix => Value::Array(
            node.leaves()
                .into_iter()
                .map(|(path, payload)| {
                    let mut record = Map::new();
                    for (segment, current) in path.iter().zip(&Level::ALL[level.depth()..]) {
                        record.insert(current.name().to_string(), segment.to_value());
                    }
                    record.insert(PAYLOAD_FIELD.to_string(), payload.clone());
                    Value::Object(record)
                })
                .collect(),
        ),
    }
}

fn encode_trie(node: &Node) -> Value {
    match node {
        Node::Leaf(payload) => payload.clone(),
        Node::Branch(children) => Value::Object(
            children
                .iter()
                .map(|(segment, child)| (segment.to_map_key(), encode_trie(child)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn sample_trie() -> Value {
        json!({"1": {"X": {"K": {"K": {"1": "a", "2": {"nested": true}}}}}})
    }

    fn sample_matrix() -> Value {
        json!([
            {"l5": 1, "l4": "X", "l3": "K", "l2": "K", "l1": 1, "l0": "a"},
            {"l5": 1, "l4": "X", "l3": "K", "l2": "K", "l1": 2, "l0": {"nested": true}}
        ])
    }

    #[test]
    fn test_trie_and_matrix_decode_identically() {
        let from_trie = decode_data(&sample_trie(), Level::L5, Mode::Trie, true).unwrap();
        let from_matrix = decode_data(&sample_matrix(), Level::L5, Mode::Matrix, true).unwrap();
        assert_eq!(from_trie, from_matrix);
        assert_eq!(from_trie.leaf_count(), 2);
        assert!(from_trie.is_canonical(5));
    }

    #[test]
    fn test_encode_both_shapes() {
        let node = decode_data(&sample_trie(), Level::L5, Mode::Trie, true).unwrap();
        assert_eq!(encode(&node, Level::L5, Mode::Trie), sample_trie());
        assert_eq!(encode(&node, Level::L5, Mode::Matrix), sample_matrix());
    }

    #[test]
    fn test_matrix_record_with_nested_remainder() {
        let matrix = json!([
            {"l5": 1, "l4": "X", "l0": {"K": {"K": {"1": "a", "2": {"nested": true}}}}}
        ]);
        let node = decode_data(&matrix, Level::L5, Mode::Matrix, true).unwrap();
        let expected = decode_data(&sample_trie(), Level::L5, Mode::Trie, true).unwrap();
        assert_eq!(node, expected);
    }

    #[test]
    fn test_relative_level_decoding() {
        let children = json!({"1": "a", "2": "b"});
        let node = decode_data(&children, Level::L1, Mode::Trie, true).unwrap();
        assert_eq!(node.leaf_count(), 2);
        assert!(node.is_canonical(1));

        let matrix = json!([{"l2": "K", "l1": 1, "l0": "a"}]);
        let node = decode_data(&matrix, Level::L2, Mode::Matrix, true).unwrap();
        assert!(node.contains(&[Segment::from("K"), Segment::Int(1)]));
    }

    #[test]
    fn test_empty_branches_are_dropped() {
        let node = decode_data(&json!({"1": {"X": {}}}), Level::L5, Mode::Trie, true).unwrap();
        assert!(node.is_empty());
    }

    #[test]
    fn test_matrix_errors() {
        let gap = json!([{"l5": 1, "l3": "K", "l0": "a"}]);
        assert!(decode_data(&gap, Level::L5, Mode::Matrix, true).is_err());

        let no_payload = json!([{"l5": 1, "l4": "X", "l3": "K", "l2": "K", "l1": 1}]);
        assert!(decode_data(&no_payload, Level::L5, Mode::Matrix, true).is_err());

        let dup = json!([
            {"l5": 1, "l4": "X", "l3": "K", "l2": "K", "l1": 1, "l0": "a"},
            {"l5": 1, "l4": "X", "l3": "K", "l2": "K", "l1": 1, "l0": "b"}
        ]);
        assert_matches!(
            decode_data(&dup, Level::L5, Mode::Matrix, true),
            Err(Error::DuplicateKey { .. })
        );
    }

    #[test]
    fn test_trie_key_validation() {
        let bad_page = json!({"x": {"X": {"K": {"K": {"1": "a"}}}}});
        assert!(decode_data(&bad_page, Level::L5, Mode::Trie, true).is_err());

        let numeric_l4 = json!({"1": {"2": {"K": {"K": {"1": "a"}}}}});
        assert!(decode_data(&numeric_l4, Level::L5, Mode::Trie, true).is_err());
        assert!(decode_data(&numeric_l4, Level::L5, Mode::Trie, false).is_ok());
    }

    #[test]
    fn test_query_target_terminals() {
        let request = json!({"1": true, "2": {"X": ["K", "J"]}});
        let target =
            decode_target(&request, Level::L5, Mode::Trie, &TargetOptions::query(true)).unwrap();
        assert_eq!(
            target.paths(),
            vec![
                vec![Segment::Int(1)],
                vec![Segment::Int(2), Segment::from("X"), Segment::from("J")],
                vec![Segment::Int(2), Segment::from("X"), Segment::from("K")],
            ]
        );
    }

    #[test]
    fn test_query_set_rejects_integer_like_member() {
        let request = json!({"1": {"X": ["A", "2", "B"]}});
        assert_matches!(
            decode_target(&request, Level::L5, Mode::Trie, &TargetOptions::query(true)),
            Err(Error::InvalidKey { .. })
        );
    }

    #[test]
    fn test_drop_wildcard_requires_trap() {
        let request = json!({"1": {"X": "*"}});
        let untrapped = TargetOptions::drop(true, BTreeSet::new());
        assert!(decode_target(&request, Level::L5, Mode::Trie, &untrapped).is_err());

        let trapped = TargetOptions::drop(true, BTreeSet::from([Level::L4]));
        let target = decode_target(&request, Level::L5, Mode::Trie, &trapped).unwrap();
        assert_eq!(target.paths(), vec![vec![Segment::Int(1), Segment::from("X")]]);

        let not_wildcard = json!({"1": {"X": true}});
        assert!(decode_target(&not_wildcard, Level::L5, Mode::Trie, &trapped).is_err());
    }

    #[test]
    fn test_drop_leaf_terminal_takes_any_value() {
        let request = json!({"1": {"X": {"K": {"K": {"1": null, "2": "whatever"}}}}});
        let opts = TargetOptions::drop(true, BTreeSet::new());
        let target = decode_target(&request, Level::L5, Mode::Trie, &opts).unwrap();
        assert_eq!(target.paths().len(), 2);
    }

    #[test]
    fn test_matrix_target() {
        let request = json!([
            {"l5": 1, "l4": "X"},
            {"l5": 1, "l4": "X", "l3": "K"},
            {"l5": 2, "l0": {"Y": true}}
        ]);
        let target =
            decode_target(&request, Level::L5, Mode::Matrix, &TargetOptions::query(true)).unwrap();
        assert_eq!(
            target.paths(),
            vec![
                vec![Segment::Int(1), Segment::from("X")],
                vec![Segment::Int(2), Segment::from("Y")],
            ]
        );
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("trie".parse::<Mode>().unwrap(), Mode::Trie);
        assert_eq!("matrix".parse::<Mode>().unwrap(), Mode::Matrix);
        assert_matches!("table".parse::<Mode>(), Err(Error::InvalidControl(_)));
    }
}
