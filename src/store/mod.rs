//! Backing Store Contract
//!
//! The durable relational table behind the cache. The engine speaks to it
//! through [`Store`] only:
//!
//! ```text
//! select(schema, filter, columns, shape) → Selection
//! insert / upsert(schema, rows)          → rows affected
//! delete(schema, filter)                 → rows affected
//! truncate(schema)
//! ```
//!
//! A [`Filter`] is a disjunction of key-prefix clauses, the shape of
//! `WHERE (l5 = ? AND l4 = ?) OR (l5 = ?)`. [`ResultShape::Nested`] returns
//! rows already grouped by key prefix as a [`Node`], so callers never
//! re-nest flat rows.
//!
//! # Implementations
//!
//! - [`MemoryStore`] - ordered in-process table
//! - [`FileStore`] - [`MemoryStore`] persisted to a JSON document

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::key::{KeyPath, Level, Segment};
use crate::trie::Node;

// =============================================================================
// Schema
// =============================================================================

/// Table descriptor: five key columns (jointly unique) and a payload column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schema {
    /// Table name
    pub table: String,
    /// Key column names, L5 first
    pub key_columns: [String; 5],
    /// Payload column name
    pub payload_column: String,
}

impl Default for Schema {
    fn default() -> Self {
        Self::new("pentastore")
    }
}

impl Schema {
    /// Schema with default column names
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key_columns: Level::ALL.map(|level| level.name().to_string()),
            payload_column: "l0".to_string(),
        }
    }

    /// Column name for a key level
    pub fn key_column(&self, level: Level) -> &str {
        &self.key_columns[level.depth()]
    }

    /// Reject empty or repeated names
    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(Error::Config("schema table name is empty".into()));
        }
        let mut seen = BTreeSet::new();
        for name in self.key_columns.iter().chain(std::iter::once(&self.payload_column)) {
            if name.trim().is_empty() {
                return Err(Error::Config(format!(
                    "table '{}' has an empty column name",
                    self.table
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(Error::Config(format!(
                    "table '{}' names column '{}' twice",
                    self.table, name
                )));
            }
        }
        Ok(())
    }

    /// SQL-like rendering of a filter against this table (for logs)
    pub fn describe(&self, filter: &Filter) -> String {
        if filter.is_all() {
            return format!("{} (all rows)", self.table);
        }
        if filter.is_none() {
            return format!("{} (no rows)", self.table);
        }
        let clauses: Vec<String> = filter
            .clauses()
            .iter()
            .map(|clause| {
                let terms: Vec<String> = clause
                    .segments()
                    .iter()
                    .zip(Level::ALL)
                    .map(|(segment, level)| match segment {
                        Segment::Int(v) => format!("{} = {}", self.key_column(level), v),
                        Segment::Str(s) => format!("{} = '{}'", self.key_column(level), s),
                    })
                    .collect();
                format!("({})", terms.join(" AND "))
            })
            .collect();
        format!("{} WHERE {}", self.table, clauses.join(" OR "))
    }
}

// =============================================================================
// Rows
// =============================================================================

/// Full key of one leaf
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LeafKey {
    pub l5: u64,
    pub l4: String,
    pub l3: String,
    pub l2: String,
    pub l1: u64,
}

impl LeafKey {
    /// Build from five typed segments
    pub fn from_segments(segments: &[Segment]) -> Result<Self> {
        match segments {
            [
                Segment::Int(l5),
                Segment::Str(l4),
                Segment::Str(l3),
                Segment::Str(l2),
                Segment::Int(l1),
            ] => {
                Ok(Self {
                    l5: *l5,
                    l4: l4.clone(),
                    l3: l3.clone(),
                    l2: l2.clone(),
                    l1: *l1,
                })
            }
            other => Err(Error::invalid_key(format!(
                "a leaf key needs int/str/str/str/int segments, got {}",
                KeyPath::new(other.to_vec())
                    .map(|p| p.to_string())
                    .unwrap_or_else(|_| format!("{:?}", other))
            ))),
        }
    }

    /// The five segments, L5 first
    pub fn segments(&self) -> [Segment; 5] {
        [
            Segment::Int(self.l5),
            Segment::Str(self.l4.clone()),
            Segment::Str(self.l3.clone()),
            Segment::Str(self.l2.clone()),
            Segment::Int(self.l1),
        ]
    }

    /// Segments below L5
    pub fn relative(&self) -> [Segment; 4] {
        [
            Segment::Str(self.l4.clone()),
            Segment::Str(self.l3.clone()),
            Segment::Str(self.l2.clone()),
            Segment::Int(self.l1),
        ]
    }

    /// Smallest key that starts with `prefix`
    pub fn lower_bound(prefix: &KeyPath) -> Self {
        let s = prefix.segments();
        let text = |i: usize| s.get(i).and_then(Segment::as_str).unwrap_or("").to_string();
        let int = |i: usize| s.get(i).and_then(Segment::as_int).unwrap_or(0);
        Self {
            l5: int(0),
            l4: text(1),
            l3: text(2),
            l2: text(3),
            l1: int(4),
        }
    }

    /// Whether this key starts with `prefix`
    pub fn starts_with(&self, prefix: &KeyPath) -> bool {
        prefix.is_prefix_of(&self.segments())
    }
}

impl fmt::Display for LeafKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}/{}/{}/{}", self.l5, self.l4, self.l3, self.l2, self.l1)
    }
}

/// One table row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub key: LeafKey,
    pub payload: Value,
}

impl Row {
    pub fn new(key: LeafKey, payload: Value) -> Self {
        Self { key, payload }
    }
}

// =============================================================================
// Queries
// =============================================================================

/// Row filter: rows matching any clause (each clause is a key prefix)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    clauses: Vec<KeyPath>,
}

impl Filter {
    /// Matches every row
    pub fn all() -> Self {
        Self {
            clauses: vec![KeyPath::root()],
        }
    }

    /// Matches rows under one prefix
    pub fn prefix(path: KeyPath) -> Self {
        Self {
            clauses: vec![path],
        }
    }

    /// Matches rows under any of the prefixes; no prefixes matches nothing
    pub fn prefixes(paths: impl IntoIterator<Item = KeyPath>) -> Self {
        Self {
            clauses: paths.into_iter().collect(),
        }
    }

    /// Clauses in insertion order
    pub fn clauses(&self) -> &[KeyPath] {
        &self.clauses
    }

    /// True when some clause matches every row
    pub fn is_all(&self) -> bool {
        self.clauses.iter().any(KeyPath::is_empty)
    }

    /// True when no row can match
    pub fn is_none(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluate against a row key
    pub fn matches(&self, key: &LeafKey) -> bool {
        self.clauses.iter().any(|clause| key.starts_with(clause))
    }
}

/// Columns to return
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Columns {
    /// Keys and payload
    #[default]
    All,
    /// Keys only; payloads come back as `null`
    KeysOnly,
}

/// Result shape of a select
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// Flat row list in key order
    Rows,
    /// First row in key order, if any
    Row,
    /// Distinct values of one key column in key order
    Values(Level),
    /// Rows grouped by key prefix, keyed from L5
    Nested,
}

/// Result of a select, matching the requested [`ResultShape`]
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Rows(Vec<Row>),
    Row(Option<Row>),
    Values(Vec<Segment>),
    Nested(Node),
}

impl Selection {
    /// Shape rows (already filtered, in key order) as requested
    pub fn shape(rows: Vec<Row>, shape: ResultShape) -> Self {
        match shape {
            ResultShape::Rows => Selection::Rows(rows),
            ResultShape::Row => Selection::Row(rows.into_iter().next()),
            ResultShape::Values(level) => {
                let mut seen = BTreeSet::new();
                for row in &rows {
                    seen.insert(row.key.segments()[level.depth()].clone());
                }
                Selection::Values(seen.into_iter().collect())
            }
            ResultShape::Nested => {
                let mut node = Node::branch();
                for row in rows {
                    node.insert(&row.key.segments(), row.payload);
                }
                Selection::Nested(node)
            }
        }
    }

    pub fn into_rows(self) -> Result<Vec<Row>> {
        match self {
            Selection::Rows(rows) => Ok(rows),
            other => Err(Error::Internal(format!(
                "expected rows, store returned {}",
                other.kind()
            ))),
        }
    }

    pub fn into_values(self) -> Result<Vec<Segment>> {
        match self {
            Selection::Values(values) => Ok(values),
            other => Err(Error::Internal(format!(
                "expected values, store returned {}",
                other.kind()
            ))),
        }
    }

    pub fn into_nested(self) -> Result<Node> {
        match self {
            Selection::Nested(node) => Ok(node),
            other => Err(Error::Internal(format!(
                "expected nested rows, store returned {}",
                other.kind()
            ))),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Selection::Rows(_) => "rows",
            Selection::Row(_) => "a row",
            Selection::Values(_) => "values",
            Selection::Nested(_) => "nested rows",
        }
    }
}

// =============================================================================
// Store Trait
// =============================================================================

/// Backing relational store
pub trait Store: Send + Sync {
    /// Query rows matching `filter`
    fn select(
        &self,
        schema: &Schema,
        filter: &Filter,
        columns: Columns,
        shape: ResultShape,
    ) -> Result<Selection>;

    /// Insert rows; any existing key fails the whole batch
    fn insert(&self, schema: &Schema, rows: &[Row]) -> Result<u64>;

    /// Insert or overwrite rows
    fn upsert(&self, schema: &Schema, rows: &[Row]) -> Result<u64>;

    /// Delete rows matching `filter`
    fn delete(&self, schema: &Schema, filter: &Filter) -> Result<u64>;

    /// Remove every row of the table
    fn truncate(&self, schema: &Schema) -> Result<()>;
}
