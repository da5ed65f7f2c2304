//! In-Memory Store
//!
//! Ordered in-process table per schema. Rows are kept in a `BTreeMap` keyed
//! by [`LeafKey`], so every prefix clause is a single range scan.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use super::{Columns, Filter, LeafKey, ResultShape, Row, Schema, Selection, Store};
use crate::error::{Error, Result};

type Table = BTreeMap<LeafKey, Value>;

/// Backing store held entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in a table
    pub fn len(&self, schema: &Schema) -> usize {
        self.tables
            .read()
            .get(&schema.table)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// True when a table holds no rows
    pub fn is_empty(&self, schema: &Schema) -> bool {
        self.len(schema) == 0
    }

    /// Every row of every table, in key order
    pub fn export(&self) -> BTreeMap<String, Vec<Row>> {
        self.tables
            .read()
            .iter()
            .map(|(name, table)| {
                let rows = table
                    .iter()
                    .map(|(key, payload)| Row::new(key.clone(), payload.clone()))
                    .collect();
                (name.clone(), rows)
            })
            .collect()
    }

    /// Replace all content with `tables`
    pub fn import(&self, tables: BTreeMap<String, Vec<Row>>) {
        let mut guard = self.tables.write();
        guard.clear();
        for (name, rows) in tables {
            let table = rows.into_iter().map(|row| (row.key, row.payload)).collect();
            guard.insert(name, table);
        }
    }

    fn matching(table: &Table, filter: &Filter) -> Vec<LeafKey> {
        if filter.is_all() {
            return table.keys().cloned().collect();
        }
        let mut keys: Vec<LeafKey> = Vec::new();
        for clause in filter.clauses() {
            let start = LeafKey::lower_bound(clause);
            keys.extend(
                table
                    .range((Bound::Included(start), Bound::Unbounded))
                    .map(|(key, _)| key)
                    .take_while(|key| key.starts_with(clause))
                    .cloned(),
            );
        }
        keys.sort();
        keys.dedup();
        keys
    }
}

impl Store for MemoryStore {
    fn select(
        &self,
        schema: &Schema,
        filter: &Filter,
        columns: Columns,
        shape: ResultShape,
    ) -> Result<Selection> {
        let tables = self.tables.read();
        let rows = match tables.get(&schema.table) {
            None => Vec::new(),
            Some(table) => Self::matching(table, filter)
                .into_iter()
                .filter_map(|key| {
                    let payload = match columns {
                        Columns::All => table.get(&key)?.clone(),
                        Columns::KeysOnly => Value::Null,
                    };
                    Some(Row::new(key, payload))
                })
                .collect(),
        };
        trace!(query = %schema.describe(filter), rows = rows.len(), "select");
        Ok(Selection::shape(rows, shape))
    }

    fn insert(&self, schema: &Schema, rows: &[Row]) -> Result<u64> {
        let mut tables = self.tables.write();
        let table = tables.entry(schema.table.clone()).or_default();

        let mut batch = BTreeMap::new();
        for row in rows {
            if table.contains_key(&row.key) || batch.insert(&row.key, &row.payload).is_some() {
                return Err(Error::storage(format!(
                    "unique constraint violated on {} for key {}",
                    schema.table, row.key
                )));
            }
        }
        for (key, payload) in batch {
            table.insert(key.clone(), payload.clone());
        }
        Ok(rows.len() as u64)
    }

    fn upsert(&self, schema: &Schema, rows: &[Row]) -> Result<u64> {
        let mut tables = self.tables.write();
        let table = tables.entry(schema.table.clone()).or_default();
        for row in rows {
            table.insert(row.key.clone(), row.payload.clone());
        }
        Ok(rows.len() as u64)
    }

    fn delete(&self, schema: &Schema, filter: &Filter) -> Result<u64> {
        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(&schema.table) else {
            return Ok(0);
        };
        let doomed = Self::matching(table, filter);
        for key in &doomed {
            table.remove(key);
        }
        trace!(query = %schema.describe(filter), rows = doomed.len(), "delete");
        Ok(doomed.len() as u64)
    }

    fn truncate(&self, schema: &Schema) -> Result<()> {
        self.tables.write().remove(&schema.table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyPath, Level, Segment};
    use serde_json::json;

    fn key(l5: u64, l4: &str, l3: &str, l2: &str, l1: u64) -> LeafKey {
        LeafKey {
            l5,
            l4: l4.into(),
            l3: l3.into(),
            l2: l2.into(),
            l1,
        }
    }

    fn prefix(segments: Vec<Segment>) -> KeyPath {
        KeyPath::new(segments).unwrap()
    }

    fn seeded() -> (MemoryStore, Schema) {
        let store = MemoryStore::new();
        let schema = Schema::new("t");
        store
            .insert(
                &schema,
                &[
                    Row::new(key(1, "X", "K", "K", 1), json!("a")),
                    Row::new(key(1, "X", "K", "K", 2), json!("b")),
                    Row::new(key(1, "Y", "J", "K", 1), json!("c")),
                    Row::new(key(2, "X", "K", "K", 1), json!("d")),
                ],
            )
            .unwrap();
        (store, schema)
    }

    #[test]
    fn test_prefix_select() {
        let (store, schema) = seeded();
        let rows = store
            .select(
                &schema,
                &Filter::prefix(prefix(vec![1.into(), "X".into()])),
                Columns::All,
                ResultShape::Rows,
            )
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].payload, json!("b"));
    }

    #[test]
    fn test_overlapping_clauses_are_deduplicated() {
        let (store, schema) = seeded();
        let filter = Filter::prefixes(vec![
            prefix(vec![1.into()]),
            prefix(vec![1.into(), "X".into()]),
        ]);
        let rows = store
            .select(&schema, &filter, Columns::KeysOnly, ResultShape::Rows)
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.payload.is_null()));
    }

    #[test]
    fn test_distinct_values() {
        let (store, schema) = seeded();
        let values = store
            .select(
                &schema,
                &Filter::prefix(prefix(vec![1.into()])),
                Columns::KeysOnly,
                ResultShape::Values(Level::L4),
            )
            .unwrap()
            .into_values()
            .unwrap();
        assert_eq!(values, vec![Segment::from("X"), Segment::from("Y")]);
    }

    #[test]
    fn test_insert_rejects_existing_key_atomically() {
        let (store, schema) = seeded();
        let err = store
            .insert(
                &schema,
                &[
                    Row::new(key(3, "X", "K", "K", 1), json!(1)),
                    Row::new(key(1, "X", "K", "K", 1), json!(2)),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(store.len(&schema), 4);
    }

    #[test]
    fn test_upsert_overwrites() {
        let (store, schema) = seeded();
        store
            .upsert(&schema, &[Row::new(key(1, "X", "K", "K", 1), json!("z"))])
            .unwrap();
        let row = store
            .select(
                &schema,
                &Filter::prefix(prefix(key(1, "X", "K", "K", 1).segments().to_vec())),
                Columns::All,
                ResultShape::Row,
            )
            .unwrap();
        assert_eq!(row, Selection::Row(Some(Row::new(key(1, "X", "K", "K", 1), json!("z")))));
        assert_eq!(store.len(&schema), 4);
    }

    #[test]
    fn test_delete_and_truncate() {
        let (store, schema) = seeded();
        let deleted = store
            .delete(&schema, &Filter::prefix(prefix(vec![1.into(), "X".into()])))
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.delete(&schema, &Filter::default()).unwrap(), 0);
        assert_eq!(store.len(&schema), 2);

        store.truncate(&schema).unwrap();
        assert!(store.is_empty(&schema));
    }

    #[test]
    fn test_tables_are_isolated() {
        let (store, schema) = seeded();
        let other = Schema::new("other");
        assert!(store.is_empty(&other));
        store.truncate(&other).unwrap();
        assert_eq!(store.len(&schema), 4);
    }
}
