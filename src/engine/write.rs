//! Write Path
//!
//! Storage first, cache second. Each storage step that succeeds is mirrored
//! into the touched buckets before the next step runs, so a failure part-way
//! never leaves a bucket claiming rows that are gone.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, instrument};

use super::{key_paths, split_page, Ctrl, Datastore};
use crate::error::{Error, Result};
use crate::key::{KeyPath, Level, Segment};
use crate::store::{Columns, Filter, LeafKey, ResultShape, Row, Selection};
use crate::trie::{codec, Node};

impl Datastore {
    /// Insert one new leaf; fails with `DuplicateKey` if it exists
    #[instrument(skip(self, key, payload, ctrl))]
    pub fn add(&mut self, key: &[Value], payload: Value, ctrl: &Ctrl) -> Result<u64> {
        let path = KeyPath::from_values(key, ctrl.validate)?;
        if path.len() != Level::ALL.len() {
            return Err(Error::invalid_key(format!(
                "add needs all five key levels, got {}",
                path.len()
            )));
        }
        let row = Row::new(LeafKey::from_segments(path.segments())?, payload);
        self.add_rows(vec![row])
    }

    /// Insert new leaves below `prefix`; `children` is keyed from `level`.
    ///
    /// If any leaf already exists nothing is written.
    #[instrument(skip(self, prefix, children, ctrl), fields(level = %level))]
    pub fn add_multi(
        &mut self,
        level: Level,
        prefix: &[Value],
        children: &Value,
        ctrl: &Ctrl,
    ) -> Result<u64> {
        let rows = self.decode_rows(level, prefix, children, ctrl)?;
        self.add_rows(rows)
    }

    /// Insert or overwrite leaves below `prefix`
    #[instrument(skip(self, prefix, children, ctrl), fields(level = %level))]
    pub fn set_multi(
        &mut self,
        level: Level,
        prefix: &[Value],
        children: &Value,
        ctrl: &Ctrl,
    ) -> Result<u64> {
        let rows = self.decode_rows(level, prefix, children, ctrl)?;
        self.upsert_rows(rows)
    }

    /// Remove the node at `path`, which names L5 down to `level`.
    ///
    /// Returns the number of leaves deleted from storage.
    #[instrument(skip(self, path, ctrl), fields(level = %level))]
    pub fn drop(&mut self, level: Level, path: &[Value], ctrl: &Ctrl) -> Result<u64> {
        let path = KeyPath::from_values(path, ctrl.validate)?;
        if path.level() != Some(level) {
            return Err(Error::invalid_key(format!(
                "drop at {} needs keys from L5 down to {}, got {}",
                level,
                level,
                path.len()
            )));
        }
        self.drop_paths(vec![path.segments().to_vec()])
    }

    /// Remove every node named by a drop request keyed from L5
    #[instrument(skip(self, targets, ctrl))]
    pub fn drop_multi(&mut self, targets: &Value, ctrl: &Ctrl) -> Result<u64> {
        let target = codec::decode_target(targets, Level::L5, ctrl.q_mode, &ctrl.drop_options())?;
        let paths = target.paths();
        if paths.iter().any(Vec::is_empty) {
            return Err(Error::invalid_key("a drop request must name at least an L5 key"));
        }
        self.drop_paths(paths)
    }

    /// Make everything below `prefix` exactly `children`.
    ///
    /// Stale subtrees are deleted, new or changed leaves upserted; returns
    /// rows affected. Empty `children` removes the `prefix` node itself.
    #[instrument(skip(self, prefix, children, ctrl), fields(level = %level))]
    pub fn replace_multi(
        &mut self,
        level: Level,
        prefix: &[Value],
        children: &Value,
        ctrl: &Ctrl,
    ) -> Result<u64> {
        let (anchor, replacement) = self.decode_children(level, prefix, children, ctrl)?;

        if replacement.is_empty() {
            if anchor.is_empty() {
                let deleted = self.delete(&Filter::all())?;
                self.flush_cache();
                return Ok(deleted);
            }
            return self.drop_paths(vec![anchor.segments().to_vec()]);
        }

        let existing = self.existing_under(&anchor)?;

        let stale: Vec<Vec<Segment>> = existing
            .missing_from(&replacement)
            .into_iter()
            .map(|rel| anchor.join(&rel).segments().to_vec())
            .collect();
        let changed: Vec<Row> = replacement
            .leaves()
            .into_iter()
            .filter(|(rel, payload)| existing.get(rel).and_then(Node::payload) != Some(*payload))
            .map(|(rel, payload)| {
                LeafKey::from_segments(anchor.join(&rel).segments())
                    .map(|key| Row::new(key, payload.clone()))
            })
            .collect::<Result<_>>()?;
        debug!(stale = stale.len(), changed = changed.len(), "replace diff");

        let mut touched = BTreeSet::new();
        let mut affected = 0;
        if !stale.is_empty() {
            affected += self.delete(&Filter::prefixes(key_paths(&stale)?))?;
            for path in &stale {
                if let Some((page, rel)) = split_page(path) {
                    self.cache.load(page).remove(rel);
                    touched.insert(page);
                }
            }
        }
        if !changed.is_empty() {
            self.metrics.record_storage_write();
            affected += self.store.upsert(&self.schema, &changed)?;
            for row in &changed {
                self.cache.load(row.key.l5).insert_leaf(&row.key.relative(), row.payload.clone());
                touched.insert(row.key.l5);
            }
        }

        // Below the page level the region is now known exactly
        if let Some(page) = anchor.page().filter(|_| anchor.len() >= 2) {
            self.cache
                .load(page)
                .absorb_region(anchor.relative(), replacement);
            touched.insert(page);
        }
        self.persist(&touched);
        Ok(affected)
    }

    // -------------------------------------------------------------------------
    // Shared steps
    // -------------------------------------------------------------------------

    /// Validate `prefix` (levels above `level`) and decode `children`
    fn decode_children(
        &self,
        level: Level,
        prefix: &[Value],
        children: &Value,
        ctrl: &Ctrl,
    ) -> Result<(KeyPath, Node)> {
        if prefix.len() != level.depth() {
            return Err(Error::invalid_key(format!(
                "children keyed from {} need {} prefix keys, got {}",
                level,
                level.depth(),
                prefix.len()
            )));
        }
        let anchor = KeyPath::from_values(prefix, ctrl.validate)?;
        let node = codec::decode_data(children, level, ctrl.q_mode, ctrl.validate)?;
        Ok((anchor, node))
    }

    fn decode_rows(
        &self,
        level: Level,
        prefix: &[Value],
        children: &Value,
        ctrl: &Ctrl,
    ) -> Result<Vec<Row>> {
        let (anchor, node) = self.decode_children(level, prefix, children, ctrl)?;
        node.leaves()
            .into_iter()
            .map(|(rel, payload)| {
                LeafKey::from_segments(anchor.join(&rel).segments())
                    .map(|key| Row::new(key, payload.clone()))
            })
            .collect()
    }

    fn add_rows(&mut self, rows: Vec<Row>) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut unknown = Vec::new();
        for row in &rows {
            let bucket = self.cache.load(row.key.l5);
            if bucket.contains_leaf(&row.key.relative()) {
                return Err(Error::DuplicateKey {
                    key: row.key.to_string(),
                });
            }
            if !bucket.is_authoritative() {
                unknown.push(row.key.segments().to_vec());
            }
        }
        if !unknown.is_empty() {
            let filter = Filter::prefixes(key_paths(&unknown)?);
            let found = self.select(&filter, Columns::KeysOnly, ResultShape::Row)?;
            if let Selection::Row(Some(existing)) = found {
                return Err(Error::DuplicateKey {
                    key: existing.key.to_string(),
                });
            }
        }

        self.metrics.record_storage_write();
        let written = self.store.insert(&self.schema, &rows)?;
        self.cache_rows(rows);
        Ok(written)
    }

    fn upsert_rows(&mut self, rows: Vec<Row>) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.metrics.record_storage_write();
        let written = self.store.upsert(&self.schema, &rows)?;
        self.cache_rows(rows);
        Ok(written)
    }

    fn cache_rows(&mut self, rows: Vec<Row>) {
        let mut touched = BTreeSet::new();
        for row in rows {
            let rel = row.key.relative();
            self.cache.load(row.key.l5).insert_leaf(&rel, row.payload);
            touched.insert(row.key.l5);
        }
        self.persist(&touched);
    }

    /// Delete the subtrees at `paths` (full paths, L5 first)
    fn drop_paths(&mut self, paths: Vec<Vec<Segment>>) -> Result<u64> {
        if paths.is_empty() {
            return Ok(0);
        }
        let mut located = Vec::with_capacity(paths.len());
        for path in &paths {
            let (page, rel) = split_page(path)
                .ok_or_else(|| Error::invalid_key("a drop path must start with an L5 key"))?;
            located.push((page, rel.to_vec()));
        }

        let provably_absent = located.iter().all(|(page, rel)| {
            let bucket = self.cache.load(*page);
            bucket.is_authoritative()
                && bucket.lookup(rel).map_or(true, Node::is_empty)
        });
        if provably_absent {
            debug!(paths = paths.len(), "drop targets absent from authoritative buckets");
            self.metrics.record_authoritative_answer();
            return Ok(0);
        }

        let deleted = self.delete(&Filter::prefixes(key_paths(&paths)?))?;
        let mut touched = BTreeSet::new();
        for (page, rel) in located {
            self.cache.load(page).remove(&rel);
            touched.insert(page);
        }
        self.persist(&touched);
        Ok(deleted)
    }

    /// Current content below `anchor`, keyed from the anchor's child level
    fn existing_under(&mut self, anchor: &KeyPath) -> Result<Node> {
        if let Some(page) = anchor.page() {
            let bucket = self.cache.load(page);
            if bucket.is_authoritative() {
                self.metrics.record_authoritative_answer();
                return Ok(bucket.lookup(anchor.relative()).cloned().unwrap_or_default());
            }
        }
        let nested = self.select_nested(&Filter::prefix(anchor.clone()))?;
        Ok(nested.get(anchor.segments()).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::Mode;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn leaf(l5: u64, l4: &str, l3: &str, l2: &str, l1: u64) -> Vec<Value> {
        vec![json!(l5), json!(l4), json!(l3), json!(l2), json!(l1)]
    }

    #[test]
    fn test_add_then_duplicate() {
        let mut store = Datastore::in_memory();
        let ctrl = Ctrl::default();
        assert_eq!(store.add(&leaf(1, "X", "K", "K", 1), json!("a"), &ctrl).unwrap(), 1);
        assert_matches!(
            store.add(&leaf(1, "X", "K", "K", 1), json!("b"), &ctrl),
            Err(Error::DuplicateKey { .. })
        );
    }

    #[test]
    fn test_add_detects_uncached_duplicate() {
        let mut store = Datastore::in_memory();
        let ctrl = Ctrl::default();
        store.add(&leaf(1, "X", "K", "K", 1), json!("a"), &ctrl).unwrap();
        store.flush_cache();
        assert_matches!(
            store.add(&leaf(1, "X", "K", "K", 1), json!("b"), &ctrl),
            Err(Error::DuplicateKey { .. })
        );
    }

    #[test]
    fn test_add_requires_full_key() {
        let mut store = Datastore::in_memory();
        assert_matches!(
            store.add(&[json!(1), json!("X")], json!(1), &Ctrl::default()),
            Err(Error::InvalidKey { .. })
        );
    }

    #[test]
    fn test_add_multi_prefix_length() {
        let mut store = Datastore::in_memory();
        let ctrl = Ctrl::default();
        let err = store
            .add_multi(Level::L2, &[json!(1)], &json!({"K": {"1": 1}}), &ctrl)
            .unwrap_err();
        assert_matches!(err, Error::InvalidKey { .. });

        let prefix = [json!(1), json!("X"), json!("K")];
        let written = store
            .add_multi(Level::L2, &prefix, &json!({"K": {"1": 1, "2": 2}}), &ctrl)
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(store.add_multi(Level::L4, &[json!(1)], &json!({}), &ctrl).unwrap(), 0);
    }

    #[test]
    fn test_set_multi_overwrites() {
        let mut store = Datastore::in_memory();
        let ctrl = Ctrl::default();
        store.add(&leaf(1, "X", "K", "K", 1), json!("a"), &ctrl).unwrap();
        let prefix = [json!(1), json!("X"), json!("K"), json!("K")];
        store.set_multi(Level::L1, &prefix, &json!({"1": "z"}), &ctrl).unwrap();
        assert_eq!(store.get(&leaf(1, "X", "K", "K", 1), &ctrl).unwrap(), Some(json!("z")));
    }

    #[test]
    fn test_drop_requires_matching_level() {
        let mut store = Datastore::in_memory();
        assert_matches!(
            store.drop(Level::L3, &[json!(1), json!("X")], &Ctrl::default()),
            Err(Error::InvalidKey { .. })
        );
    }

    #[test]
    fn test_drop_short_circuits_on_authority() {
        let mut store = Datastore::in_memory();
        let ctrl = Ctrl::default();
        store.add(&leaf(1, "X", "K", "K", 1), json!("a"), &ctrl).unwrap();
        store.get_multi(&json!([1]), &ctrl).unwrap();

        let deletes = store.metrics().storage_deletes;
        assert_eq!(store.drop(Level::L4, &[json!(1), json!("Q")], &ctrl).unwrap(), 0);
        assert_eq!(store.metrics().storage_deletes, deletes);
    }

    #[test]
    fn test_drop_multi_wildcard_needs_trap() {
        let mut store = Datastore::in_memory();
        let ctrl = Ctrl::default();
        store.add(&leaf(1, "X", "K", "K", 1), json!("a"), &ctrl).unwrap();

        let request = json!({"1": {"X": "*"}});
        assert_matches!(store.drop_multi(&request, &ctrl), Err(Error::InvalidKey { .. }));
        let trapped = Ctrl::default().with_trap(Level::L4);
        assert_eq!(store.drop_multi(&request, &trapped).unwrap(), 1);
    }

    #[test]
    fn test_replace_diff_counts() {
        let mut store = Datastore::in_memory();
        let ctrl = Ctrl::default();
        let prefix = [json!(1), json!("X"), json!("K")];
        let children = json!({"K": {"1": "a", "2": "b"}, "J": {"1": "c"}});
        store.add_multi(Level::L2, &prefix, &children, &ctrl).unwrap();

        // J goes away, K/2 changes, K/1 stays, K/3 is new
        let affected = store
            .replace_multi(Level::L2, &prefix, &json!({"K": {"1": "a", "2": "B", "3": "d"}}), &ctrl)
            .unwrap();
        assert_eq!(affected, 3);

        let (result, _) = store.get_multi(&json!({"1": {"X": {"K": 1}}}), &ctrl).unwrap();
        assert_eq!(result, json!({"1": {"X": {"K": {"K": {"1": "a", "2": "B", "3": "d"}}}}}));
    }

    #[test]
    fn test_replace_matrix_input() {
        let mut store = Datastore::in_memory();
        let ctrl = Ctrl::default().with_mode(Mode::Matrix);
        let affected = store
            .replace_multi(
                Level::L1,
                &[json!(2), json!("A"), json!("B"), json!("C")],
                &json!([{"l1": 1, "l0": "x"}, {"l1": 2, "l0": "y"}]),
                &ctrl,
            )
            .unwrap();
        assert_eq!(affected, 2);
    }
}
