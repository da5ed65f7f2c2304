//! Read Path
//!
//! Per requested L5 value:
//!
//! 1. Authoritative bucket: answer from its trie, no storage call.
//! 2. Whole page requested: one full scan, absorbed with authority.
//! 3. Narrowed request: one query over the requested regions; each region
//!    is replaced in the bucket by the storage answer, authority unchanged.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, instrument};

use super::{Ctrl, Datastore};
use crate::error::{Error, Result};
use crate::key::{KeyPath, Level, Segment};
use crate::store::{Columns, Filter, ResultShape};
use crate::trie::{codec, Node, Target};

impl Datastore {
    /// Fetch the subtrees named by `request`.
    ///
    /// Returns the result in `ctrl.r_mode` and whether every requested L5
    /// value produced at least one leaf.
    #[instrument(skip(self, request, ctrl))]
    pub fn get_multi(&mut self, request: &Value, ctrl: &Ctrl) -> Result<(Value, bool)> {
        let target = codec::decode_target(request, Level::L5, ctrl.q_mode, &ctrl.query_options())?;
        let pages = match target {
            Target::Children(pages) if !pages.is_empty() => pages,
            _ => return Err(Error::invalid_key("get_multi request names no L5 keys")),
        };

        let mut result = Node::branch();
        let mut valid = true;
        for (segment, sub) in pages {
            let page = segment.as_int().ok_or_else(|| {
                Error::invalid_key(format!("L5 key '{}' is not an integer", segment))
            })?;
            let found = self.read_page(page, &sub)?;
            if found.is_empty() {
                valid = false;
                continue;
            }
            result.graft(&[segment], found);
        }
        Ok((codec::encode(&result, Level::L5, ctrl.r_mode), valid))
    }

    /// Fetch one node by path (L5 first).
    ///
    /// A full path returns the leaf payload; a shorter one returns the
    /// subtree in `ctrl.r_mode`. `None` when nothing lives there.
    #[instrument(skip(self, path, ctrl))]
    pub fn get(&mut self, path: &[Value], ctrl: &Ctrl) -> Result<Option<Value>> {
        let path = KeyPath::from_values(path, ctrl.validate)?;
        let Some(page) = path.page() else {
            return Err(Error::invalid_key("get needs at least an L5 key"));
        };
        let rel = path.relative();
        let mut target = Target::default();
        target.add_path(rel);

        let found = self.read_page(page, &target)?;
        let Some(node) = found.get(rel).filter(|node| !node.is_empty()) else {
            return Ok(None);
        };
        Ok(match node {
            Node::Leaf(payload) => Some(payload.clone()),
            Node::Branch(_) => Level::from_depth(path.len())
                .map(|level| codec::encode(node, level, ctrl.r_mode)),
        })
    }

    /// Immediate children of the node at `path` (L5 first).
    ///
    /// An empty path lists the L5 values. Answered from authority or a known
    /// lookup table when possible; otherwise one distinct-value query, whose
    /// answer is recorded for next time.
    #[instrument(skip(self, path, ctrl))]
    pub fn children(&mut self, path: &[Value], ctrl: &Ctrl) -> Result<Vec<Value>> {
        let path = KeyPath::from_values(path, ctrl.validate)?;
        let Some(level) = Level::from_depth(path.len()) else {
            return Err(Error::invalid_key("an L1 key has no children"));
        };

        let Some(page) = path.page() else {
            let values = self
                .select(&Filter::all(), Columns::KeysOnly, ResultShape::Values(Level::L5))?
                .into_values()?;
            return Ok(values.iter().map(Segment::to_value).collect());
        };
        let rel = path.relative().to_vec();

        if let Some(known) = self.cache.load(page).known_children(&rel) {
            debug!(page, depth = rel.len(), "children answered from cache");
            self.metrics.record_authoritative_answer();
            return Ok(known.iter().map(Segment::to_value).collect());
        }

        let values = self
            .select(&Filter::prefix(path), Columns::KeysOnly, ResultShape::Values(level))?
            .into_values()?;
        self.cache.load(page).learn_children(&rel, &values);
        self.persist(&BTreeSet::from([page]));
        Ok(values.iter().map(Segment::to_value).collect())
    }

    /// Content of one page restricted to `target`, keyed from L4
    fn read_page(&mut self, page: u64, target: &Target) -> Result<Node> {
        let bucket = self.cache.load(page);
        if bucket.is_authoritative() {
            self.metrics.record_authoritative_answer();
            debug!(page, "answered from authoritative bucket");
            return Ok(bucket.keys().select(target));
        }

        let page_path = KeyPath::root().child(Segment::Int(page));
        let page_key = [Segment::Int(page)];
        if let Target::All = target {
            let nested = self.select_nested(&Filter::prefix(page_path))?;
            let keys = nested.get(&page_key).cloned().unwrap_or_default();
            self.cache.load(page).absorb_full(keys.clone());
            self.metrics.record_authority_grant();
            debug!(page, leaves = keys.leaf_count(), "bucket gained authority");
            self.persist(&BTreeSet::from([page]));
            return Ok(keys);
        }

        let regions = target.paths();
        if regions.is_empty() {
            return Ok(Node::branch());
        }
        let filter = Filter::prefixes(regions.iter().map(|region| page_path.join(region)));
        let nested = self.select_nested(&filter)?;
        let answer = nested.get(&page_key).cloned().unwrap_or_default();

        let bucket = self.cache.load(page);
        for region in &regions {
            bucket.absorb_region(region, answer.get(region).cloned().unwrap_or_default());
        }
        self.persist(&BTreeSet::from([page]));
        Ok(answer.select(target))
    }
}
