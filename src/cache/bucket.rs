//! Cache Bucket
//!
//! Everything cached for one L5 value:
//!
//! - `keys`: the L4→L3→L2→L1→L0 trie, canonical (no empty branches)
//! - LUTs: known child sets of the root (L4 keys), of L4 nodes (L3 keys)
//!   and of L3 nodes (L2 keys); an absent set means unknown, an empty set
//!   means known to have no children
//! - `authoritative`: `keys` mirrors the backing store exactly
//!
//! Authority is granted only by [`Bucket::absorb_full`]. Mutations keep an
//! authoritative bucket exact; on a partial bucket they only record what
//! they can prove.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::key::{Level, Segment};
use crate::trie::Node;

/// Deepest parent path (relative to L5) that carries a LUT
const LUT_PARENT_DEPTH: usize = 2;

/// Depth of a full leaf path relative to L5
pub const LEAF_DEPTH: usize = 4;

/// Cached state for one L5 value
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    page: u64,
    keys: Node,
    luts: BTreeMap<Vec<Segment>, BTreeSet<Segment>>,
    authoritative: bool,
}

impl Bucket {
    /// An empty bucket without authority
    pub fn new(page: u64) -> Self {
        Self {
            page,
            keys: Node::branch(),
            luts: BTreeMap::new(),
            authoritative: false,
        }
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    /// Cached trie, keyed from L4
    pub fn keys(&self) -> &Node {
        &self.keys
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    /// Known child set of the node at `parent` (root, L4 or L3 node)
    pub fn lut(&self, parent: &[Segment]) -> Option<&BTreeSet<Segment>> {
        self.luts.get(parent)
    }

    /// Cached node at a relative path
    pub fn lookup(&self, rel: &[Segment]) -> Option<&Node> {
        self.keys.get(rel)
    }

    /// Whether a full leaf path is cached
    pub fn contains_leaf(&self, rel: &[Segment]) -> bool {
        self.keys.get(rel).and_then(Node::payload).is_some()
    }

    /// Known children of the node at `rel`, from authority or a LUT
    pub fn known_children(&self, rel: &[Segment]) -> Option<Vec<Segment>> {
        if self.authoritative {
            let children = self
                .keys
                .get(rel)
                .and_then(Node::children)
                .map(|children| children.keys().cloned().collect())
                .unwrap_or_default();
            return Some(children);
        }
        self.luts
            .get(rel)
            .map(|set| set.iter().cloned().collect())
    }

    // -------------------------------------------------------------------------
    // Reads absorbed from storage
    // -------------------------------------------------------------------------

    /// Replace everything with a full scan of the page and take authority
    pub fn absorb_full(&mut self, keys: Node) {
        self.keys = keys;
        self.luts.clear();
        collect_sets(&mut Vec::new(), &self.keys, &mut self.luts);
        self.authoritative = true;
    }

    /// Replace the cached region at `rel` with the storage answer for it.
    ///
    /// Child sets inside the region become known. Authority is unchanged.
    pub fn absorb_region(&mut self, rel: &[Segment], subtree: Node) {
        if rel.is_empty() {
            self.absorb_full(subtree);
            return;
        }
        self.luts.retain(|parent, _| !parent.starts_with(rel));
        if subtree.is_empty() {
            self.keys.remove(rel);
            self.settle_removed(rel, true);
            return;
        }
        let mut prefix = rel.to_vec();
        collect_sets(&mut prefix, &subtree, &mut self.luts);
        self.keys.graft(rel, subtree);
        self.note_present(rel);
    }

    /// Record the complete child list of the node at `rel`
    pub fn learn_children(&mut self, rel: &[Segment], children: &[Segment]) {
        if children.is_empty() {
            if rel.is_empty() {
                self.luts.insert(Vec::new(), BTreeSet::new());
            } else {
                self.luts.retain(|parent, _| !parent.starts_with(rel));
                self.keys.remove(rel);
                self.settle_removed(rel, true);
            }
            return;
        }
        if rel.len() <= LUT_PARENT_DEPTH {
            self.luts
                .insert(rel.to_vec(), children.iter().cloned().collect());
        }
        self.note_present(rel);
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Cache a written leaf; returns the previous cached payload
    pub fn insert_leaf(&mut self, rel: &[Segment], payload: Value) -> Option<Value> {
        let previous = self.keys.insert(rel, payload);
        self.note_present(rel);
        previous
    }

    /// Forget everything at `rel` after it was deleted from storage
    pub fn remove(&mut self, rel: &[Segment]) -> Option<Node> {
        let removed = self.keys.remove(rel);
        self.luts.retain(|parent, _| !parent.starts_with(rel));
        if rel.is_empty() {
            self.luts.insert(Vec::new(), BTreeSet::new());
        } else {
            self.settle_removed(rel, true);
        }
        removed
    }

    /// Drop all cached content and authority
    pub fn clear(&mut self) {
        self.keys = Node::branch();
        self.luts.clear();
        self.authoritative = false;
    }

    /// Add every segment of `path` to the known child sets above it
    fn note_present(&mut self, path: &[Segment]) {
        for depth in 0..path.len().min(LUT_PARENT_DEPTH + 1) {
            let parent = &path[..depth];
            if self.authoritative {
                self.luts
                    .entry(parent.to_vec())
                    .or_default()
                    .insert(path[depth].clone());
            } else if let Some(set) = self.luts.get_mut(parent) {
                set.insert(path[depth].clone());
            }
        }
    }

    /// Update child sets after the node at `path` left storage.
    ///
    /// `definite` is false when the node may or may not still exist; a set
    /// that might list a vanished node becomes unknown.
    fn settle_removed(&mut self, path: &[Segment], definite: bool) {
        let Some((last, parent)) = path.split_last() else {
            return;
        };
        if parent.len() <= LUT_PARENT_DEPTH {
            if let Some(set) = self.luts.get_mut(parent) {
                if definite {
                    set.remove(last);
                    if !set.is_empty() || parent.is_empty() {
                        return;
                    }
                    self.luts.remove(parent);
                    self.settle_removed(parent, true);
                    return;
                }
                if !set.contains(last) {
                    return;
                }
                let others = set.len() > 1;
                self.luts.remove(parent);
                if others {
                    return;
                }
            }
        }
        if parent.is_empty() || self.keys.contains(parent) {
            return;
        }
        self.settle_removed(parent, self.authoritative);
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Serializable form for the shared backend
    pub fn to_stored(&self) -> StoredBucket {
        StoredBucket {
            page: self.page,
            authoritative: self.authoritative,
            leaves: self
                .keys
                .leaves()
                .into_iter()
                .map(|(path, payload)| (path, payload.clone()))
                .collect(),
            luts: self
                .luts
                .iter()
                .map(|(parent, set)| (parent.clone(), set.iter().cloned().collect()))
                .collect(),
        }
    }

    /// Rebuild from the stored form, rejecting malformed blobs
    pub fn from_stored(stored: StoredBucket) -> Result<Self> {
        let mut keys = Node::branch();
        for (path, payload) in stored.leaves {
            let well_typed = path.len() == LEAF_DEPTH
                && path
                    .iter()
                    .zip(&Level::ALL[1..])
                    .all(|(segment, &level)| segment.fits(level));
            if !well_typed {
                return Err(Error::Internal(format!(
                    "cached bucket {} holds a malformed leaf path {:?}",
                    stored.page, path
                )));
            }
            keys.insert(&path, payload);
        }
        let mut luts = BTreeMap::new();
        for (parent, children) in stored.luts {
            if parent.len() > LUT_PARENT_DEPTH {
                return Err(Error::Internal(format!(
                    "cached bucket {} holds a lookup table below L3",
                    stored.page
                )));
            }
            luts.insert(parent, children.into_iter().collect());
        }
        Ok(Self {
            page: stored.page,
            keys,
            luts,
            authoritative: stored.authoritative,
        })
    }
}

/// Record the child set of every LUT-level branch under `node`
fn collect_sets(
    prefix: &mut Vec<Segment>,
    node: &Node,
    luts: &mut BTreeMap<Vec<Segment>, BTreeSet<Segment>>,
) {
    if prefix.len() > LUT_PARENT_DEPTH {
        return;
    }
    let Some(children) = node.children() else {
        return;
    };
    luts.insert(prefix.clone(), children.keys().cloned().collect());
    for (segment, child) in children {
        prefix.push(segment.clone());
        collect_sets(prefix, child, luts);
        prefix.pop();
    }
}

/// Wire form of a bucket (leaves as path/payload pairs)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBucket {
    pub page: u64,
    pub authoritative: bool,
    pub leaves: Vec<(Vec<Segment>, Value)>,
    pub luts: Vec<(Vec<Segment>, Vec<Segment>)>,
}
