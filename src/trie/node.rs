//! Trie Nodes
//!
//! [`Node`] is the data tree: branches keyed by [`Segment`], leaves carrying
//! the L0 payload. Mutators keep the tree canonical: a branch exists only
//! while it has at least one descendant leaf.
//!
//! [`Target`] is the request tree used by queries and drops: `All` selects a
//! whole subtree (for drops it is the wildcard marker), `Children` narrows
//! to named children.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde_json::Value;

use crate::key::Segment;

// =============================================================================
// Data Node
// =============================================================================

/// A node of the data tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// L0 payload below an L1 key
    Leaf(Value),
    /// Children keyed by the next level's segments
    Branch(BTreeMap<Segment, Node>),
}

impl Default for Node {
    fn default() -> Self {
        Node::branch()
    }
}

impl Node {
    /// An empty branch
    pub fn branch() -> Self {
        Node::Branch(BTreeMap::new())
    }

    /// Children map, `None` for leaves
    pub fn children(&self) -> Option<&BTreeMap<Segment, Node>> {
        match self {
            Node::Branch(children) => Some(children),
            Node::Leaf(_) => None,
        }
    }

    /// Leaf payload, `None` for branches
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Node::Leaf(value) => Some(value),
            Node::Branch(_) => None,
        }
    }

    /// True for a branch without children
    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Branch(children) if children.is_empty())
    }

    /// Node at a relative path
    pub fn get(&self, path: &[Segment]) -> Option<&Node> {
        let mut node = self;
        for segment in path {
            node = node.children()?.get(segment)?;
        }
        Some(node)
    }

    /// Whether a node exists at a relative path
    pub fn contains(&self, path: &[Segment]) -> bool {
        self.get(path).is_some()
    }

    /// Insert a payload at a relative path, creating branches on the way.
    ///
    /// Returns the previous payload. A leaf found where a branch is needed is
    /// replaced.
    pub fn insert(&mut self, path: &[Segment], payload: Value) -> Option<Value> {
        self.graft(path, Node::Leaf(payload))
            .and_then(|old| old.payload().cloned())
    }

    /// Place `subtree` at a relative path, returning what was there.
    ///
    /// Grafting an empty branch removes the path instead, so the tree never
    /// holds an empty branch.
    pub fn graft(&mut self, path: &[Segment], subtree: Node) -> Option<Node> {
        if subtree.is_empty() {
            return self.remove(path);
        }
        let Some((last, parents)) = path.split_last() else {
            return Some(std::mem::replace(self, subtree));
        };
        let mut node = self;
        for segment in parents {
            node = node.branch_mut().entry(segment.clone()).or_default();
        }
        node.branch_mut().insert(last.clone(), subtree)
    }

    /// Remove the node at a relative path and prune ancestors left empty.
    ///
    /// `self` is never removed, only emptied. An empty path empties `self`.
    pub fn remove(&mut self, path: &[Segment]) -> Option<Node> {
        let Some((first, rest)) = path.split_first() else {
            return match std::mem::replace(self, Node::branch()) {
                removed if removed.is_empty() => None,
                removed => Some(removed),
            };
        };
        let Node::Branch(children) = self else {
            return None;
        };
        if rest.is_empty() {
            return children.remove(first);
        }
        let child = children.get_mut(first)?;
        let removed = child.remove(rest);
        if child.is_empty() {
            children.remove(first);
        }
        removed
    }

    /// Overlay `other` onto `self`; payloads in `other` win
    pub fn merge(&mut self, other: Node) {
        match (self, other) {
            (Node::Branch(mine), Node::Branch(theirs)) => {
                for (segment, node) in theirs {
                    match mine.entry(segment) {
                        Entry::Occupied(mut existing) => existing.get_mut().merge(node),
                        Entry::Vacant(slot) => {
                            if !node.is_empty() {
                                slot.insert(node);
                            }
                        }
                    }
                }
            }
            (slot, other) => {
                if !other.is_empty() {
                    *slot = other;
                }
            }
        }
    }

    /// Number of leaves beneath this node
    pub fn leaf_count(&self) -> u64 {
        match self {
            Node::Leaf(_) => 1,
            Node::Branch(children) => children.values().map(Node::leaf_count).sum(),
        }
    }

    /// All leaves beneath this node with their relative paths, in key order
    pub fn leaves(&self) -> Vec<(Vec<Segment>, &Value)> {
        let mut out = Vec::new();
        self.collect_leaves(&mut Vec::new(), &mut out);
        out
    }

    fn collect_leaves<'a>(
        &'a self,
        path: &mut Vec<Segment>,
        out: &mut Vec<(Vec<Segment>, &'a Value)>,
    ) {
        match self {
            Node::Leaf(value) => out.push((path.clone(), value)),
            Node::Branch(children) => {
                for (segment, child) in children {
                    path.push(segment.clone());
                    child.collect_leaves(path, out);
                    path.pop();
                }
            }
        }
    }

    /// Restrict this node to what `target` selects
    pub fn select(&self, target: &Target) -> Node {
        match (self, target) {
            (_, Target::All) | (Node::Leaf(_), _) => self.clone(),
            (Node::Branch(children), Target::Children(wanted)) => Node::Branch(
                wanted
                    .iter()
                    .filter_map(|(segment, sub)| {
                        let picked = children.get(segment)?.select(sub);
                        (!picked.is_empty()).then(|| (segment.clone(), picked))
                    })
                    .collect(),
            ),
        }
    }

    /// Minimal relative paths present in `self` but absent from `other`.
    ///
    /// A child missing from `other` is reported once, not leaf by leaf.
    pub fn missing_from(&self, other: &Node) -> Vec<Vec<Segment>> {
        let mut out = Vec::new();
        self.collect_missing(other, &mut Vec::new(), &mut out);
        out
    }

    fn collect_missing(&self, other: &Node, path: &mut Vec<Segment>, out: &mut Vec<Vec<Segment>>) {
        let (Node::Branch(mine), Node::Branch(theirs)) = (self, other) else {
            return;
        };
        for (segment, child) in mine {
            path.push(segment.clone());
            match theirs.get(segment) {
                None => out.push(path.clone()),
                Some(counterpart) => child.collect_missing(counterpart, path, out),
            }
            path.pop();
        }
    }

    /// True when every leaf sits exactly `depth` levels down and no branch is
    /// empty (the root itself may be empty).
    pub fn is_canonical(&self, depth: usize) -> bool {
        match self {
            Node::Leaf(_) => depth == 0,
            Node::Branch(children) => {
                depth > 0
                    && children
                        .values()
                        .all(|child| !child.is_empty() && child.is_canonical(depth - 1))
            }
        }
    }

    fn branch_mut(&mut self) -> &mut BTreeMap<Segment, Node> {
        if let Node::Leaf(_) = self {
            *self = Node::branch();
        }
        match self {
            Node::Branch(children) => children,
            Node::Leaf(_) => unreachable!("leaf replaced by branch above"),
        }
    }
}

// =============================================================================
// Request Target
// =============================================================================

/// A request tree naming the subtrees a query or drop applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Everything beneath this point (the drop wildcard)
    All,
    /// Only the named children
    Children(BTreeMap<Segment, Target>),
}

impl Default for Target {
    fn default() -> Self {
        Target::Children(BTreeMap::new())
    }
}

impl Target {
    /// Select the whole subtree at a relative path, absorbing narrower
    /// selections already made beneath it
    pub fn add_path(&mut self, path: &[Segment]) {
        let Some((first, rest)) = path.split_first() else {
            *self = Target::All;
            return;
        };
        if let Target::Children(children) = self {
            children.entry(first.clone()).or_default().add_path(rest);
        }
    }

    /// Union with another target
    pub fn merge(&mut self, other: Target) {
        match (self, other) {
            (Target::All, _) => {}
            (slot, Target::All) => *slot = Target::All,
            (Target::Children(mine), Target::Children(theirs)) => {
                for (segment, sub) in theirs {
                    mine.entry(segment).or_default().merge(sub);
                }
            }
        }
    }

    /// Relative paths of every `All` terminal, in key order
    pub fn paths(&self) -> Vec<Vec<Segment>> {
        let mut out = Vec::new();
        self.collect_paths(&mut Vec::new(), &mut out);
        out
    }

    fn collect_paths(&self, path: &mut Vec<Segment>, out: &mut Vec<Vec<Segment>>) {
        match self {
            Target::All => out.push(path.clone()),
            Target::Children(children) => {
                for (segment, sub) in children {
                    path.push(segment.clone());
                    sub.collect_paths(path, out);
                    path.pop();
                }
            }
        }
    }

    /// True when this target selects nothing
    pub fn is_empty(&self) -> bool {
        match self {
            Target::All => false,
            Target::Children(children) => children.values().all(Target::is_empty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seg(s: &str) -> Segment {
        Segment::from(s)
    }

    fn path(l4: &str, l3: &str, l2: &str, l1: u64) -> Vec<Segment> {
        vec![seg(l4), seg(l3), seg(l2), Segment::Int(l1)]
    }

    #[test]
    fn test_insert_and_get() {
        let mut node = Node::branch();
        assert_eq!(node.insert(&path("X", "K", "K", 1), json!("a")), None);
        assert_eq!(node.insert(&path("X", "K", "K", 1), json!("b")), Some(json!("a")));
        assert_eq!(
            node.get(&path("X", "K", "K", 1)).and_then(Node::payload),
            Some(&json!("b"))
        );
        assert!(node.contains(&[seg("X"), seg("K")]));
        assert!(!node.contains(&[seg("Y")]));
        assert!(node.is_canonical(4));
    }

    #[test]
    fn test_remove_prunes_empty_ancestors() {
        let mut node = Node::branch();
        node.insert(&path("X", "K", "K", 1), json!("a"));
        node.insert(&path("X", "K", "K", 2), json!("b"));
        node.insert(&path("X", "J", "K", 1), json!("c"));

        let removed = node.remove(&[seg("X"), seg("K"), seg("K")]).unwrap();
        assert_eq!(removed.leaf_count(), 2);
        assert!(!node.contains(&[seg("X"), seg("K")]));
        assert!(node.contains(&[seg("X"), seg("J")]));

        node.remove(&path("X", "J", "K", 1));
        assert!(node.is_empty());
        assert!(node.is_canonical(4));
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut node = Node::branch();
        node.insert(&path("X", "K", "K", 1), json!("a"));
        assert!(node.remove(&[seg("Y")]).is_none());
        assert!(node.remove(&path("X", "K", "K", 9)).is_none());
        assert_eq!(node.leaf_count(), 1);
    }

    #[test]
    fn test_graft_empty_removes() {
        let mut node = Node::branch();
        node.insert(&path("X", "K", "K", 1), json!("a"));
        node.graft(&[seg("X")], Node::branch());
        assert!(node.is_empty());
    }

    #[test]
    fn test_merge_overlays() {
        let mut left = Node::branch();
        left.insert(&path("X", "K", "K", 1), json!("a"));
        let mut right = Node::branch();
        right.insert(&path("X", "K", "K", 1), json!("z"));
        right.insert(&path("Y", "K", "K", 1), json!("y"));

        left.merge(right);
        assert_eq!(left.leaf_count(), 2);
        assert_eq!(
            left.get(&path("X", "K", "K", 1)).and_then(Node::payload),
            Some(&json!("z"))
        );
    }

    #[test]
    fn test_select_restricts() {
        let mut node = Node::branch();
        node.insert(&path("X", "K", "K", 1), json!("a"));
        node.insert(&path("Y", "K", "K", 1), json!("b"));

        let mut target = Target::default();
        target.add_path(&[seg("Y")]);
        target.add_path(&[seg("Z")]);

        let picked = node.select(&target);
        assert_eq!(picked.leaf_count(), 1);
        assert!(picked.contains(&[seg("Y")]));
        assert!(!picked.contains(&[seg("Z")]));
    }

    #[test]
    fn test_missing_from_reports_minimal_paths() {
        let mut old = Node::branch();
        old.insert(&path("X", "K", "K", 1), json!("a"));
        old.insert(&path("X", "K", "K", 2), json!("b"));
        old.insert(&path("Y", "K", "K", 1), json!("c"));

        let mut new = Node::branch();
        new.insert(&path("X", "K", "K", 1), json!("a"));

        let missing = old.missing_from(&new);
        assert_eq!(missing, vec![path("X", "K", "K", 2), vec![seg("Y")]]);
    }

    #[test]
    fn test_target_paths_and_merge() {
        let mut target = Target::default();
        target.add_path(&[seg("X"), seg("K")]);
        target.add_path(&[seg("X")]);
        assert_eq!(target.paths(), vec![vec![seg("X")]]);

        let mut other = Target::default();
        other.add_path(&[seg("Y")]);
        target.merge(other);
        assert_eq!(target.paths(), vec![vec![seg("X")], vec![seg("Y")]]);

        target.merge(Target::All);
        assert_eq!(target, Target::All);
        assert!(Target::default().is_empty());
    }
}
