//! Hierarchical Trie
//!
//! Internal tree types and the wire codec.
//!
//! # Components
//!
//! - [`Node`] - canonical data tree (no branch without a descendant leaf)
//! - [`Target`] - request tree for queries and drops
//! - [`codec`] - trie/matrix wire shapes

pub mod codec;
mod node;
mod proptest;

pub use codec::{Mode, TargetOptions, Terminals, WILDCARD};
pub use node::{Node, Target};
