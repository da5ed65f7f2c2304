//! Pentastore - Five-Level Keyed Datastore
//!
//! Stores opaque payloads under a composite key (L5, L4, L3, L2, L1) in a
//! relational table, with a bucket cache per L5 value that knows when it
//! holds a complete mirror of its page.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Datastore                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │     Key      │───▶│    Bucket    │───▶│   Backing    │       │
//! │  │  Validator   │    │    Cache     │    │    Store     │       │
//! │  │ + Trie Codec │    │ local+shared │    │ (rows/table) │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use pentastore::{Ctrl, Datastore};
//! use serde_json::json;
//!
//! let mut store = Datastore::in_memory();
//! let ctrl = Ctrl::default();
//! let key = [json!(1), json!("X"), json!("K"), json!("K"), json!(1)];
//! store.add(&key, json!("a"), &ctrl).unwrap();
//!
//! let (result, valid) = store.get_multi(&json!([1]), &ctrl).unwrap();
//! assert!(valid);
//! assert_eq!(result["1"]["X"]["K"]["K"]["1"], json!("a"));
//! ```
//!
//! # Modules
//!
//! - [`key`] - Key levels, typed segments and the key validator
//! - [`trie`] - Data and request trees, trie/matrix codec
//! - [`store`] - Backing store contract and implementations
//! - [`cache`] - Buckets, shared backends, compression and metrics
//! - [`engine`] - The datastore engine
//! - [`config`] - YAML configuration
//! - [`error`] - Error types

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod key;
pub mod store;
pub mod trie;

// Re-export commonly used types
pub use cache::{Bucket, CacheBackend, CacheSettings, InMemoryBackend, MetricsSnapshot, NullBackend};
pub use config::DatastoreConfig;
pub use engine::{Ctrl, Datastore};
pub use error::{Error, Result};
pub use key::{Level, Segment};
pub use store::{FileStore, MemoryStore, Schema, Store};
pub use trie::Mode;
