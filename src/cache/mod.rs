//! Bucket Cache
//!
//! One [`Bucket`] per L5 value, held in two tiers in front of the backing
//! store.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      BucketCache                            │
//! ├──────────────────────────────┬─────────────────────────────┤
//! │  Local (engine-owned)        │  Backend (shared)            │
//! │  HashMap<l5, Bucket>         │  "{namespace}/{l5}" → blob   │
//! │  keys trie + LUTs +          │  [tag][JSON | LZ4]           │
//! │  authority flag              │  flush-all: "{namespace}/*"  │
//! └──────────────────────────────┴─────────────────────────────┘
//! ```
//!
//! # Authority
//!
//! A bucket is authoritative once a full scan of its page has been absorbed.
//! Until then a cache miss proves nothing and reads fall through to storage.

mod backend;
mod bucket;
mod manager;
mod metrics;
pub mod compression;

pub use backend::{BackendStats, CacheBackend, InMemoryBackend, NullBackend, ALL_MARKER};
pub use bucket::{Bucket, StoredBucket, LEAF_DEPTH};
pub use compression::{CompressionAlgorithm, CompressionConfig, CompressionManager};
pub use manager::{BucketCache, CacheSettings, CacheTier};
pub use metrics::{CacheMetrics, MetricsSnapshot};
