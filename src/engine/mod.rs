//! Datastore Engine
//!
//! Orchestrates the key validator, the bucket cache and the backing store.
//!
//! # Call Flow
//!
//! ```text
//! caller ─► validate keys ─► bucket (local → backend → new)
//!                                │ authoritative? answer from trie
//!                                ▼
//!                          backing store ─► absorb into bucket ─► caller
//! ```
//!
//! Every operation validates all of its keys before touching storage or the
//! cache. Writes hit storage first and update the cache only after storage
//! succeeded, so a storage error leaves the cache as it was.
//!
//! # Concurrency
//!
//! One engine instance serves one caller at a time (`&mut self`). Separate
//! instances may share a store and a cache backend; the duplicate check of
//! `add` followed by its insert is not atomic against such a peer, and the
//! store's unique constraint is what finally rejects a racing insert.

mod ctrl;
mod read;
mod write;

pub use ctrl::Ctrl;

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::{
    Bucket, BucketCache, CacheBackend, CacheMetrics, CacheSettings, InMemoryBackend,
    MetricsSnapshot, NullBackend,
};
use crate::config::{BackendKind, DatastoreConfig};
use crate::error::Result;
use crate::key::{KeyPath, Segment};
use crate::store::{Columns, Filter, MemoryStore, ResultShape, Schema, Selection, Store};
use crate::trie::Node;

/// Five-level keyed datastore with an authority-tracking cache
pub struct Datastore {
    schema: Schema,
    store: Arc<dyn Store>,
    cache: BucketCache,
    metrics: Arc<CacheMetrics>,
}

impl Datastore {
    /// Create an engine over a store and a shared cache backend
    pub fn new(
        schema: Schema,
        store: Arc<dyn Store>,
        backend: Arc<dyn CacheBackend>,
        settings: CacheSettings,
    ) -> Result<Self> {
        schema.validate()?;
        let metrics = Arc::new(CacheMetrics::new());
        info!(
            table = %schema.table,
            namespace = %settings.namespace,
            backend_active = backend.is_active(),
            "Datastore ready"
        );
        Ok(Self {
            cache: BucketCache::new(settings, backend, metrics.clone()),
            schema,
            store,
            metrics,
        })
    }

    /// Create an engine from configuration
    pub fn from_config(config: &DatastoreConfig, store: Arc<dyn Store>) -> Result<Self> {
        config.validate()?;
        let backend: Arc<dyn CacheBackend> = match config.cache.backend {
            BackendKind::Memory => Arc::new(InMemoryBackend::new()),
            BackendKind::None => Arc::new(NullBackend),
        };
        Self::new(config.schema.clone(), store, backend, config.cache.settings())
    }

    /// In-memory store and in-memory cache backend
    pub fn in_memory() -> Self {
        let metrics = Arc::new(CacheMetrics::new());
        Self {
            schema: Schema::default(),
            store: Arc::new(MemoryStore::new()),
            cache: BucketCache::new(
                CacheSettings::default(),
                Arc::new(InMemoryBackend::new()),
                metrics.clone(),
            ),
            metrics,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Locally held bucket for `page`, if any
    pub fn bucket(&self, page: u64) -> Option<&Bucket> {
        self.cache.get(page)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Drop every cached bucket, locally and in the shared backend
    pub fn flush_cache(&mut self) -> bool {
        self.cache.flush_all()
    }

    /// Drop one cached bucket, locally and in the shared backend
    pub fn flush_bucket(&mut self, page: u64) -> bool {
        self.cache.flush(page)
    }

    /// Remove every row and every cached bucket
    pub fn truncate(&mut self) -> Result<bool> {
        self.store.truncate(&self.schema)?;
        self.metrics.record_storage_delete();
        info!(table = %self.schema.table, "Table truncated");
        Ok(self.flush_cache())
    }

    // -------------------------------------------------------------------------
    // Storage helpers
    // -------------------------------------------------------------------------

    fn select(&self, filter: &Filter, columns: Columns, shape: ResultShape) -> Result<Selection> {
        self.metrics.record_storage_select();
        debug!(query = %self.schema.describe(filter), ?shape, "storage select");
        self.store.select(&self.schema, filter, columns, shape)
    }

    /// Rows under `filter` nested from L5
    fn select_nested(&self, filter: &Filter) -> Result<Node> {
        self.select(filter, Columns::All, ResultShape::Nested)?
            .into_nested()
    }

    fn delete(&self, filter: &Filter) -> Result<u64> {
        self.metrics.record_storage_delete();
        debug!(query = %self.schema.describe(filter), "storage delete");
        self.store.delete(&self.schema, filter)
    }

    fn persist(&mut self, pages: &BTreeSet<u64>) {
        for &page in pages {
            self.cache.persist(page);
        }
    }
}

/// Split a full path into its page and the path below it
fn split_page(path: &[Segment]) -> Option<(u64, &[Segment])> {
    let (first, rest) = path.split_first()?;
    Some((first.as_int()?, rest))
}

/// Key paths for a set of full segment paths
fn key_paths(paths: &[Vec<Segment>]) -> Result<Vec<KeyPath>> {
    paths.iter().map(|path| KeyPath::new(path.clone())).collect()
}
