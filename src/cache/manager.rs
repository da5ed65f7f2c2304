//! Bucket Cache Manager
//!
//! Two tiers in front of the backing store:
//!
//! - Local: buckets owned by this engine instance (a plain map, no locking)
//! - Backend: framed bucket blobs in the shared [`CacheBackend`]
//!
//! A bucket is looked up local → backend → new empty bucket, and every
//! change is written through to the backend. Backend failures are logged
//! and counted, never returned.
//!
//! A blob that could not be rewritten or deleted may no longer mirror
//! storage. Its page is remembered as pending and its namespace is deleted
//! before the next backend call once the backend is reachable again; until
//! then the backend is not consulted for that page.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::backend::{CacheBackend, ALL_MARKER};
use super::bucket::{Bucket, StoredBucket};
use super::compression::{CompressionConfig, CompressionManager};
use super::metrics::CacheMetrics;
use crate::error::{Error, Result};

/// Key of the bucket blob inside its namespace
const BUCKET_KEY: &str = "bucket";

/// Where a bucket was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Already owned by this instance
    Local,
    /// Loaded from the shared backend
    Backend,
    /// Not cached anywhere; created empty
    Fresh,
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::Local => write!(f, "local"),
            CacheTier::Backend => write!(f, "backend"),
            CacheTier::Fresh => write!(f, "fresh"),
        }
    }
}

/// Cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Namespace prefix shared by every bucket of this datastore
    pub namespace: String,
    /// Blob compression
    pub compression: CompressionConfig,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            namespace: "pentastore".to_string(),
            compression: CompressionConfig::default(),
        }
    }
}

/// Local bucket map over a shared backend
pub struct BucketCache {
    local: HashMap<u64, Bucket>,
    backend: Arc<dyn CacheBackend>,
    compression: CompressionManager,
    namespace: String,
    metrics: Arc<CacheMetrics>,
    /// Pages whose backend blob may be stale
    pending: BTreeSet<u64>,
    /// Every blob of this namespace may be stale
    pending_all: bool,
}

impl BucketCache {
    pub fn new(
        settings: CacheSettings,
        backend: Arc<dyn CacheBackend>,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            local: HashMap::new(),
            backend,
            compression: CompressionManager::with_config(settings.compression),
            namespace: settings.namespace,
            metrics,
            pending: BTreeSet::new(),
            pending_all: false,
        }
    }

    /// Backend namespace of one bucket
    pub fn namespace_for(&self, page: u64) -> String {
        format!("{}/{}", self.namespace, page)
    }

    /// Backend namespace marker covering every bucket
    pub fn all_namespace(&self) -> String {
        format!("{}/{}", self.namespace, ALL_MARKER)
    }

    /// Locally held bucket, without consulting the backend
    pub fn get(&self, page: u64) -> Option<&Bucket> {
        self.local.get(&page)
    }

    /// Bucket for `page`, loading or creating it
    pub fn load(&mut self, page: u64) -> &mut Bucket {
        let tier = if self.local.contains_key(&page) {
            self.metrics.record_local_hit();
            CacheTier::Local
        } else {
            self.metrics.record_local_miss();
            self.reconcile();
            let (bucket, tier) = match self.fetch(page) {
                Some(bucket) => (bucket, CacheTier::Backend),
                None => (Bucket::new(page), CacheTier::Fresh),
            };
            self.local.insert(page, bucket);
            tier
        };
        debug!(page, %tier, "bucket lookup");
        self.local.entry(page).or_insert_with(|| Bucket::new(page))
    }

    /// Write the local copy of `page` through to the backend.
    ///
    /// If the write cannot happen the old blob is deleted, or remembered as
    /// pending when even that fails.
    pub fn persist(&mut self, page: u64) {
        let Some(bucket) = self.local.get(&page) else {
            return;
        };
        let stored = bucket.to_stored();
        if !self.backend.is_active() {
            self.pending.insert(page);
            return;
        }
        self.reconcile();

        let body = match serde_json::to_vec(&stored) {
            Ok(body) => body,
            Err(e) => {
                warn!(page, error = %e, "Failed to serialize bucket");
                self.invalidate(page);
                return;
            }
        };
        let (blob, algorithm) = self.compression.seal(&body);
        match self.backend.set(&self.namespace_for(page), BUCKET_KEY, blob) {
            Ok(()) => {
                self.pending.remove(&page);
                self.metrics.record_backend_write();
                debug!(page, %algorithm, bytes = body.len(), "bucket written through");
            }
            Err(e) => {
                self.backend_failed("set", &e);
                self.invalidate(page);
            }
        }
    }

    /// Drop one bucket locally and in the backend.
    ///
    /// `false` when the backend blob could not be deleted; the deletion is
    /// retried before the next backend call.
    pub fn flush(&mut self, page: u64) -> bool {
        self.local.remove(&page);
        self.metrics.record_flush();
        if !self.backend.is_active() {
            self.pending.insert(page);
            return true;
        }
        self.reconcile();
        self.invalidate(page)
    }

    /// Drop every bucket locally and in the backend
    pub fn flush_all(&mut self) -> bool {
        let dropped = self.local.len();
        self.local.clear();
        self.metrics.record_flush();
        self.pending.clear();
        self.pending_all = true;
        let ok = !self.backend.is_active() || self.reconcile();
        info!(namespace = %self.namespace, dropped, "Cache flushed");
        ok
    }

    /// Pages (plus one for the whole namespace) whose backend blob still
    /// awaits deletion
    pub fn pending_invalidations(&self) -> usize {
        self.pending.len() + usize::from(self.pending_all)
    }

    /// Number of locally held buckets
    pub fn len(&self) -> usize {
        self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    fn fetch(&self, page: u64) -> Option<Bucket> {
        if !self.backend.is_active() || self.pending_all || self.pending.contains(&page) {
            return None;
        }
        let blob = match self.backend.get(&self.namespace_for(page), BUCKET_KEY) {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                self.metrics.record_backend_miss();
                return None;
            }
            Err(e) => {
                self.backend_failed("get", &e);
                return None;
            }
        };
        match self.decode(page, &blob) {
            Ok(bucket) => {
                self.metrics.record_backend_hit();
                Some(bucket)
            }
            Err(e) => {
                warn!(page, error = %e, "Discarding unreadable cached bucket");
                self.metrics.record_backend_miss();
                None
            }
        }
    }

    fn decode(&self, page: u64, blob: &[u8]) -> Result<Bucket> {
        let body = self.compression.open(blob)?;
        let stored: StoredBucket = serde_json::from_slice(&body)?;
        if stored.page != page {
            return Err(Error::Internal(format!(
                "namespace for page {} holds bucket {}",
                page, stored.page
            )));
        }
        Bucket::from_stored(stored)
    }

    /// Delete the blob of `page` now, or remember it as pending
    fn invalidate(&mut self, page: u64) -> bool {
        if self.delete_namespace(&self.namespace_for(page)) {
            self.pending.remove(&page);
            true
        } else {
            self.pending.insert(page);
            false
        }
    }

    /// Delete every pending blob; `true` once none remain
    fn reconcile(&mut self) -> bool {
        if !self.backend.is_active() {
            return !self.pending_all && self.pending.is_empty();
        }
        if self.pending_all {
            if !self.delete_namespace(&self.all_namespace()) {
                return false;
            }
            self.pending_all = false;
            self.pending.clear();
            return true;
        }
        let pending = std::mem::take(&mut self.pending);
        for page in pending {
            if !self.delete_namespace(&self.namespace_for(page)) {
                self.pending.insert(page);
            }
        }
        self.pending.is_empty()
    }

    fn delete_namespace(&self, namespace: &str) -> bool {
        match self.backend.delete_namespace(namespace) {
            Ok(removed) => {
                debug!(namespace, removed, "backend namespace deleted");
                true
            }
            Err(e) => {
                self.backend_failed("delete", &e);
                false
            }
        }
    }

    fn backend_failed(&self, operation: &str, error: &Error) {
        self.metrics.record_backend_error();
        warn!(operation, error = %error, "Cache backend unavailable, continuing storage-only");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::{InMemoryBackend, NullBackend};
    use crate::key::Segment;
    use crate::trie::Node;
    use serde_json::json;

    fn cache_with(backend: Arc<dyn CacheBackend>) -> (BucketCache, Arc<CacheMetrics>) {
        let metrics = Arc::new(CacheMetrics::new());
        (
            BucketCache::new(CacheSettings::default(), backend, metrics.clone()),
            metrics,
        )
    }

    fn leaf() -> Vec<Segment> {
        vec!["X".into(), "K".into(), "K".into(), Segment::Int(1)]
    }

    #[test]
    fn test_namespaces() {
        let (cache, _) = cache_with(Arc::new(NullBackend));
        assert_eq!(cache.namespace_for(12), "pentastore/12");
        assert_eq!(cache.all_namespace(), "pentastore/*");
    }

    #[test]
    fn test_fresh_then_local() {
        let (mut cache, metrics) = cache_with(Arc::new(InMemoryBackend::new()));
        assert!(cache.load(1).keys().is_empty());
        cache.load(1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.local_misses, 1);
        assert_eq!(snapshot.local_hits, 1);
        assert_eq!(snapshot.backend_misses, 1);
    }

    #[test]
    fn test_shared_backend_between_instances() {
        let backend = Arc::new(InMemoryBackend::new());
        let (mut first, _) = cache_with(backend.clone());
        let mut keys = Node::branch();
        keys.insert(&leaf(), json!("a"));
        first.load(1).absorb_full(keys);
        first.persist(1);

        let (mut second, metrics) = cache_with(backend);
        let bucket = second.load(1);
        assert!(bucket.is_authoritative());
        assert!(bucket.contains_leaf(&leaf()));
        assert_eq!(metrics.snapshot().backend_hits, 1);
    }

    #[test]
    fn test_flush_clears_both_tiers() {
        let backend = Arc::new(InMemoryBackend::new());
        let (mut cache, _) = cache_with(backend.clone());
        cache.load(1).insert_leaf(&leaf(), json!(1));
        cache.persist(1);
        cache.load(2).insert_leaf(&leaf(), json!(2));
        cache.persist(2);

        assert!(cache.flush(1));
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
        assert_eq!(backend.stats().namespaces, 1);

        assert!(cache.flush_all());
        assert!(cache.is_empty());
        assert_eq!(backend.stats().namespaces, 0);
    }

    #[test]
    fn test_backend_outage_is_tolerated() {
        let backend = Arc::new(InMemoryBackend::new());
        let (mut cache, metrics) = cache_with(backend.clone());
        backend.set_active(false);

        cache.load(1).insert_leaf(&leaf(), json!(1));
        cache.persist(1);
        assert!(cache.flush(1));
        assert_eq!(metrics.snapshot().backend_errors, 0);
        assert_eq!(backend.stats().writes, 0);
        assert_eq!(cache.pending_invalidations(), 1);
    }

    #[test]
    fn test_stale_blob_is_deleted_after_outage() {
        let backend = Arc::new(InMemoryBackend::new());
        let (mut cache, _) = cache_with(backend.clone());
        let mut keys = Node::branch();
        keys.insert(&leaf(), json!("a"));
        cache.load(1).absorb_full(keys);
        cache.persist(1);

        backend.set_active(false);
        cache.load(1).remove(&leaf());
        cache.persist(1);
        assert_eq!(cache.pending_invalidations(), 1);

        backend.set_active(true);
        assert_eq!(backend.stats().namespaces, 1);
        cache.load(2);
        assert_eq!(cache.pending_invalidations(), 0);
        assert_eq!(backend.stats().namespaces, 0);

        let (mut peer, metrics) = cache_with(backend);
        assert!(!peer.load(1).is_authoritative());
        assert_eq!(metrics.snapshot().backend_hits, 0);
    }

    #[test]
    fn test_flush_all_during_outage_is_replayed() {
        let backend = Arc::new(InMemoryBackend::new());
        let (mut cache, _) = cache_with(backend.clone());
        cache.load(1).insert_leaf(&leaf(), json!(1));
        cache.persist(1);
        cache.load(2).insert_leaf(&leaf(), json!(2));
        cache.persist(2);

        backend.set_active(false);
        assert!(cache.flush_all());
        backend.set_active(true);

        cache.load(3).insert_leaf(&leaf(), json!(3));
        cache.persist(3);
        assert_eq!(cache.pending_invalidations(), 0);
        assert_eq!(backend.stats().namespaces, 1);
    }

    #[test]
    fn test_corrupt_blob_is_a_miss() {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .set("pentastore/3", BUCKET_KEY, bytes::Bytes::from_static(b"\x00{oops"))
            .unwrap();
        let (mut cache, metrics) = cache_with(backend);
        assert!(cache.load(3).keys().is_empty());
        assert_eq!(metrics.snapshot().backend_hits, 0);
    }
}
