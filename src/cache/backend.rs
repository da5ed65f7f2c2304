//! Shared Cache Backends
//!
//! Namespaced blob storage shared by every engine instance pointed at the
//! same cache. A namespace ending in `/*` passed to
//! [`CacheBackend::delete_namespace`] drops every namespace with that prefix.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;

use crate::error::{Error, Result};

/// Suffix marking a namespace prefix
pub const ALL_MARKER: &str = "*";

/// Shared cache backend
pub trait CacheBackend: Send + Sync {
    /// Fetch a blob
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Bytes>>;

    /// Store a blob
    fn set(&self, namespace: &str, key: &str, value: Bytes) -> Result<()>;

    /// Drop a namespace (or every namespace under a `prefix/*` marker);
    /// returns the number of blobs removed
    fn delete_namespace(&self, namespace: &str) -> Result<u64>;

    /// Whether calls are currently worth making
    fn is_active(&self) -> bool;

    fn stats(&self) -> BackendStats;
}

/// Backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub namespaces: u64,
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
}

/// In-process backend for single-process use and tests
pub struct InMemoryBackend {
    /// namespace -> key -> blob
    storage: DashMap<String, DashMap<String, Bytes>>,
    active: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self {
            storage: DashMap::new(),
            active: AtomicBool::new(true),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend going down or coming back
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::BackendUnavailable("in-memory backend is offline".into()))
        }
    }
}

impl CacheBackend for InMemoryBackend {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Bytes>> {
        self.ensure_active()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .storage
            .get(namespace)
            .and_then(|entries| entries.get(key).map(|blob| blob.clone())))
    }

    fn set(&self, namespace: &str, key: &str, value: Bytes) -> Result<()> {
        self.ensure_active()?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.storage
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn delete_namespace(&self, namespace: &str) -> Result<u64> {
        self.ensure_active()?;
        self.deletes.fetch_add(1, Ordering::Relaxed);

        let Some(prefix) = namespace.strip_suffix(ALL_MARKER) else {
            return Ok(self
                .storage
                .remove(namespace)
                .map(|(_, entries)| entries.len() as u64)
                .unwrap_or(0));
        };
        let doomed: Vec<String> = self
            .storage
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        let mut removed = 0;
        for name in doomed {
            if let Some((_, entries)) = self.storage.remove(&name) {
                removed += entries.len() as u64;
            }
        }
        Ok(removed)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            namespaces: self.storage.len() as u64,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

/// Backend that stores nothing (storage-only operation)
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl CacheBackend for NullBackend {
    fn get(&self, _namespace: &str, _key: &str) -> Result<Option<Bytes>> {
        Ok(None)
    }

    fn set(&self, _namespace: &str, _key: &str, _value: Bytes) -> Result<()> {
        Ok(())
    }

    fn delete_namespace(&self, _namespace: &str) -> Result<u64> {
        Ok(0)
    }

    fn is_active(&self) -> bool {
        false
    }

    fn stats(&self) -> BackendStats {
        BackendStats::default()
    }
}
