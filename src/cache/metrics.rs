//! Cache Metrics Collection
//!
//! Counters for how requests are answered: from the local bucket map, from
//! the shared backend, from authority alone, or by falling through to the
//! backing store.

use std::sync::atomic::{AtomicU64, Ordering};

use prometheus::{Encoder, Gauge, IntCounter, Registry, TextEncoder};

use crate::error::{Error, Result};

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Local bucket map
    local_hits: AtomicU64,
    local_misses: AtomicU64,

    // Shared backend
    backend_hits: AtomicU64,
    backend_misses: AtomicU64,
    backend_writes: AtomicU64,
    backend_errors: AtomicU64,

    // Backing store
    storage_selects: AtomicU64,
    storage_writes: AtomicU64,
    storage_deletes: AtomicU64,

    // Authority
    authoritative_answers: AtomicU64,
    authority_grants: AtomicU64,
    flushes: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_local_miss(&self) {
        self.local_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backend_hit(&self) {
        self.backend_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backend_miss(&self) {
        self.backend_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backend_write(&self) {
        self.backend_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backend_error(&self) {
        self.backend_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_select(&self) {
        self.storage_selects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_write(&self) {
        self.storage_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_delete(&self) {
        self.storage_deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// A read answered from an authoritative bucket without storage
    pub fn record_authoritative_answer(&self) {
        self.authoritative_answers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_authority_grant(&self) {
        self.authority_grants.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn storage_selects(&self) -> u64 {
        self.storage_selects.load(Ordering::Relaxed)
    }

    pub fn backend_errors(&self) -> u64 {
        self.backend_errors.load(Ordering::Relaxed)
    }

    fn ratio(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let local_hits = self.local_hits.load(Ordering::Relaxed);
        let local_misses = self.local_misses.load(Ordering::Relaxed);
        let backend_hits = self.backend_hits.load(Ordering::Relaxed);
        let backend_misses = self.backend_misses.load(Ordering::Relaxed);
        MetricsSnapshot {
            local_hits,
            local_misses,
            local_hit_ratio: Self::ratio(local_hits, local_misses),
            backend_hits,
            backend_misses,
            backend_hit_ratio: Self::ratio(backend_hits, backend_misses),
            backend_writes: self.backend_writes.load(Ordering::Relaxed),
            backend_errors: self.backend_errors(),
            storage_selects: self.storage_selects(),
            storage_writes: self.storage_writes.load(Ordering::Relaxed),
            storage_deletes: self.storage_deletes.load(Ordering::Relaxed),
            authoritative_answers: self.authoritative_answers.load(Ordering::Relaxed),
            authority_grants: self.authority_grants.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.local_hits,
            &self.local_misses,
            &self.backend_hits,
            &self.backend_misses,
            &self.backend_writes,
            &self.backend_errors,
            &self.storage_selects,
            &self.storage_writes,
            &self.storage_deletes,
            &self.authoritative_answers,
            &self.authority_grants,
            &self.flushes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of the cache counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub local_hits: u64,
    pub local_misses: u64,
    pub local_hit_ratio: f64,

    pub backend_hits: u64,
    pub backend_misses: u64,
    pub backend_hit_ratio: f64,
    pub backend_writes: u64,
    pub backend_errors: u64,

    pub storage_selects: u64,
    pub storage_writes: u64,
    pub storage_deletes: u64,

    pub authoritative_answers: u64,
    pub authority_grants: u64,
    pub flushes: u64,
}

impl MetricsSnapshot {
    /// Render in the Prometheus text exposition format
    pub fn to_prometheus(&self) -> Result<String> {
        let registry = Registry::new_custom(Some("pentastore".into()), None).map_err(prom_err)?;

        let counters = [
            ("cache_local_hits_total", "Buckets found in the local map", self.local_hits),
            ("cache_local_misses_total", "Buckets missing from the local map", self.local_misses),
            (
                "cache_backend_hits_total",
                "Buckets loaded from the shared backend",
                self.backend_hits,
            ),
            (
                "cache_backend_misses_total",
                "Buckets absent from the shared backend",
                self.backend_misses,
            ),
            (
                "cache_backend_writes_total",
                "Bucket blobs written to the shared backend",
                self.backend_writes,
            ),
            ("cache_backend_errors_total", "Failed or skipped backend calls", self.backend_errors),
            ("storage_selects_total", "Queries issued to the backing store", self.storage_selects),
            (
                "storage_writes_total",
                "Insert and upsert batches issued to the backing store",
                self.storage_writes,
            ),
            ("storage_deletes_total", "Deletes issued to the backing store", self.storage_deletes),
            (
                "cache_authoritative_answers_total",
                "Reads answered from authority alone",
                self.authoritative_answers,
            ),
            (
                "cache_authority_grants_total",
                "Buckets that gained authority",
                self.authority_grants,
            ),
            ("cache_flushes_total", "Bucket or whole-cache flushes", self.flushes),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::new(name, help).map_err(prom_err)?;
            counter.inc_by(value);
            registry.register(Box::new(counter)).map_err(prom_err)?;
        }

        let ratios = [
            ("cache_local_hit_ratio", "Local bucket map hit ratio", self.local_hit_ratio),
            ("cache_backend_hit_ratio", "Shared backend hit ratio", self.backend_hit_ratio),
        ];
        for (name, help, value) in ratios {
            let gauge = Gauge::new(name, help).map_err(prom_err)?;
            gauge.set(value);
            registry.register(Box::new(gauge)).map_err(prom_err)?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(prom_err)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn prom_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics export failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_hit_tracking() {
        let metrics = CacheMetrics::new();

        metrics.record_local_hit();
        metrics.record_local_hit();
        metrics.record_local_miss();
        metrics.record_backend_miss();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.local_hits, 2);
        assert_eq!(snapshot.local_misses, 1);
        assert!((snapshot.local_hit_ratio - 0.666).abs() < 0.01);
        assert_eq!(snapshot.backend_hit_ratio, 0.0);
    }

    #[test]
    fn test_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_storage_select();
        metrics.record_backend_error();
        metrics.record_flush();

        metrics.reset();

        assert_eq!(metrics.storage_selects(), 0);
        assert_eq!(metrics.backend_errors(), 0);
        assert_eq!(metrics.snapshot().flushes, 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = CacheMetrics::new();
        metrics.record_storage_select();
        metrics.record_storage_select();
        metrics.record_authority_grant();

        let text = metrics.snapshot().to_prometheus().unwrap();
        assert!(text.contains("# TYPE pentastore_storage_selects_total counter"));
        assert!(text.contains("pentastore_storage_selects_total 2"));
        assert!(text.contains("pentastore_cache_authority_grants_total 1"));
        assert!(text.contains("pentastore_cache_local_hit_ratio 0"));
    }
}
