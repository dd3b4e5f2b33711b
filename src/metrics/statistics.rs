//! Lock-free hit/miss counters.

use super::CacheMetrics;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters describing how well the cache serves its callers.
///
/// All counters can be bumped concurrently from any thread. Ratios are derived
/// on demand and are `0.0` while no request has been recorded.
///
/// # Examples
///
/// ```
/// use temporal_range_cache::metrics::CacheStatistics;
///
/// let stats = CacheStatistics::new();
/// assert_eq!(stats.hit_ratio(), 0.0);
///
/// stats.record_hit();
/// stats.record_hit();
/// stats.record_hit();
/// stats.record_miss();
/// assert_eq!(stats.requests(), 4);
/// assert_eq!(stats.hit_ratio(), 0.75);
/// assert_eq!(stats.miss_ratio(), 0.25);
///
/// stats.reset();
/// assert_eq!(stats.hits(), 0);
/// ```
#[derive(Debug, Default)]
pub struct CacheStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    write_throughs: AtomicU64,
    rollbacks: AtomicU64,
}

impl CacheStatistics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a lookup answered from the cache.
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a lookup the cache could not answer.
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an entry dropped from a row because the LRU registry evicted it.
    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a committed write applied to a row.
    #[inline]
    pub fn record_write_through(&self) {
        self.write_throughs.fetch_add(1, Ordering::Relaxed);
    }

    /// Records entries discarded by a rollback.
    #[inline]
    pub fn record_rollback(&self, discarded: u64) {
        self.rollbacks.fetch_add(discarded, Ordering::Relaxed);
    }

    /// Lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups the cache could not answer.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Entries dropped by LRU eviction.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Write-throughs applied.
    pub fn write_throughs(&self) -> u64 {
        self.write_throughs.load(Ordering::Relaxed)
    }

    /// Total number of entries discarded by rollbacks.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// Hits plus misses.
    pub fn requests(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Fraction of requests answered from the cache, `0.0` with no requests.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let requests = hits + self.misses();
        if requests > 0 {
            hits as f64 / requests as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that missed, `0.0` with no requests.
    pub fn miss_ratio(&self) -> f64 {
        let misses = self.misses();
        let requests = self.hits() + misses;
        if requests > 0 {
            misses as f64 / requests as f64
        } else {
            0.0
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.write_throughs.store(0, Ordering::Relaxed);
        self.rollbacks.store(0, Ordering::Relaxed);
    }
}

impl CacheMetrics for CacheStatistics {
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();

        metrics.insert("cache_hits".to_string(), self.hits() as f64);
        metrics.insert("cache_misses".to_string(), self.misses() as f64);
        metrics.insert("requests".to_string(), self.requests() as f64);
        metrics.insert("evictions".to_string(), self.evictions() as f64);
        metrics.insert("write_throughs".to_string(), self.write_throughs() as f64);
        metrics.insert("rollbacks".to_string(), self.rollbacks() as f64);

        // Rates (0.0 to 1.0)
        metrics.insert("hit_rate".to_string(), self.hit_ratio());
        metrics.insert("miss_rate".to_string(), self.miss_ratio());

        metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "RANGE-LRU"
    }
}
