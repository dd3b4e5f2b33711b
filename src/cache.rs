//! Range Cache
//!
//! The façade the temporal storage engine talks to. It maps row identities to
//! [`CacheRow`]s, owns the one [`UsageRegistry`] all rows share, and keeps the
//! number of cached entries within `max_size` by trimming that registry after
//! every write.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         RangeCache                               │
//! │                                                                  │
//! │  rows: RwLock<HashMap<row id, CacheRow>>                         │
//! │     ┌────────────┐   ┌────────────┐         ┌────────────┐       │
//! │     │  row "a"   │   │  row "b"   │   ...   │  row "n"   │       │
//! │     │ [200;∞)    │   │ [50;90)    │         │ [7;∞)      │       │
//! │     │ [100;200)  │   └─────▲──────┘         └─────▲──────┘       │
//! │     └─────▲──────┘         │ eviction listener    │              │
//! │           │                │ (topic = row id)     │              │
//! │  ┌────────┴────────────────┴──────────────────────┴───────────┐  │
//! │  │ UsageRegistry: MRU ⇄ ... ⇄ LRU over (row id, period)       │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows are created on the first write to a row identity and then live until
//! [`clear`](RangeCache::clear). Only entries are capacity bounded; the row map
//! grows with the number of distinct row identities written.
//!
//! # Thread Safety
//!
//! `RangeCache` is `Send + Sync` and is meant to be shared via `Arc` by all
//! transactions. Every operation runs to completion on the calling thread.

use crate::config::RangeCacheConfig;
use crate::entry::{CacheGetResult, RangedResult};
use crate::error::{check_timestamp, check_write_timestamp, RangeCacheError, Result};
use crate::metrics::{CacheMetrics, CacheStatistics};
use crate::registry::UsageRegistry;
use crate::row::{CacheRow, CachedRange, SharedRegistry};
use log::debug;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;

#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

/// A concurrent, LRU-bounded cache of validity windows per row.
///
/// `R` identifies a row, typically a [`RowKey`](crate::RowKey). `V` is the
/// cached value; use an `Option<_>` to cache deletions.
///
/// # Examples
///
/// ```
/// use temporal_range_cache::{Period, QualifiedKey, RangeCache, RangedResult, RowKey};
///
/// let cache = RangeCache::new(100);
/// let key = QualifiedKey::new("default", "Hello");
/// let row = RowKey::new("master", key.clone());
///
/// let period = Period::create_range(100, 200).unwrap();
/// cache.cache(&row, RangedResult::new(key, "World", period));
///
/// assert!(cache.get(&row, 99).unwrap().is_miss());
/// assert_eq!(cache.get(&row, 100).unwrap().into_option(), Some("World"));
/// assert!(cache.get(&row, 200).unwrap().is_miss());
///
/// cache.write_through(&row, 300, "Foo").unwrap();
/// assert_eq!(cache.get(&row, 400).unwrap().into_option(), Some("Foo"));
/// assert_eq!(cache.size(), 2);
/// ```
pub struct RangeCache<R, V>
where
    R: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    config: RangeCacheConfig,
    rows: RwLock<HashMap<Arc<R>, Arc<CacheRow<R, V>>>>,
    registry: SharedRegistry<R>,
    statistics: Arc<CacheStatistics>,
}

impl<R, V> RangeCache<R, V>
where
    R: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache holding at most `max_size` entries; `<= 0` disables eviction.
    pub fn new(max_size: i32) -> Self {
        Self::init(RangeCacheConfig::with_max_size(max_size))
    }

    /// Creates a cache from a configuration.
    pub fn init(config: RangeCacheConfig) -> Self {
        let registry: SharedRegistry<R> = Arc::new(UsageRegistry::new(
            |element: &CachedRange<R>| Arc::clone(element.row()),
        ));
        RangeCache {
            config,
            rows: RwLock::new(HashMap::with_capacity(config.row_capacity)),
            registry,
            statistics: Arc::new(CacheStatistics::new()),
        }
    }

    /// Returns the value cached for `row_id` at `timestamp`.
    ///
    /// A missing row is a miss; it is not created.
    pub fn get(&self, row_id: &R, timestamp: i64) -> Result<CacheGetResult<V>> {
        check_timestamp(timestamp)?;
        match self.row(row_id) {
            Some(row) => Ok(row.get(timestamp)),
            None => {
                self.statistics.record_miss();
                Ok(CacheGetResult::miss())
            }
        }
    }

    /// Caches an authoritative lookup result for `row_id`.
    ///
    /// Results with an empty period are ignored.
    pub fn cache(&self, row_id: &R, result: RangedResult<V>) {
        if result.period().is_empty() {
            return;
        }
        self.get_or_create_row(row_id).put(result);
        self.shrink_if_required();
    }

    /// Records that `value` was committed for `row_id` at `timestamp`.
    ///
    /// Callers supply non-decreasing timestamps per row. A `timestamp` of
    /// [`Period::INFINITY`](crate::Period::INFINITY) is rejected, since no
    /// period can start there.
    pub fn write_through(&self, row_id: &R, timestamp: i64, value: V) -> Result<()> {
        check_write_timestamp(timestamp)?;
        self.get_or_create_row(row_id)
            .write_through(timestamp, value);
        self.shrink_if_required();
        Ok(())
    }

    /// Discards cached knowledge that contains `timestamp` or starts after it.
    ///
    /// Returns the number of discarded entries.
    pub fn rollback_to_timestamp(&self, timestamp: i64) -> Result<usize> {
        check_timestamp(timestamp)?;
        let discarded: usize = self
            .snapshot_rows()
            .iter()
            .map(|row| row.rollback_to_timestamp(timestamp))
            .sum();
        debug!(
            "rollback to {} discarded {} cached entries",
            timestamp, discarded
        );
        Ok(discarded)
    }

    /// Read-through lookup.
    ///
    /// Answers from the cache when possible. On a miss `loader` performs the
    /// authoritative lookup; its result is cached and its value returned.
    /// Loader errors are passed through and leave the cache untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// use temporal_range_cache::{
    ///     Period, QualifiedKey, RangeCache, RangeCacheError, RangedResult,
    /// };
    ///
    /// let cache: RangeCache<&str, u32> = RangeCache::new(10);
    /// let load = |timestamp: i64| -> Result<RangedResult<u32>, RangeCacheError> {
    ///     let period = Period::create_range(0, 1000)?;
    ///     Ok(RangedResult::new(QualifiedKey::new("ks", "k"), timestamp as u32, period))
    /// };
    ///
    /// assert_eq!(cache.get_or_load(&"k", 5, load), Ok(5));
    /// // second lookup is served from the cached [0;1000) window
    /// assert_eq!(cache.get_or_load(&"k", 7, load), Ok(5));
    /// ```
    pub fn get_or_load<F, E>(&self, row_id: &R, timestamp: i64, loader: F) -> std::result::Result<V, E>
    where
        F: FnOnce(i64) -> std::result::Result<RangedResult<V>, E>,
        E: From<RangeCacheError>,
    {
        if let CacheGetResult::Hit { value, .. } = self.get(row_id, timestamp)? {
            return Ok(value);
        }
        let result = loader(timestamp)?;
        let value = result.value().clone();
        self.cache(row_id, result);
        Ok(value)
    }

    /// Drops every row, every cached entry and every eviction listener.
    ///
    /// Operations still running on a dropped row finish on that row alone and
    /// no longer reach the registry.
    pub fn clear(&self) {
        // the map stays locked until the registry is empty, otherwise a row
        // created in between would lose its listener
        let mut rows = self.rows.write();
        let dropped = rows.len();
        for row in rows.values() {
            row.detach();
        }
        rows.clear();
        self.registry.clear();
        drop(rows);
        debug!("cleared range cache ({} rows)", dropped);
    }

    /// Evicts least recently used entries until at most `max_size` remain.
    ///
    /// Does nothing when eviction is disabled.
    pub fn shrink_if_required(&self) {
        if !self.config.is_bounded() {
            return;
        }
        self.registry
            .remove_least_recently_used_until_size_is(self.config.max_size as usize);
    }

    /// Number of cached entries across all rows.
    pub fn size(&self) -> usize {
        self.snapshot_rows().iter().map(|row| row.size()).sum()
    }

    /// Whether no row holds a cached entry.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of entries the LRU registry tracks.
    ///
    /// Equals [`size`](Self::size) whenever no operation is in flight.
    pub fn tracked_entries(&self) -> usize {
        self.registry.size()
    }

    /// Number of rows created since the last [`clear`](Self::clear).
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    /// Number of eviction listeners registered with the shared registry.
    ///
    /// Always equal to [`row_count`](Self::row_count).
    pub fn listener_count(&self) -> usize {
        self.registry.listener_count()
    }

    /// Configured capacity; `<= 0` means eviction is disabled.
    pub fn max_size(&self) -> i32 {
        self.config.max_size
    }

    /// Hit/miss counters; call [`CacheStatistics::reset`] to start over.
    pub fn statistics(&self) -> &CacheStatistics {
        &self.statistics
    }

    fn row(&self, row_id: &R) -> Option<Arc<CacheRow<R, V>>> {
        self.rows.read().get(row_id).cloned()
    }

    /// Returns the row for `row_id`, creating it if absent.
    ///
    /// Creation happens under the map's write lock, so concurrent first
    /// writers of one row identity end up sharing a single row and listener.
    fn get_or_create_row(&self, row_id: &R) -> Arc<CacheRow<R, V>> {
        if let Some(row) = self.row(row_id) {
            return row;
        }
        let mut rows = self.rows.write();
        let row = rows.entry(Arc::new(row_id.clone())).or_insert_with_key(|id| {
            debug!("creating cache row");
            CacheRow::create(
                Arc::clone(id),
                Arc::clone(&self.registry),
                Arc::clone(&self.statistics),
            )
        });
        Arc::clone(row)
    }

    /// Clones the current rows so no map lock is held while rows are used.
    fn snapshot_rows(&self) -> Vec<Arc<CacheRow<R, V>>> {
        self.rows.read().values().cloned().collect()
    }
}

impl<R, V> CacheMetrics for RangeCache<R, V>
where
    R: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.statistics.metrics();
        metrics.insert("entries".to_string(), self.size() as f64);
        metrics.insert("rows".to_string(), self.row_count() as f64);
        metrics.insert("max_size".to_string(), f64::from(self.config.max_size));
        metrics
    }

    fn algorithm_name(&self) -> &'static str {
        self.statistics.algorithm_name()
    }
}

impl<R, V> fmt::Debug for RangeCache<R, V>
where
    R: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeCache")
            .field("config", &self.config)
            .field("rows", &self.row_count())
            .field("registry", &self.registry)
            .finish()
    }
}
