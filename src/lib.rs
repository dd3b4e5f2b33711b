//! # temporal-range-cache
//!
//! An in-memory read cache of *validity windows* for a bitemporal, versioned
//! key-value store. For every row (a qualified key on a branch) the cache keeps
//! the values it has seen together with the half-open period `[lower, upper)`
//! during which each value was the authoritative answer, and answers "what was
//! the value of this row at timestamp T" without going back to storage.
//!
//! ```text
//!   transaction ──get(row, T)──▶ RangeCache ──hit──▶ value, valid_from
//!                                    │
//!                                   miss
//!                                    ▼
//!                          temporal storage engine
//!                                    │ RangedResult (value + period)
//!                                    ▼
//!                          RangeCache::cache(row, result)
//!
//!   commit   ──write_through(row, T, value)──▶ narrow open window, open new one
//!   rollback ──rollback_to_timestamp(T)─────▶ drop windows at or after T
//! ```
//!
//! ## Quick Reference
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RangeCache`] | Thread-safe façade: rows, shared LRU registry, capacity, statistics |
//! | [`UsageRegistry`] | Generic LRU tracker with topic-scoped eviction listeners |
//! | [`Period`] | Half-open validity interval, possibly open-ended |
//! | [`RangedResult`] | A value with the period it was valid for |
//! | [`CacheGetResult`] | Hit (value + validity start) or the shared miss |
//! | [`CacheStatistics`](metrics::CacheStatistics) | Atomic hit/miss counters and ratios |
//!
//! ## Example
//!
//! ```rust
//! use temporal_range_cache::{Period, QualifiedKey, RangeCache, RangedResult, RowKey};
//!
//! let cache = RangeCache::new(1);
//! let key = QualifiedKey::new("default", "Hello");
//! let row = RowKey::new("master", key.clone());
//!
//! cache.cache(&row, RangedResult::new(key.clone(), "World", Period::create_range(100, 200).unwrap()));
//! cache.cache(&row, RangedResult::new(key, "Foo", Period::create_range(200, 300).unwrap()));
//!
//! // max_size = 1: the older window was evicted
//! assert_eq!(cache.get(&row, 250).unwrap().into_option(), Some("Foo"));
//! assert!(cache.get(&row, 150).unwrap().is_miss());
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration for the range cache
//! - [`metrics`]: Statistics and metrics reporting

/// Argument-contract errors.
///
/// Every fallible operation reports a [`RangeCacheError`]; all variants are
/// programmer errors rather than transient conditions.
pub mod error;

/// Half-open validity periods.
pub mod period;

/// Row identities and the values exchanged with the storage engine.
///
/// Provides [`QualifiedKey`], [`RowKey`], [`RangedResult`] and
/// [`CacheGetResult`].
pub mod entry;

/// Doubly linked list implementation with O(1) relinking.
///
/// **Note**: This module is internal infrastructure. It exposes unsafe raw
/// pointer operations that require careful invariant maintenance.
pub(crate) mod list;

/// Generic least recently used usage registry.
///
/// Tracks recency over arbitrary elements and notifies topic-scoped and global
/// listeners when elements are evicted.
pub mod registry;

/// Per-row ordered validity windows.
pub(crate) mod row;

/// The range cache façade.
pub mod cache;

/// Range cache configuration.
pub mod config;

/// Cache metrics system.
///
/// Provides the atomic [`CacheStatistics`](metrics::CacheStatistics) counters
/// and the [`CacheMetrics`](metrics::CacheMetrics) reporting trait.
pub mod metrics;

pub use cache::RangeCache;
pub use config::RangeCacheConfig;
pub use entry::{CacheGetResult, QualifiedKey, RangedResult, RowKey};
pub use error::{RangeCacheError, Result};
pub use metrics::{CacheMetrics, CacheStatistics};
pub use period::Period;
pub use registry::{EvictionListener, ListenerId, Usage, UsageRegistry};
