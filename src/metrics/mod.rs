//! Cache Metrics System
//!
//! Provides the metrics reporting surface of the range cache. Counters live in
//! [`CacheStatistics`], which is shared between the cache façade and every row
//! so that hits, misses and evictions are recorded where they happen.
//!
//! Metrics are reported through [`CacheMetrics`] as a `BTreeMap` so that keys
//! always come out in the same order.

use std::collections::BTreeMap;

mod statistics;

pub use statistics::CacheStatistics;

/// Uniform metrics reporting interface.
///
/// Implemented by [`CacheStatistics`] and by [`RangeCache`](crate::RangeCache),
/// which adds occupancy gauges to the counters.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Algorithm name for identification.
    fn algorithm_name(&self) -> &'static str;
}
