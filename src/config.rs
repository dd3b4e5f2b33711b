//! Range Cache Configuration
//!
//! Configuration structs have public fields for simple instantiation. Build a
//! [`RangeCacheConfig`] and hand it to [`RangeCache::init`](crate::RangeCache::init).
//!
//! # Sizing Guidelines
//!
//! `max_size` bounds the number of *entries* (validity windows) held across all
//! rows. It does not bound the number of rows: a row is kept for every distinct
//! row identity ever written, even after all of its entries have been evicted.
//!
//! ```text
//! Total Memory ≈ max_size × (entry overhead + value size)
//!              + distinct rows × row overhead
//! ```
//!
//! A `max_size` of zero or below disables LRU eviction entirely.
//!
//! # Examples
//!
//! ```
//! use temporal_range_cache::config::RangeCacheConfig;
//! use temporal_range_cache::{RangeCache, RowKey};
//!
//! let config = RangeCacheConfig {
//!     max_size: 10_000,
//!     row_capacity: 1024,
//! };
//! let cache: RangeCache<RowKey, String> = RangeCache::init(config);
//! assert_eq!(cache.max_size(), 10_000);
//! ```

use std::fmt;

/// Configuration for a [`RangeCache`](crate::RangeCache).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RangeCacheConfig {
    /// Maximum number of cached entries across all rows. `<= 0` disables eviction.
    pub max_size: i32,
    /// Number of rows the row map is pre-sized for.
    pub row_capacity: usize,
}

impl RangeCacheConfig {
    /// A bounded configuration holding at most `max_size` entries.
    #[must_use]
    pub fn with_max_size(max_size: i32) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }

    /// A configuration with LRU eviction disabled.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::with_max_size(0)
    }

    /// Whether LRU eviction is active.
    pub fn is_bounded(&self) -> bool {
        self.max_size > 0
    }
}

impl Default for RangeCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 0,
            row_capacity: 64,
        }
    }
}

impl fmt::Debug for RangeCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeCacheConfig")
            .field("max_size", &self.max_size)
            .field("row_capacity", &self.row_capacity)
            .finish()
    }
}
