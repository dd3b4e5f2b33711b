//! Keys and result values exchanged between the cache and the storage engine.
//!
//! - [`QualifiedKey`]: a `(keyspace, key)` pair naming one logical cell.
//! - [`RowKey`]: a qualified key on a given branch, the usual row identity.
//! - [`RangedResult`]: "this value was valid for this key during this period".
//! - [`CacheGetResult`]: the answer of a cache lookup, hit or miss.

use crate::error::{RangeCacheError, Result};
use crate::period::Period;
use std::fmt;

/// Identifies one logical cell of the store.
///
/// Ordered lexicographically by keyspace, then key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct QualifiedKey {
    keyspace: String,
    key: String,
}

impl QualifiedKey {
    /// Creates the key `key` within `keyspace`.
    pub fn new(keyspace: impl Into<String>, key: impl Into<String>) -> Self {
        QualifiedKey {
            keyspace: keyspace.into(),
            key: key.into(),
        }
    }

    /// Namespace the key lives in.
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// Key within its keyspace.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for QualifiedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.keyspace, self.key)
    }
}

/// A qualified key on a specific branch.
///
/// This is the row identity the temporal store uses when talking to the
/// [`RangeCache`](crate::RangeCache); any other `Hash + Eq + Clone` type works
/// as well.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct RowKey {
    branch: String,
    key: QualifiedKey,
}

impl RowKey {
    /// Creates the row identity of `key` on `branch`.
    pub fn new(branch: impl Into<String>, key: QualifiedKey) -> Self {
        RowKey {
            branch: branch.into(),
            key,
        }
    }

    /// Branch the row belongs to.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// The cell this row tracks.
    pub fn qualified_key(&self) -> &QualifiedKey {
        &self.key
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.branch)
    }
}

/// A value together with the period during which it was valid for a key.
///
/// Produced by the storage engine's authoritative lookups. Deleted values are
/// modelled by choosing an `Option<_>` value type.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RangedResult<V> {
    requested_key: QualifiedKey,
    value: V,
    period: Period,
}

impl<V> RangedResult<V> {
    /// Bundles a looked-up `value` with the `period` it was valid for.
    pub fn new(requested_key: QualifiedKey, value: V, period: Period) -> Self {
        RangedResult {
            requested_key,
            value,
            period,
        }
    }

    /// Key the lookup was made for.
    pub fn requested_key(&self) -> &QualifiedKey {
        &self.requested_key
    }

    /// The value found, possibly a cached deletion.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Period during which the value was authoritative.
    pub fn period(&self) -> Period {
        self.period
    }

    /// Splits the result into its key, value and period.
    pub fn into_parts(self) -> (QualifiedKey, V, Period) {
        (self.requested_key, self.value, self.period)
    }
}

/// Outcome of a cache lookup.
///
/// A miss carries no state, so every miss is the same value. Reading the value
/// of a miss through [`value`](Self::value) or [`valid_from`](Self::valid_from)
/// fails with [`RangeCacheError::NotAHit`].
///
/// # Examples
///
/// ```
/// use temporal_range_cache::{CacheGetResult, RangeCacheError};
///
/// let hit = CacheGetResult::hit("World", 100);
/// assert_eq!(hit.value(), Ok(&"World"));
/// assert_eq!(hit.valid_from(), Ok(100));
///
/// let miss: CacheGetResult<&str> = CacheGetResult::miss();
/// assert!(miss.is_miss());
/// assert_eq!(miss.value(), Err(RangeCacheError::NotAHit));
/// ```
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum CacheGetResult<V> {
    /// The value valid at the requested timestamp.
    Hit {
        /// Cached value.
        value: V,
        /// Lower bound of the period the value was cached for.
        valid_from: i64,
    },
    /// Nothing cached covers the requested timestamp.
    Miss,
}

impl<V> CacheGetResult<V> {
    /// A hit on `value`, valid from `valid_from` on.
    pub fn hit(value: V, valid_from: i64) -> Self {
        CacheGetResult::Hit { value, valid_from }
    }

    /// The shared miss.
    pub const fn miss() -> Self {
        CacheGetResult::Miss
    }

    /// Whether a cached entry covered the timestamp.
    #[inline]
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheGetResult::Hit { .. })
    }

    /// Whether nothing cached covered the timestamp.
    #[inline]
    pub fn is_miss(&self) -> bool {
        !self.is_hit()
    }

    /// The cached value; [`RangeCacheError::NotAHit`] on a miss.
    pub fn value(&self) -> Result<&V> {
        match self {
            CacheGetResult::Hit { value, .. } => Ok(value),
            CacheGetResult::Miss => Err(RangeCacheError::NotAHit),
        }
    }

    /// Start of the validity period; [`RangeCacheError::NotAHit`] on a miss.
    pub fn valid_from(&self) -> Result<i64> {
        match self {
            CacheGetResult::Hit { valid_from, .. } => Ok(*valid_from),
            CacheGetResult::Miss => Err(RangeCacheError::NotAHit),
        }
    }

    /// Consumes the result, returning the cached value.
    ///
    /// Fails with [`RangeCacheError::NotAHit`] on a miss.
    pub fn into_value(self) -> Result<V> {
        match self {
            CacheGetResult::Hit { value, .. } => Ok(value),
            CacheGetResult::Miss => Err(RangeCacheError::NotAHit),
        }
    }

    /// Converts to an `Option`, dropping the validity start.
    pub fn into_option(self) -> Option<V> {
        match self {
            CacheGetResult::Hit { value, .. } => Some(value),
            CacheGetResult::Miss => None,
        }
    }
}
