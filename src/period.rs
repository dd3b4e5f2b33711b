//! Half-open validity periods.

use crate::error::{check_timestamp, RangeCacheError, Result};
use std::fmt;

/// A half-open time interval `[lower, upper)`.
///
/// An upper bound of [`Period::INFINITY`] marks an open-ended period. A period
/// whose upper bound equals its lower bound is empty and contains nothing.
///
/// Periods order by lower bound first and upper bound second.
///
/// # Examples
///
/// ```
/// use temporal_range_cache::Period;
///
/// let period = Period::create_range(100, 200).unwrap();
/// assert!(!period.contains(99));
/// assert!(period.contains(100));
/// assert!(period.contains(199));
/// assert!(!period.contains(200));
///
/// let open = Period::create_open_ended(100).unwrap();
/// assert!(open.contains(i64::MAX - 1));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Period {
    lower: i64,
    upper: i64,
}

impl Period {
    /// Upper bound value standing for +∞.
    ///
    /// No period can start here, so a write-through at this timestamp is
    /// rejected.
    pub const INFINITY: i64 = i64::MAX;

    /// Creates the period `[lower, upper)`.
    pub fn create_range(lower: i64, upper: i64) -> Result<Self> {
        check_timestamp(lower)?;
        if upper < lower {
            return Err(RangeCacheError::InvalidPeriod { lower, upper });
        }
        Ok(Period { lower, upper })
    }

    /// Creates the period `[lower, +∞)`.
    pub fn create_open_ended(lower: i64) -> Result<Self> {
        Self::create_range(lower, Self::INFINITY)
    }

    /// `[lower, +∞)` for a timestamp the caller already validated.
    pub(crate) const fn open_ended_from(lower: i64) -> Self {
        Period {
            lower,
            upper: Self::INFINITY,
        }
    }

    /// The canonical empty period `[0, 0)`.
    pub const fn empty() -> Self {
        Period { lower: 0, upper: 0 }
    }

    /// The period covering all of time, `[0, +∞)`.
    pub const fn eternal() -> Self {
        Period {
            lower: 0,
            upper: Self::INFINITY,
        }
    }

    /// Inclusive lower bound.
    #[inline]
    pub fn lower(&self) -> i64 {
        self.lower
    }

    /// Exclusive upper bound; [`Period::INFINITY`] when open-ended.
    #[inline]
    pub fn upper(&self) -> i64 {
        self.upper
    }

    /// Whether the period contains no timestamp at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.upper <= self.lower
    }

    /// Whether the upper bound is [`Period::INFINITY`].
    #[inline]
    pub fn is_open_ended(&self) -> bool {
        self.upper == Self::INFINITY
    }

    /// `lower <= timestamp < upper`.
    #[inline]
    pub fn contains(&self, timestamp: i64) -> bool {
        self.lower <= timestamp && timestamp < self.upper
    }

    /// Whether the whole period lies strictly after `timestamp`.
    #[inline]
    pub fn is_after(&self, timestamp: i64) -> bool {
        self.lower > timestamp
    }

    /// Returns a copy of this period with its upper bound replaced.
    pub fn with_upper_bound(&self, upper: i64) -> Result<Self> {
        Self::create_range(self.lower, upper)
    }
}

impl fmt::Debug for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_open_ended() {
            write!(f, "[{};∞)", self.lower)
        } else {
            write!(f, "[{};{})", self.lower, self.upper)
        }
    }
}
