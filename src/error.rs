//! Error type shared by the whole crate.
//!
//! Every variant describes a violated argument contract. None of them is
//! transient: retrying the same call yields the same error.

use thiserror::Error;

/// Errors raised when a caller breaks an argument contract.
///
/// Rejected calls never leave the cache partially updated: arguments are
/// validated before any state is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RangeCacheError {
    /// A timestamp below zero was supplied.
    #[error("timestamp must not be negative, got {0}")]
    NegativeTimestamp(i64),

    /// The upper bound of a period lies below its lower bound.
    #[error("invalid period bounds: upper bound {upper} is below lower bound {lower}")]
    InvalidPeriod {
        /// Requested lower bound.
        lower: i64,
        /// Requested upper bound.
        upper: i64,
    },

    /// A write was stamped with the value reserved for the open end of
    /// periods, [`Period::INFINITY`](crate::Period::INFINITY).
    #[error("timestamp {0} is reserved for open-ended periods")]
    TimestampAtInfinity(i64),

    /// The value or validity start of a cache miss was requested.
    ///
    /// This is a misuse of [`CacheGetResult`](crate::CacheGetResult), not a
    /// "not found" condition.
    #[error("a cache miss carries no value")]
    NotAHit,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RangeCacheError>;

/// Rejects negative timestamps.
pub(crate) fn check_timestamp(timestamp: i64) -> Result<i64> {
    if timestamp < 0 {
        return Err(RangeCacheError::NegativeTimestamp(timestamp));
    }
    Ok(timestamp)
}

/// Rejects timestamps a write-through cannot open a period at.
pub(crate) fn check_write_timestamp(timestamp: i64) -> Result<i64> {
    check_timestamp(timestamp)?;
    if timestamp == i64::MAX {
        return Err(RangeCacheError::TimestampAtInfinity(timestamp));
    }
    Ok(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_timestamp() {
        assert_eq!(check_timestamp(0), Ok(0));
        assert_eq!(check_timestamp(42), Ok(42));
        assert_eq!(
            check_timestamp(-1),
            Err(RangeCacheError::NegativeTimestamp(-1))
        );
    }

    #[test]
    fn test_check_write_timestamp() {
        assert_eq!(check_write_timestamp(i64::MAX - 1), Ok(i64::MAX - 1));
        assert_eq!(
            check_write_timestamp(-3),
            Err(RangeCacheError::NegativeTimestamp(-3))
        );
        assert_eq!(
            check_write_timestamp(i64::MAX),
            Err(RangeCacheError::TimestampAtInfinity(i64::MAX))
        );
    }

    #[test]
    fn test_error_messages() {
        let err = RangeCacheError::InvalidPeriod {
            lower: 200,
            upper: 100,
        };
        assert_eq!(
            err.to_string(),
            "invalid period bounds: upper bound 100 is below lower bound 200"
        );
        assert_eq!(
            RangeCacheError::NotAHit.to_string(),
            "a cache miss carries no value"
        );
    }
}
