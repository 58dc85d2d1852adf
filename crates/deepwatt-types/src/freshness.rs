//! Freshness predicate for cached realtime samples.

/// How long a cached sample stays readable, in seconds.
pub const DEFAULT_TTL_SECS: i64 = 10;

/// Returns `true` when a sample stamped `sample_timestamp` is still fresh at `now`.
///
/// Both values are Unix epoch seconds. A sample is fresh while
/// `now - sample_timestamp <= ttl_secs`, so with the default TTL it is still
/// served 10 seconds after its own timestamp and gone at 11.
///
/// The timestamp is the one reported by the device, not the ingestion time.
/// Devices that never set a clock report `0` and are therefore never fresh.
///
/// # Examples
///
/// ```
/// use deepwatt_types::is_fresh;
///
/// assert!(is_fresh(110, 100, 10));
/// assert!(!is_fresh(111, 100, 10));
/// // Samples from the future are fresh.
/// assert!(is_fresh(90, 100, 10));
/// ```
#[must_use]
pub fn is_fresh(now: i64, sample_timestamp: i64, ttl_secs: i64) -> bool {
    now.saturating_sub(sample_timestamp) <= ttl_secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fresh_at_boundary() {
        assert!(is_fresh(1_700_000_010, 1_700_000_000, DEFAULT_TTL_SECS));
    }

    #[test]
    fn test_stale_one_second_past_boundary() {
        assert!(!is_fresh(1_700_000_011, 1_700_000_000, DEFAULT_TTL_SECS));
    }

    #[test]
    fn test_zero_timestamp_is_stale() {
        assert!(!is_fresh(1_700_000_000, 0, DEFAULT_TTL_SECS));
    }

    #[test]
    fn test_extreme_values_do_not_overflow() {
        assert!(is_fresh(i64::MIN, i64::MAX, DEFAULT_TTL_SECS));
        assert!(!is_fresh(i64::MAX, i64::MIN, DEFAULT_TTL_SECS));
    }

    proptest! {
        #[test]
        fn prop_fresh_iff_within_ttl(ts in 0i64..4_000_000_000, age in 0i64..100) {
            prop_assert_eq!(is_fresh(ts + age, ts, DEFAULT_TTL_SECS), age <= 10);
        }
    }
}
