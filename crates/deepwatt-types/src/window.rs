//! Inclusive time windows for historical queries.

use serde::Serialize;
use time::OffsetDateTime;

/// Length of the default query window: the trailing 24 hours.
pub const DEFAULT_WINDOW_SECS: i64 = 86_400;

/// An inclusive `[start, end]` range of Unix epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    /// First second included.
    pub start: i64,
    /// Last second included.
    pub end: i64,
}

impl TimeWindow {
    /// Create a window from explicit bounds.
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// The trailing 24 hours ending at `now`.
    pub fn trailing_day(now: i64) -> Self {
        Self {
            start: now - DEFAULT_WINDOW_SECS,
            end: now,
        }
    }

    /// Resolve caller-supplied bounds into a window.
    ///
    /// If either bound is missing or zero, the whole window falls back to
    /// [`TimeWindow::trailing_day`]. A window with `start > end` is kept as is
    /// and simply matches nothing.
    ///
    /// ```
    /// use deepwatt_types::TimeWindow;
    ///
    /// let now = 1_700_000_000;
    /// assert_eq!(TimeWindow::resolve(None, Some(5), now), TimeWindow::trailing_day(now));
    /// assert_eq!(TimeWindow::resolve(Some(1), Some(5), now), TimeWindow::new(1, 5));
    /// ```
    pub fn resolve(start: Option<i64>, end: Option<i64>, now: i64) -> Self {
        match (start, end) {
            (Some(start), Some(end)) if start != 0 && end != 0 => Self::new(start, end),
            _ => Self::trailing_day(now),
        }
    }

    /// Like [`TimeWindow::resolve`], using the current wall clock.
    pub fn resolve_now(start: Option<i64>, end: Option<i64>) -> Self {
        Self::resolve(start, end, OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Whether `timestamp` falls inside the window.
    pub fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_bounds_use_trailing_day() {
        let window = TimeWindow::resolve(Some(0), Some(0), 1_700_000_000);
        assert_eq!(window, TimeWindow::new(1_699_913_600, 1_700_000_000));
    }

    #[test]
    fn test_one_missing_bound_discards_the_other() {
        let now = 1_700_000_000;
        assert_eq!(
            TimeWindow::resolve(Some(1_600_000_000), None, now),
            TimeWindow::trailing_day(now)
        );
        assert_eq!(
            TimeWindow::resolve(Some(0), Some(1_600_000_000), now),
            TimeWindow::trailing_day(now)
        );
    }

    #[test]
    fn test_explicit_bounds_kept() {
        let window = TimeWindow::resolve(Some(100), Some(200), 1_700_000_000);
        assert_eq!(window, TimeWindow::new(100, 200));
    }

    #[test]
    fn test_inverted_bounds_match_nothing() {
        let window = TimeWindow::resolve(Some(200), Some(100), 1_700_000_000);
        assert!(!window.contains(150));
        assert!(!window.contains(100));
        assert!(!window.contains(200));
    }

    #[test]
    fn test_contains_is_inclusive() {
        let window = TimeWindow::new(100, 200);
        assert!(window.contains(100));
        assert!(window.contains(200));
        assert!(!window.contains(99));
        assert!(!window.contains(201));
    }

    proptest! {
        #[test]
        fn prop_default_window_law(now in 86_400i64..4_000_000_000) {
            prop_assert_eq!(
                TimeWindow::resolve(Some(0), Some(0), now),
                TimeWindow::resolve(Some(now - 86_400), Some(now), now)
            );
        }
    }
}
