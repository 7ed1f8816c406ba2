//! Wall-clock helpers.
//!
//! Timestamps throughout the crate are microseconds since the Unix epoch,
//! with `0` meaning "never happened".

use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const USEC_PER_SEC: u64 = 1_000_000;

pub fn now_usec() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

pub fn duration_to_usec(duration: Duration) -> u64 {
    duration.as_micros() as u64
}

/// Source of "now" for components that stamp their own events.
pub trait Clock: Send + Sync + Debug {
    fn now_usec(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_usec(&self) -> u64 {
        now_usec()
    }
}

/// A clock that only moves when told to. Used by tests and replay tooling.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_usec: u64) -> Self {
        Self {
            now: AtomicU64::new(start_usec),
        }
    }

    pub fn set(&self, usec: u64) {
        self.now.store(usec, Ordering::SeqCst);
    }

    pub fn advance(&self, duration: Duration) {
        self.now
            .fetch_add(duration_to_usec(duration), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_usec(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Renders a microsecond timestamp for diagnostics. `None` for "never".
pub fn usec_to_datetime(usec: u64) -> Option<DateTime<Utc>> {
    if usec == 0 {
        return None;
    }
    DateTime::from_timestamp_micros(usec as i64)
}

/// Seconds elapsed between `then` and `now`, `None` if `then` is unset.
pub fn seconds_since(then: u64, now: u64) -> Option<f64> {
    if then == 0 {
        return None;
    }
    Some(now.saturating_sub(then) as f64 / USEC_PER_SEC as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(now_usec() > 1_577_836_800 * USEC_PER_SEC);
    }

    #[test]
    fn test_zero_renders_as_never() {
        assert!(usec_to_datetime(0).is_none());
        assert!(seconds_since(0, 10).is_none());
    }

    #[test]
    fn test_seconds_since() {
        assert_eq!(seconds_since(USEC_PER_SEC, 3 * USEC_PER_SEC), Some(2.0));
        // Clock going backwards never yields a negative age
        assert_eq!(seconds_since(5 * USEC_PER_SEC, USEC_PER_SEC), Some(0.0));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(USEC_PER_SEC);
        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now_usec(), 2_500_000);
        clock.set(42);
        assert_eq!(clock.now_usec(), 42);
    }

    #[test]
    fn test_usec_to_datetime() {
        let dt = usec_to_datetime(1_700_000_000 * USEC_PER_SEC).unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
    }
}
