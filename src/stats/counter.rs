//! Activity counters for diagnostics.
//!
//! A counter carries an integer plus the time of its last change; [`Counter`]
//! also remembers who made that change. Neither is used for correctness
//! decisions, only for health signals and introspection.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::{now_usec, seconds_since, usec_to_datetime};

/// Longest actor name kept by [`Counter`]; longer names are clipped.
pub const MAX_ACTOR_NAME_LEN: usize = 35;

#[derive(Debug, Clone, Default)]
pub struct BasicCounter {
    last_activity: u64,
    count: u32,
}

impl BasicCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, now: Option<u64>) {
        self.update(self.count.saturating_add(1), now);
    }

    /// Decrementing below zero is a caller bug.
    pub fn decrement(&mut self, now: Option<u64>) {
        assert!(self.count > 0, "decrementing a counter that is already zero");
        self.update(self.count - 1, now);
    }

    /// Sets the count and stamps the activity time, falling back to the
    /// current time when `now` is not supplied.
    pub fn update(&mut self, value: u32, now: Option<u64>) {
        self.last_activity = now.unwrap_or_else(now_usec);
        self.count = value;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity
    }

    pub fn snapshot(&self, now: u64) -> CounterSnapshot {
        CounterSnapshot {
            count: self.count,
            last_activity: usec_to_datetime(self.last_activity),
            seconds_since_last_activity: seconds_since(self.last_activity, now),
            last_actor: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Counter {
    inner: BasicCounter,
    last_actor_name: String,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, actor_name: &str, now: Option<u64>) {
        self.update(self.inner.count.saturating_add(1), actor_name, now);
    }

    pub fn decrement(&mut self, actor_name: &str, now: Option<u64>) {
        assert!(
            self.inner.count > 0,
            "decrementing a counter that is already zero"
        );
        self.update(self.inner.count - 1, actor_name, now);
    }

    pub fn update(&mut self, value: u32, actor_name: &str, now: Option<u64>) {
        self.inner.update(value, now);
        self.last_actor_name.clear();
        self.last_actor_name
            .push_str(clip_to_char_boundary(actor_name, MAX_ACTOR_NAME_LEN));
    }

    pub fn count(&self) -> u32 {
        self.inner.count()
    }

    pub fn last_activity(&self) -> u64 {
        self.inner.last_activity()
    }

    pub fn last_actor(&self) -> &str {
        &self.last_actor_name
    }

    pub fn snapshot(&self, now: u64) -> CounterSnapshot {
        CounterSnapshot {
            last_actor: Some(self.last_actor_name.clone()),
            ..self.inner.snapshot(now)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterSnapshot {
    pub count: u32,
    pub last_activity: Option<DateTime<Utc>>,
    pub seconds_since_last_activity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_actor: Option<String>,
}

/// Longest prefix of `s` no longer than `max_len` bytes that ends on a
/// character boundary.
pub(crate) fn clip_to_char_boundary(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_counter_tracks_activity() {
        let mut counter = BasicCounter::new();
        counter.increment(Some(100));
        counter.increment(Some(200));
        assert_eq!(counter.count(), 2);
        assert_eq!(counter.last_activity(), 200);

        counter.decrement(Some(300));
        assert_eq!(counter.count(), 1);
        assert_eq!(counter.last_activity(), 300);
    }

    #[test]
    fn test_missing_timestamp_uses_current_time() {
        let mut counter = BasicCounter::new();
        let before = now_usec();
        counter.update(7, None);
        assert_eq!(counter.count(), 7);
        assert!(counter.last_activity() >= before);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "already zero")]
    fn test_decrementing_zero_is_fatal() {
        let mut counter = BasicCounter::new();
        counter.decrement(Some(1));
    }

    #[test]
    fn test_counter_records_actor() {
        let mut counter = Counter::new();
        counter.increment("batcher", Some(1_000_000));
        assert_eq!(counter.last_actor(), "batcher");

        counter.increment("resolver", Some(2_000_000));
        assert_eq!(counter.count(), 2);
        assert_eq!(counter.last_actor(), "resolver");

        let snapshot = counter.snapshot(5_000_000);
        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.seconds_since_last_activity, Some(3.0));
        assert_eq!(snapshot.last_actor.as_deref(), Some("resolver"));
    }

    #[test]
    fn test_clip_respects_char_boundaries() {
        assert_eq!(clip_to_char_boundary("short", 10), "short");
        assert_eq!(clip_to_char_boundary("abcdef", 3), "abc");
        // "é" is two bytes; clipping inside it backs off to the previous char
        assert_eq!(clip_to_char_boundary("aé", 2), "a");
    }

    #[test]
    fn test_long_actor_name_is_clipped() {
        let mut counter = Counter::new();
        let long_name = "x".repeat(100);
        counter.update(1, &long_name, Some(1));
        assert_eq!(counter.last_actor().len(), MAX_ACTOR_NAME_LEN);

        // Multi-byte characters are never split
        let wide = "é".repeat(30);
        counter.update(2, &wide, Some(2));
        assert!(counter.last_actor().len() <= MAX_ACTOR_NAME_LEN);
        assert!(counter.last_actor().chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_basic_snapshot_has_no_actor() {
        let counter = BasicCounter::new();
        let snapshot = counter.snapshot(10);
        assert_eq!(snapshot.count, 0);
        assert!(snapshot.last_activity.is_none());
        assert!(snapshot.last_actor.is_none());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("last_actor").is_none());
    }
}
