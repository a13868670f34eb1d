//! Cancellable keyed deadlines.
//!
//! `schedule(key, delay, now)` is cancel-and-restart: calling it again with the
//! same key pushes the deadline out. The owner polls with `take_due(now)` and
//! runs whatever each due key stands for, so a key fires at most once per
//! quiet period. No threads or runtime are involved; the host decides when to
//! poll (usually by sleeping until `next_deadline()`).

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use web_time::Instant;

/// Set of pending deadlines indexed by key.
#[derive(Debug, Clone)]
pub struct Debouncer<K> {
    deadlines: HashMap<K, Instant>,
}

impl<K> Default for Debouncer<K> {
    fn default() -> Self {
        Self {
            deadlines: HashMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash> Debouncer<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) `key` to fire `delay` after `now`.
    pub fn schedule(&mut self, key: K, delay: Duration, now: Instant) {
        self.deadlines.insert(key, now + delay);
    }

    /// Arm `key` only if it is not already pending.
    pub fn schedule_if_idle(&mut self, key: K, delay: Duration, now: Instant) {
        self.deadlines.entry(key).or_insert(now + delay);
    }

    /// Disarm `key`. Returns whether it was pending.
    pub fn cancel(&mut self, key: K) -> bool {
        self.deadlines.remove(&key).is_some()
    }

    /// Disarm everything.
    pub fn cancel_all(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_pending(&self, key: K) -> bool {
        self.deadlines.contains_key(&key)
    }

    /// Deadline for `key`, if armed.
    pub fn deadline(&self, key: K) -> Option<Instant> {
        self.deadlines.get(&key).copied()
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every key whose deadline is at or before `now`,
    /// earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<(Instant, K)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, at)| (*at, *key))
            .collect();
        due.sort_by_key(|(at, _)| *at);

        for (_, key) in &due {
            self.deadlines.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Key {
        A,
        B,
    }

    #[test]
    fn test_fires_once_after_quiet_period() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();
        debouncer.schedule(Key::A, Duration::from_millis(100), start);

        assert!(debouncer.take_due(start + Duration::from_millis(50)).is_empty());
        assert_eq!(debouncer.take_due(start + Duration::from_millis(100)), vec![Key::A]);
        assert!(debouncer.take_due(start + Duration::from_millis(500)).is_empty());
    }

    #[test]
    fn test_reschedule_restarts_delay() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();
        debouncer.schedule(Key::A, Duration::from_millis(100), start);
        debouncer.schedule(Key::A, Duration::from_millis(100), start + Duration::from_millis(80));

        assert!(debouncer.take_due(start + Duration::from_millis(120)).is_empty());
        assert_eq!(debouncer.take_due(start + Duration::from_millis(180)), vec![Key::A]);
    }

    #[test]
    fn test_schedule_if_idle_keeps_existing_deadline() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();
        debouncer.schedule(Key::A, Duration::from_millis(100), start);
        debouncer.schedule_if_idle(Key::A, Duration::from_millis(100), start + Duration::from_millis(90));

        assert_eq!(debouncer.deadline(Key::A), Some(start + Duration::from_millis(100)));
    }

    #[test]
    fn test_cancel_and_ordering() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();
        debouncer.schedule(Key::B, Duration::from_millis(20), start);
        debouncer.schedule(Key::A, Duration::from_millis(10), start);

        assert_eq!(debouncer.next_deadline(), Some(start + Duration::from_millis(10)));
        assert_eq!(
            debouncer.take_due(start + Duration::from_millis(30)),
            vec![Key::A, Key::B]
        );

        debouncer.schedule(Key::A, Duration::from_millis(10), start);
        assert!(debouncer.cancel(Key::A));
        assert!(!debouncer.is_pending(Key::A));
        assert!(debouncer.next_deadline().is_none());
    }
}
