//! Storage for fixed-window rate limit counters.
//!
//! The limiter talks to a [`RateLimitStore`] rather than a map so that a
//! single process can keep counters in memory while a multi-process
//! deployment swaps in a shared store without touching call sites.
//!
//! # Atomicity
//!
//! [`RateLimitStore::hit`] is a single read-modify-write: fetch or create the
//! entry, reset it if its window has ended, increment it. Implementations
//! must make that step atomic per key, otherwise concurrent requests can
//! both observe `count < max` and exceed the limit together.

use dashmap::DashMap;
use thiserror::Error;

/// Counter state for one rate limit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Requests observed in the current window, including the current one.
    pub count: u32,
    /// Epoch milliseconds at which the current window ends.
    pub reset_time_ms: i64,
}

impl RateLimitEntry {
    /// The window `[reset_time - window, reset_time)` is over at `now_ms`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.reset_time_ms
    }

    fn fresh(now_ms: i64, window_ms: i64) -> Self {
        Self {
            count: 0,
            reset_time_ms: now_ms.saturating_add(window_ms),
        }
    }
}

/// Failure inside a rate limit store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value storage for rate limit counters.
pub trait RateLimitStore: Send + Sync {
    /// Record one request for `key` and return the updated entry.
    ///
    /// Creates the entry on first use. An entry whose window has ended is
    /// reset to `count = 0, reset_time = now + window` before incrementing.
    fn hit(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<RateLimitEntry, StoreError>;

    fn get(&self, key: &str) -> Result<Option<RateLimitEntry>, StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Delete every entry whose window has ended. Returns how many were removed.
    fn sweep_expired(&self, now_ms: i64) -> Result<usize, StoreError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local store backed by a sharded concurrent map.
///
/// `hit` holds the shard write lock for its key while it resets and
/// increments, which makes it atomic per key. Counters are not shared
/// between processes; deployments running more than one instance need a
/// shared store to keep the per-window guarantee.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for MemoryStore {
    fn hit(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<RateLimitEntry, StoreError> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry::fresh(now_ms, window_ms));

        if entry.is_expired(now_ms) {
            *entry = RateLimitEntry::fresh(now_ms, window_ms);
        }

        entry.count = entry.count.saturating_add(1);
        Ok(*entry)
    }

    fn get(&self, key: &str) -> Result<Option<RateLimitEntry>, StoreError> {
        Ok(self.entries.get(key).map(|entry| *entry))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn sweep_expired(&self, now_ms: i64) -> Result<usize, StoreError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now_ms));
        Ok(before.saturating_sub(self.entries.len()))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_hit_creates_entry() {
        let store = MemoryStore::new();

        let entry = store.hit("rate_limit:10.0.0.1", 1_000, 60_000).unwrap();

        assert_eq!(entry.count, 1);
        assert_eq!(entry.reset_time_ms, 61_000);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_hits_within_window_accumulate() {
        let store = MemoryStore::new();

        store.hit("k", 0, 1_000).unwrap();
        store.hit("k", 500, 1_000).unwrap();
        let entry = store.hit("k", 999, 1_000).unwrap();

        assert_eq!(entry.count, 3);
        assert_eq!(entry.reset_time_ms, 1_000);
    }

    #[test]
    fn test_hit_after_window_resets() {
        let store = MemoryStore::new();

        store.hit("k", 0, 1_000).unwrap();
        store.hit("k", 10, 1_000).unwrap();
        let entry = store.hit("k", 1_000, 1_000).unwrap();

        assert_eq!(entry.count, 1);
        assert_eq!(entry.reset_time_ms, 2_000);
    }

    #[test]
    fn test_keys_are_independent() {
        let store = MemoryStore::new();

        store.hit("a", 0, 1_000).unwrap();
        store.hit("a", 0, 1_000).unwrap();
        let b = store.hit("b", 0, 1_000).unwrap();

        assert_eq!(b.count, 1);
        assert_eq!(store.get("a").unwrap().unwrap().count, 2);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let store = MemoryStore::new();
        store.hit("old", 0, 1_000).unwrap();
        store.hit("fresh", 5_000, 1_000).unwrap();

        let removed = store.sweep_expired(2_000).unwrap();

        assert_eq!(removed, 1);
        assert!(store.get("old").unwrap().is_none());
        assert!(store.get("fresh").unwrap().is_some());
    }

    #[test]
    fn test_remove() {
        let store = MemoryStore::new();
        store.hit("k", 0, 1_000).unwrap();

        store.remove("k").unwrap();

        assert!(store.is_empty());
    }

    #[test]
    fn test_huge_window_does_not_overflow() {
        let store = MemoryStore::new();

        let first = store.hit("k", 1_700_000_000_000, i64::MAX).unwrap();
        let second = store.hit("k", 1_700_000_000_001, i64::MAX).unwrap();

        assert_eq!(first.reset_time_ms, i64::MAX);
        assert_eq!(second.count, 2);
        assert!(!second.is_expired(1_700_000_000_001));
    }

    #[test]
    fn test_sweep_during_hits_keeps_live_counts() {
        let store = Arc::new(MemoryStore::new());
        store.hit("expired", 0, 10).unwrap();

        let hitter = {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    store.hit("live", 1_000, 60_000).unwrap();
                }
            })
        };
        for _ in 0..50 {
            store.sweep_expired(1_000).unwrap();
        }
        hitter.join().unwrap();

        assert!(store.get("expired").unwrap().is_none());
        assert_eq!(store.get("live").unwrap().unwrap().count, 500);
    }

    #[test]
    fn test_concurrent_hits_are_counted_exactly() {
        let store = Arc::new(MemoryStore::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.hit("shared", 0, 60_000).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get("shared").unwrap().unwrap().count, 800);
    }
}
