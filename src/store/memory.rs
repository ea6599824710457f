use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{CounterStore, StoreError, WindowOutcome, window_cutoff};

/// One sliding window: event scores in ascending order.
#[derive(Debug)]
struct Bucket {
    window_secs: u64,
    events: VecDeque<f64>,
}

impl Bucket {
    fn new(window_secs: u64) -> Self {
        Self {
            window_secs,
            events: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: f64) {
        let cutoff = window_cutoff(now, self.window_secs);
        while self.events.front().is_some_and(|ts| *ts <= cutoff) {
            self.events.pop_front();
        }
    }

    fn len(&self) -> u64 {
        self.events.len() as u64
    }

    fn insert(&mut self, now: f64) {
        // Keep ascending order even if the wall clock stepped backwards
        let pos = self.events.partition_point(|ts| *ts <= now);
        self.events.insert(pos, now);
    }
}

/// Process-local sliding windows.
///
/// Each key maps to its own bucket; DashMap's entry guard is the per-bucket
/// critical section, so check-and-consume on one key is atomic while other
/// keys proceed in parallel. Nothing here awaits or blocks on I/O.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    buckets: DashMap<String, Bucket>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous check-and-consume.
    pub fn consume(&self, key: &str, limit: u64, window_secs: u64, now: f64) -> WindowOutcome {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(window_secs));

        bucket.window_secs = window_secs;
        bucket.prune(now);

        let count = bucket.len();
        if count >= limit {
            return WindowOutcome::denied(count, bucket.events.front().copied());
        }

        bucket.insert(now);
        WindowOutcome::allowed(count + 1, bucket.events.front().copied())
    }

    /// Synchronous count of entries still inside the window.
    pub fn current(&self, key: &str, window_secs: u64, now: f64) -> u64 {
        match self.buckets.get_mut(key) {
            Some(mut bucket) => {
                bucket.window_secs = window_secs;
                bucket.prune(now);
                bucket.len()
            }
            None => 0,
        }
    }

    /// Drop buckets with no entries left inside their window.
    ///
    /// Returns the number of buckets removed.
    pub fn sweep(&self, now: f64) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            bucket.prune(now);
            !bucket.events.is_empty()
        });
        let removed = before.saturating_sub(self.buckets.len());
        debug!(
            removed,
            remaining = self.buckets.len(),
            "Swept in-memory rate limit buckets"
        );
        removed
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn check_and_consume(
        &self,
        key: &str,
        limit: u64,
        window_secs: u64,
        now: f64,
    ) -> Result<WindowOutcome, StoreError> {
        Ok(self.consume(key, limit, window_secs, now))
    }

    async fn count(&self, key: &str, window_secs: u64, now: f64) -> Result<u64, StoreError> {
        Ok(self.current(key, window_secs, now))
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn close(&self) {
        self.buckets.clear();
    }
}
