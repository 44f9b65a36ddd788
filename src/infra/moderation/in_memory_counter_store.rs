// In-memory implementation of CounterStore.
//
// Only good for a single process: counters die with it and are not shared
// between instances. Used for local runs (`store.backend: memory`) and tests.

use crate::core::moderation::{CounterError, CounterStore, RateLimitKey};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// Past this many keys, expired ones are swept before the next insert. After
// a sweep the next one waits until the map has doubled again.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Clone, Debug)]
struct StoredCounter {
    count: i64,
    expires_at: Instant,
}

/// Clones share the same counters.
#[derive(Clone)]
pub struct InMemoryCounterStore {
    counters: Arc<DashMap<String, StoredCounter>>,
    next_sweep: Arc<AtomicUsize>,
    sweep_floor: usize,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::with_sweep_threshold(SWEEP_THRESHOLD)
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_sweep_threshold(sweep_floor: usize) -> Self {
        Self {
            counters: Arc::new(DashMap::new()),
            next_sweep: Arc::new(AtomicUsize::new(sweep_floor)),
            sweep_floor,
        }
    }

    fn sweep_expired(&self, now: Instant) {
        if self.counters.len() <= self.next_sweep.load(Ordering::Relaxed) {
            return;
        }
        self.counters.retain(|_, c| c.expires_at > now);
        let next = (self.counters.len() * 2).max(self.sweep_floor);
        self.next_sweep.store(next, Ordering::Relaxed);
    }

    /// Current count for `key`, `None` if it never existed or already expired.
    #[cfg(test)]
    pub fn current(&self, key: &RateLimitKey) -> Option<i64> {
        let now = Instant::now();
        self.counters
            .get(key.as_str())
            .filter(|c| c.expires_at > now)
            .map(|c| c.count)
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment_with_window(
        &self,
        key: &RateLimitKey,
        window: Duration,
    ) -> Result<i64, CounterError> {
        let now = Instant::now();

        self.sweep_expired(now);

        // The entry guard holds the shard lock, so reset + increment is atomic.
        let mut counter = self
            .counters
            .entry(key.as_str().to_string())
            .or_insert(StoredCounter {
                count: 0,
                expires_at: now,
            });

        if counter.count == 0 || counter.expires_at <= now {
            counter.count = 0;
            counter.expires_at = now + window;
        }
        counter.count += 1;

        Ok(counter.count)
    }
}
