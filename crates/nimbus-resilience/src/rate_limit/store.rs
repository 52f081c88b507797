//! Counter stores for rate limiting.
//!
//! Rate limit state must outlive a single invocation, so it sits behind the
//! narrow [`CounterStore`] interface. Window counters need an atomic
//! increment; token buckets need a versioned compare-and-swap.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    /// The backend returned an error.
    #[error("counter store error: {0}")]
    Backend(String),
}

/// Token bucket state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// Tokens currently available.
    pub tokens: f64,
    /// When tokens were last refilled, in epoch milliseconds.
    pub last_refill_ms: u64,
    /// How long an empty bucket takes to fill, in milliseconds.
    #[serde(default)]
    pub refill_ms: u64,
}

impl BucketState {
    /// Returns true once the bucket has been idle long enough to be full
    /// again at `now_ms`.
    #[must_use]
    pub const fn is_refilled_at(&self, now_ms: u64) -> bool {
        self.last_refill_ms.saturating_add(self.refill_ms) <= now_ms
    }
}

/// A value with a version for conditional updates.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    /// Incremented on every successful store.
    pub version: u64,
    /// The stored value.
    pub value: T,
}

/// Storage for rate limit counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically adds `cost` to the counter for `(key, window_start_ms)`.
    ///
    /// Returns the new count and when the window resets, in epoch
    /// milliseconds.
    async fn increment(
        &self,
        key: &str,
        window_start_ms: u64,
        window_ms: u64,
        cost: u64,
    ) -> Result<(u64, u64), StoreError>;

    /// Returns the counter for `(key, window_start_ms)`, zero if absent.
    async fn count(&self, key: &str, window_start_ms: u64) -> Result<u64, StoreError>;

    /// Loads a token bucket.
    async fn load_bucket(&self, key: &str) -> Result<Option<Versioned<BucketState>>, StoreError>;

    /// Stores a token bucket if its version still equals `expected_version`
    /// (`None` meaning "absent"). Returns false on a version mismatch.
    async fn store_bucket(
        &self,
        key: &str,
        expected_version: Option<u64>,
        state: BucketState,
    ) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u64,
    window_ms: u64,
}

/// How many writes pass between sweeps of expired state.
const PRUNE_EVERY: u64 = 1024;

/// In-process counter store backed by sharded concurrent maps.
///
/// Suitable for a single warm process and for tests. Windows older than the
/// previous one and buckets idle for a full refill are pruned every so often.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    windows: DashMap<(String, u64), WindowCounter>,
    buckets: DashMap<String, Versioned<BucketState>>,
    writes: AtomicU64,
}

impl InMemoryCounterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live window counters.
    #[must_use]
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Returns the number of live token buckets.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drops state that no longer affects a decision at `now_ms`.
    ///
    /// Sliding windows read the previous window, so a counter lives for two
    /// window lengths. A bucket idle for a full refill would load as full,
    /// which is what an absent bucket loads as.
    pub fn prune(&self, now_ms: u64) {
        self.windows.retain(|(_, start), counter| {
            start.saturating_add(counter.window_ms.saturating_mul(2)) > now_ms
        });
        self.buckets
            .retain(|_, bucket| !bucket.value.is_refilled_at(now_ms));
    }

    fn maybe_prune(&self, now_ms: u64) {
        if self.writes.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune(now_ms);
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(
        &self,
        key: &str,
        window_start_ms: u64,
        window_ms: u64,
        cost: u64,
    ) -> Result<(u64, u64), StoreError> {
        self.maybe_prune(window_start_ms);
        let count = {
            let mut counter = self
                .windows
                .entry((key.to_string(), window_start_ms))
                .or_insert(WindowCounter {
                    count: 0,
                    window_ms,
                });
            counter.count = counter.count.saturating_add(cost);
            counter.count
        };
        Ok((count, window_start_ms.saturating_add(window_ms)))
    }

    async fn count(&self, key: &str, window_start_ms: u64) -> Result<u64, StoreError> {
        Ok(self
            .windows
            .get(&(key.to_string(), window_start_ms))
            .map_or(0, |c| c.count))
    }

    async fn load_bucket(&self, key: &str) -> Result<Option<Versioned<BucketState>>, StoreError> {
        Ok(self.buckets.get(key).map(|b| b.value().clone()))
    }

    async fn store_bucket(
        &self,
        key: &str,
        expected_version: Option<u64>,
        state: BucketState,
    ) -> Result<bool, StoreError> {
        self.maybe_prune(state.last_refill_ms);
        let stored = match self.buckets.entry(key.to_string()) {
            Entry::Occupied(mut existing) => {
                if Some(existing.get().version) == expected_version {
                    let version = existing.get().version + 1;
                    existing.insert(Versioned {
                        version,
                        value: state,
                    });
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                if expected_version.is_none() {
                    slot.insert(Versioned {
                        version: 1,
                        value: state,
                    });
                    true
                } else {
                    false
                }
            }
        };
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_accumulates_per_window() {
        let store = InMemoryCounterStore::new();
        assert_eq!(store.increment("k", 0, 1000, 1).await.unwrap(), (1, 1000));
        assert_eq!(store.increment("k", 0, 1000, 2).await.unwrap(), (3, 1000));
        assert_eq!(store.increment("k", 1000, 1000, 1).await.unwrap(), (1, 2000));
        assert_eq!(store.count("k", 0).await.unwrap(), 3);
        assert_eq!(store.count("other", 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bucket_compare_and_swap() {
        let store = InMemoryCounterStore::new();
        let state = BucketState {
            tokens: 5.0,
            last_refill_ms: 0,
            refill_ms: 1000,
        };
        assert!(store.store_bucket("b", None, state).await.unwrap());
        // A second create loses.
        assert!(!store.store_bucket("b", None, state).await.unwrap());

        let loaded = store.load_bucket("b").await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);

        let next = BucketState {
            tokens: 4.0,
            ..state
        };
        assert!(store.store_bucket("b", Some(1), next).await.unwrap());
        assert!(!store.store_bucket("b", Some(1), next).await.unwrap());
        assert_eq!(store.load_bucket("b").await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_prune_keeps_previous_window() {
        let store = InMemoryCounterStore::new();
        store.increment("k", 0, 1000, 1).await.unwrap();
        store.increment("k", 1000, 1000, 1).await.unwrap();
        store.increment("k", 2000, 1000, 1).await.unwrap();

        store.prune(2500);
        assert_eq!(store.window_count(), 2);
        assert_eq!(store.count("k", 0).await.unwrap(), 0);
        assert_eq!(store.count("k", 1000).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prune_drops_refilled_buckets() {
        let store = InMemoryCounterStore::new();
        for i in 0..100_u64 {
            let state = BucketState {
                tokens: 0.0,
                last_refill_ms: i * 10,
                refill_ms: 1000,
            };
            assert!(store.store_bucket(&format!("caller-{i}"), None, state).await.unwrap());
        }

        store.prune(1500);
        // Buckets last touched at or before 500ms are full again.
        assert_eq!(store.bucket_count(), 49);
        assert!(store.load_bucket("caller-50").await.unwrap().is_none());
        assert!(store.load_bucket("caller-51").await.unwrap().is_some());

        store.prune(u64::MAX / 2);
        assert_eq!(store.bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_buckets_pruned_during_writes() {
        let store = InMemoryCounterStore::new();
        let stale = BucketState {
            tokens: 1.0,
            last_refill_ms: 0,
            refill_ms: 1000,
        };
        for i in 0..10_u64 {
            store.store_bucket(&format!("old-{i}"), None, stale).await.unwrap();
        }
        let fresh = BucketState {
            last_refill_ms: 60_000,
            ..stale
        };
        for i in 0..PRUNE_EVERY {
            store.store_bucket(&format!("new-{i}"), None, fresh).await.unwrap();
        }
        assert!(store.load_bucket("old-0").await.unwrap().is_none());
        assert!(store.bucket_count() >= 1);
    }
}
