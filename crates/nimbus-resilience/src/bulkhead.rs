//! Bulkhead: bounded concurrency with an optional bounded wait queue.
//!
//! Built on a fair [`Semaphore`], so queued callers are admitted in arrival
//! order. A permit is held for the whole protected call and released on
//! drop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use nimbus_core::NimbusError;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::load_shed::LoadSignal;

/// Bulkhead configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkheadConfig {
    /// Calls allowed to run at once.
    pub max_concurrent: usize,
    /// Callers allowed to wait for a slot. Zero disables queueing.
    pub queue_size: usize,
    /// Longest a queued caller waits, further capped by its deadline.
    pub queue_timeout: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            queue_size: 0,
            queue_timeout: Duration::from_secs(1),
        }
    }
}

/// A concurrency limit for one key.
#[derive(Debug)]
pub struct Bulkhead {
    key: String,
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
}

impl Bulkhead {
    /// Creates a bulkhead.
    pub fn new(key: impl Into<String>, config: BulkheadConfig) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            key: key.into(),
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Returns the bulkhead key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Admits a call, queueing if configured.
    ///
    /// The wait is bounded by `queue_timeout` and by `deadline`, whichever
    /// comes first.
    ///
    /// # Errors
    ///
    /// Returns [`NimbusError::BulkheadFull`] when no slot frees up in time
    /// or the queue is full.
    pub async fn admit(&self, deadline: Option<Instant>) -> Result<BulkheadPermit, NimbusError> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => return Ok(BulkheadPermit::new(permit)),
            Err(TryAcquireError::Closed) => {
                return Err(NimbusError::internal(format!("bulkhead '{}' closed", self.key)))
            }
            Err(TryAcquireError::NoPermits) => {}
        }

        let queue_size = self.config.queue_size;
        let reserved = self
            .waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                (w < queue_size).then_some(w + 1)
            })
            .is_ok();
        if !reserved {
            warn!(bulkhead = %self.key, in_flight = self.in_flight(), "bulkhead full, rejecting");
            return Err(self.full_error());
        }
        let _queued = QueueSlot(&self.waiting);

        let mut wait_until = Instant::now() + self.config.queue_timeout;
        if let Some(deadline) = deadline {
            wait_until = wait_until.min(deadline);
        }
        debug!(bulkhead = %self.key, "queueing for bulkhead slot");

        match tokio::time::timeout_at(wait_until, Arc::clone(&self.semaphore).acquire_owned()).await
        {
            Ok(Ok(permit)) => Ok(BulkheadPermit::new(permit)),
            Ok(Err(_closed)) => Err(NimbusError::internal(format!(
                "bulkhead '{}' closed",
                self.key
            ))),
            Err(_elapsed) => {
                warn!(bulkhead = %self.key, "bulkhead queue wait expired");
                Err(self.full_error())
            }
        }
    }

    fn full_error(&self) -> NimbusError {
        NimbusError::BulkheadFull {
            key: self.key.clone(),
        }
    }

    /// Returns the number of calls currently admitted.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.capacity()
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Returns the number of queued callers.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.max_concurrent.max(1)
    }

    /// Returns `in_flight / max_concurrent`.
    #[must_use]
    pub fn saturation(&self) -> f64 {
        self.in_flight() as f64 / self.capacity() as f64
    }
}

impl LoadSignal for Bulkhead {
    fn load(&self) -> f64 {
        self.saturation()
    }
}

struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// An admitted call. Releases its slot on drop.
#[derive(Debug)]
pub struct BulkheadPermit {
    permit: Option<OwnedSemaphorePermit>,
}

impl BulkheadPermit {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        Self {
            permit: Some(permit),
        }
    }

    /// Releases the slot early. Calling it again does nothing.
    pub fn release(&mut self) {
        self.permit.take();
    }

    /// Returns true until the slot is released.
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.permit.is_some()
    }
}

/// Keyed bulkheads sharing one default configuration.
#[derive(Debug, Default)]
pub struct BulkheadRegistry {
    config: BulkheadConfig,
    bulkheads: DashMap<String, Arc<Bulkhead>>,
}

impl BulkheadRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: BulkheadConfig) -> Self {
        Self {
            config,
            bulkheads: DashMap::new(),
        }
    }

    /// Returns the bulkhead for `key`, creating it if needed.
    pub fn get(&self, key: &str) -> Arc<Bulkhead> {
        if let Some(existing) = self.bulkheads.get(key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.bulkheads
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Bulkhead::new(key, self.config.clone())))
                .value(),
        )
    }

    /// Admits a call through the bulkhead for `key`.
    pub async fn admit(
        &self,
        key: &str,
        deadline: Option<Instant>,
    ) -> Result<BulkheadPermit, NimbusError> {
        self.get(key).admit(deadline).await
    }

    /// Returns the highest saturation across all bulkheads.
    #[must_use]
    pub fn max_saturation(&self) -> f64 {
        self.bulkheads
            .iter()
            .map(|b| b.saturation())
            .fold(0.0, f64::max)
    }
}

impl LoadSignal for BulkheadRegistry {
    fn load(&self) -> f64 {
        self.max_saturation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulkhead(max: usize, queue: usize) -> Arc<Bulkhead> {
        Arc::new(Bulkhead::new(
            "db",
            BulkheadConfig {
                max_concurrent: max,
                queue_size: queue,
                queue_timeout: Duration::from_secs(5),
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_call_rejected_without_queue() {
        let b = bulkhead(2, 0);
        let _first = b.admit(None).await.unwrap();
        let _second = b.admit(None).await.unwrap();
        assert_eq!(b.in_flight(), 2);
        assert!((b.saturation() - 1.0).abs() < f64::EPSILON);

        let err = b.admit(None).await.unwrap_err();
        assert!(matches!(err, NimbusError::BulkheadFull { ref key } if key == "db"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_is_idempotent() {
        let b = bulkhead(1, 0);
        let mut permit = b.admit(None).await.unwrap();
        permit.release();
        permit.release();
        assert!(!permit.is_held());
        assert_eq!(b.in_flight(), 0);
        drop(permit);
        assert_eq!(b.in_flight(), 0);

        let _again = b.admit(None).await.unwrap();
        assert_eq!(b.in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_callers_admitted_in_fifo_order() {
        let b = bulkhead(2, 2);
        let first = b.admit(None).await.unwrap();
        let _second = b.admit(None).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut waiters = Vec::new();
        for name in ["a", "b"] {
            let b = Arc::clone(&b);
            let tx = tx.clone();
            waiters.push(tokio::spawn(async move {
                let permit = b.admit(None).await.unwrap();
                tx.send(name).unwrap();
                permit
            }));
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(b.waiting(), 2);

        // Queue full: a third waiter is turned away immediately.
        assert!(b.admit(None).await.is_err());

        drop(first);
        assert_eq!(rx.recv().await, Some("a"));
        assert_eq!(b.waiting(), 1);
        assert!(rx.try_recv().is_err());

        for waiter in waiters.drain(..1) {
            drop(waiter.await.unwrap());
        }
        assert_eq!(rx.recv().await, Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_wait_bounded_by_deadline() {
        let b = bulkhead(1, 1);
        let _held = b.admit(None).await.unwrap();

        let start = Instant::now();
        let deadline = start + Duration::from_millis(200);
        let err = b.admit(Some(deadline)).await.unwrap_err();
        assert!(matches!(err, NimbusError::BulkheadFull { .. }));
        assert_eq!(start.elapsed(), Duration::from_millis(200));
        assert_eq!(b.waiting(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_and_load_signal() {
        let registry = BulkheadRegistry::new(BulkheadConfig {
            max_concurrent: 4,
            ..Default::default()
        });
        let _a = registry.admit("a", None).await.unwrap();
        let _b1 = registry.admit("b", None).await.unwrap();
        let _b2 = registry.admit("b", None).await.unwrap();
        assert!((registry.load() - 0.5).abs() < f64::EPSILON);
        assert_eq!(registry.get("a").in_flight(), 1);
    }
}
