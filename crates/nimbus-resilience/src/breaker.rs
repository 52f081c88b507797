//! Circuit breaker.
//!
//! ```text
//!            failures >= threshold
//!   Closed ──────────────────────────▶ Open
//!     ▲                                 │
//!     │ trial_count successes           │ half_open_after elapsed
//!     │                                 ▼
//!     └─────────────────────────── HalfOpen
//!                                       │
//!                    any trial failure  │
//!                    Open ◀─────────────┘
//! ```
//!
//! Callers [`acquire`](CircuitBreaker::acquire) a [`BreakerPermit`] before
//! the protected call and report the outcome on it. Every transition happens
//! under the breaker's own lock; breakers for different keys never contend.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use nimbus_core::NimbusError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures that open the breaker.
    pub failure_threshold: u32,
    /// When set, only failures within this rolling window count.
    pub failure_window: Option<Duration>,
    /// Time spent open before trial calls are admitted.
    pub half_open_after: Duration,
    /// Concurrent trials allowed, and successes needed to close.
    pub half_open_trial_count: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: None,
            half_open_after: Duration::from_secs(30),
            half_open_trial_count: 1,
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected without being attempted.
    Open,
    /// A limited number of trial calls probe the dependency.
    HalfOpen,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    /// Breaker key.
    pub key: String,
    /// Current state.
    pub state: CircuitState,
    /// Failures counted while closed.
    pub failure_count: u32,
    /// Successful trials while half-open.
    pub success_count: u32,
    /// Trials currently running.
    pub trials_in_flight: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    trials_in_flight: u32,
    opened_at: Option<Instant>,
    window_started_at: Option<Instant>,
    // Bumped on every transition so stale permits cannot judge a later state.
    generation: u64,
}

impl BreakerInner {
    fn transition(&mut self, key: &str, to: CircuitState, now: Instant) {
        let from = self.state;
        self.state = to;
        self.generation += 1;
        self.success_count = 0;
        self.trials_in_flight = 0;
        match to {
            CircuitState::Open => {
                self.opened_at = Some(now);
                warn!(breaker = key, from = ?from, failures = self.failure_count, "circuit opened");
            }
            CircuitState::HalfOpen => {
                debug!(breaker = key, "circuit half-open, admitting trial calls");
            }
            CircuitState::Closed => {
                self.failure_count = 0;
                self.opened_at = None;
                self.window_started_at = None;
                debug!(breaker = key, "circuit closed");
            }
        }
    }
}

/// A circuit breaker for one key.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use nimbus_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
///
/// let breaker = Arc::new(CircuitBreaker::new("billing", CircuitBreakerConfig {
///     failure_threshold: 1,
///     ..Default::default()
/// }));
///
/// breaker.acquire().unwrap().record_failure();
/// assert_eq!(breaker.state(), CircuitState::Open);
/// assert!(breaker.acquire().is_err());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            key: key.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                trials_in_flight: 0,
                opened_at: None,
                window_started_at: None,
                generation: 0,
            }),
        }
    }

    /// Returns the breaker key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Requests permission to make a call.
    ///
    /// # Errors
    ///
    /// Returns [`NimbusError::CircuitOpen`] while open, or while half-open
    /// with every trial slot taken.
    pub fn acquire(self: &Arc<Self>) -> Result<BreakerPermit, NimbusError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let opened_at = inner.opened_at.unwrap_or(now);
            let reopen_at = opened_at + self.config.half_open_after;
            if now < reopen_at {
                let retry_after_ms = reopen_at.duration_since(now).as_millis() as u64;
                return Err(self.open_error(retry_after_ms));
            }
            inner.transition(&self.key, CircuitState::HalfOpen, now);
        }

        let trial = inner.state == CircuitState::HalfOpen;
        if trial {
            if inner.trials_in_flight >= self.config.half_open_trial_count.max(1) {
                return Err(self.open_error(0));
            }
            inner.trials_in_flight += 1;
        }

        Ok(BreakerPermit {
            breaker: Arc::clone(self),
            generation: inner.generation,
            trial,
            recorded: false,
        })
    }

    fn open_error(&self, retry_after_ms: u64) -> NimbusError {
        NimbusError::CircuitOpen {
            key: self.key.clone(),
            retry_after_ms,
        }
    }

    fn on_success(&self, generation: u64, trial: bool) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.window_started_at = None;
            }
            CircuitState::HalfOpen if trial => {
                inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_trial_count.max(1) {
                    inner.transition(&self.key, CircuitState::Closed, Instant::now());
                }
            }
            _ => {}
        }
    }

    fn on_failure(&self, generation: u64, trial: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        match inner.state {
            CircuitState::Closed => {
                if let Some(window) = self.config.failure_window {
                    let started = *inner.window_started_at.get_or_insert(now);
                    if now.duration_since(started) > window {
                        inner.failure_count = 0;
                        inner.window_started_at = Some(now);
                    }
                }
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold.max(1) {
                    inner.transition(&self.key, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen if trial => {
                inner.transition(&self.key, CircuitState::Open, now);
            }
            _ => {}
        }
    }

    fn on_abandon(&self, generation: u64, trial: bool) {
        let mut inner = self.inner.lock();
        if trial && inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns a snapshot for diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            key: self.key.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            trials_in_flight: inner.trials_in_flight,
        }
    }

    /// Forces the breaker closed.
    pub fn reset(&self) {
        self.inner
            .lock()
            .transition(&self.key, CircuitState::Closed, Instant::now());
    }
}

/// Permission to make one call through a breaker.
///
/// Report the outcome with [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). Dropping the permit without an
/// outcome frees its trial slot without judging the dependency.
#[derive(Debug)]
#[must_use = "report the call outcome on the permit"]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    trial: bool,
    recorded: bool,
}

impl BreakerPermit {
    /// Returns true if this call is a half-open trial.
    #[must_use]
    pub const fn is_trial(&self) -> bool {
        self.trial
    }

    /// Records a successful call.
    pub fn record_success(mut self) {
        self.recorded = true;
        self.breaker.on_success(self.generation, self.trial);
    }

    /// Records a failed call.
    pub fn record_failure(mut self) {
        self.recorded = true;
        self.breaker.on_failure(self.generation, self.trial);
    }

    /// Records a success or failure.
    pub fn record(self, failed: bool) {
        if failed {
            self.record_failure();
        } else {
            self.record_success();
        }
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker.on_abandon(self.generation, self.trial);
        }
    }
}

/// Keyed circuit breakers sharing one default configuration.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    overrides: DashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            overrides: DashMap::new(),
            breakers: DashMap::new(),
        }
    }

    /// Uses `config` for `key` instead of the default. Applies to breakers
    /// created after the call.
    pub fn configure(&self, key: impl Into<String>, config: CircuitBreakerConfig) {
        self.overrides.insert(key.into(), config);
    }

    /// Returns the breaker for `key`, creating it closed if needed.
    pub fn get(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(key) {
            return Arc::clone(existing.value());
        }
        let config = self
            .overrides
            .get(key)
            .map_or_else(|| self.config.clone(), |c| c.value().clone());
        Arc::clone(
            self.breakers
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(key, config)))
                .value(),
        )
    }

    /// Acquires a permit from the breaker for `key`.
    pub fn acquire(&self, key: &str) -> Result<BreakerPermit, NimbusError> {
        self.get(key).acquire()
    }

    /// Returns snapshots of every breaker, sorted by key.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    /// Returns the number of breakers created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Returns true if no breaker exists yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, trials: u32) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "svc",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                failure_window: None,
                half_open_after: Duration::from_secs(10),
                half_open_trial_count: trials,
            },
        ))
    }

    fn fail(b: &Arc<CircuitBreaker>) {
        b.acquire().unwrap().record_failure();
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold() {
        let b = breaker(3, 1);
        fail(&b);
        fail(&b);
        assert_eq!(b.state(), CircuitState::Closed);
        fail(&b);
        assert_eq!(b.state(), CircuitState::Open);

        match b.acquire() {
            Err(NimbusError::CircuitOpen { key, retry_after_ms }) => {
                assert_eq!(key, "svc");
                assert_eq!(retry_after_ms, 10_000);
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let b = breaker(3, 1);
        fail(&b);
        fail(&b);
        b.acquire().unwrap().record_success();
        fail(&b);
        fail(&b);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().failure_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_failure_reopens() {
        let b = breaker(3, 1);
        for _ in 0..3 {
            fail(&b);
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        let trial = b.acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        // Only one trial at a time.
        assert!(matches!(b.acquire(), Err(NimbusError::CircuitOpen { .. })));

        trial.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_trial_successes() {
        let b = breaker(1, 2);
        fail(&b);
        tokio::time::advance(Duration::from_secs(11)).await;

        let first = b.acquire().unwrap();
        let second = b.acquire().unwrap();
        assert!(b.acquire().is_err());

        first.record_success();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        second.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_frees_slot_without_judging() {
        let b = breaker(1, 1);
        fail(&b);
        tokio::time::advance(Duration::from_secs(10)).await;

        drop(b.acquire().unwrap());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert_eq!(b.snapshot().trials_in_flight, 0);
        b.acquire().unwrap().record_success();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_permit_is_ignored() {
        let b = breaker(1, 1);
        let stale = b.acquire().unwrap();
        fail(&b);
        assert_eq!(b.state(), CircuitState::Open);
        stale.record_success();
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_window_expires_old_failures() {
        let b = Arc::new(CircuitBreaker::new(
            "svc",
            CircuitBreakerConfig {
                failure_threshold: 2,
                failure_window: Some(Duration::from_secs(5)),
                ..Default::default()
            },
        ));
        fail(&b);
        tokio::time::advance(Duration::from_secs(6)).await;
        fail(&b);
        assert_eq!(b.state(), CircuitState::Closed);
        fail(&b);
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_keys_are_independent() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        registry.acquire("a").unwrap().record_failure();
        assert!(registry.acquire("a").is_err());
        assert!(registry.acquire("b").is_ok());

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].key, "a");
        assert_eq!(snapshot[0].state, CircuitState::Open);
        assert_eq!(snapshot[1].state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_per_key_override() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        registry.configure(
            "fragile",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );
        registry.acquire("fragile").unwrap().record_failure();
        assert_eq!(registry.get("fragile").state(), CircuitState::Open);
        registry.acquire("sturdy").unwrap().record_failure();
        assert_eq!(registry.get("sturdy").state(), CircuitState::Closed);
    }
}
