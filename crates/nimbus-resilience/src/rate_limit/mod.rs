//! Rate limiting against a shared counter store.
//!
//! ## Algorithms
//!
//! - **Fixed window**: one counter per aligned window, hard reset at the
//!   boundary.
//! - **Sliding window**: the previous window's count is weighted by how much
//!   of it still overlaps the trailing window, which smooths the boundary
//!   burst a fixed window allows.
//! - **Token bucket**: `limit` tokens per window, refilled continuously and
//!   debited with a compare-and-swap.
//!
//! Window counters are incremented before the comparison, so concurrent
//! callers never both take the last slot.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use nimbus_resilience::{Algorithm, InMemoryCounterStore, RateLimitConfig, RateLimiter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let limiter = RateLimiter::new(
//!     RateLimitConfig::new(Algorithm::FixedWindow, 2, Duration::from_secs(60)),
//!     Arc::new(InMemoryCounterStore::new()),
//! );
//! assert!(limiter.check("user:1", 1).await.unwrap().allowed);
//! assert!(limiter.check("user:1", 1).await.unwrap().allowed);
//! assert!(!limiter.check("user:1", 1).await.unwrap().allowed);
//! # }
//! ```

mod key;
mod store;

pub use key::{Dimension, DimensionKey, KeyFunc};
pub use store::{BucketState, CounterStore, InMemoryCounterStore, StoreError, Versioned};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use nimbus_core::NimbusError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};

/// Compare-and-swap attempts before a token bucket update gives up.
const MAX_CAS_ATTEMPTS: usize = 8;

/// Rate limiting algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Aligned windows with a hard reset.
    #[default]
    FixedWindow,
    /// Weighted blend of the current and previous window.
    SlidingWindow,
    /// Continuously refilled bucket.
    TokenBucket,
}

impl Algorithm {
    /// Returns the snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FixedWindow => "fixed_window",
            Self::SlidingWindow => "sliding_window",
            Self::TokenBucket => "token_bucket",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed_window" => Ok(Self::FixedWindow),
            "sliding_window" => Ok(Self::SlidingWindow),
            "token_bucket" => Ok(Self::TokenBucket),
            other => Err(format!("unknown rate limit algorithm: {other}")),
        }
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Algorithm used for every key.
    pub algorithm: Algorithm,
    /// Units allowed per window.
    pub limit: u64,
    /// Window length.
    pub window: Duration,
    /// Admit requests when the counter store fails.
    pub fail_open: bool,
}

impl RateLimitConfig {
    /// Creates a fail-open configuration.
    #[must_use]
    pub const fn new(algorithm: Algorithm, limit: u64, window: Duration) -> Self {
        Self {
            algorithm,
            limit,
            window,
            fail_open: true,
        }
    }

    /// Sets the store failure behaviour.
    #[must_use]
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    fn window_ms(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX).max(1)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(Algorithm::FixedWindow, 100, Duration::from_secs(60))
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// The configured limit.
    pub limit: u64,
    /// Units left in the current window.
    pub remaining: u64,
    /// When the window resets (or the bucket is full again), epoch ms.
    pub reset_at_ms: u64,
    /// Seconds until a denied caller may retry. Zero when allowed.
    pub retry_after_secs: u64,
}

impl RateDecision {
    /// Converts a denial into [`NimbusError::RateLimitExceeded`].
    ///
    /// # Errors
    ///
    /// Returns the rejection if the decision denies the request.
    pub fn into_result(self, key: &str) -> Result<Self, NimbusError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(NimbusError::RateLimitExceeded {
                key: key.to_string(),
                limit: self.limit,
                retry_after_secs: self.retry_after_secs,
            })
        }
    }

    /// Returns the reset time in whole epoch seconds, rounded up.
    #[must_use]
    pub const fn reset_at_secs(&self) -> u64 {
        self.reset_at_ms.div_ceil(1000)
    }
}

fn secs_until(now_ms: u64, at_ms: u64) -> u64 {
    at_ms.saturating_sub(now_ms).div_ceil(1000).max(1)
}

/// Rate limiter over a [`CounterStore`].
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates a limiter on the system clock.
    #[must_use]
    pub fn new(config: RateLimitConfig, store: Arc<dyn CounterStore>) -> Self {
        Self {
            config,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Charges `cost` units to `key` and decides whether to admit.
    ///
    /// Store failures admit or deny according to `fail_open`.
    ///
    /// # Errors
    ///
    /// Returns [`NimbusError::Internal`] when a token bucket update keeps
    /// losing its compare-and-swap.
    pub async fn check(&self, key: &str, cost: u64) -> Result<RateDecision, NimbusError> {
        let namespaced = format!("{}:{key}", self.config.algorithm);
        let now_ms = self.clock.now_ms();
        let outcome = match self.config.algorithm {
            Algorithm::FixedWindow => self.fixed_window(&namespaced, cost, now_ms).await,
            Algorithm::SlidingWindow => self.sliding_window(&namespaced, cost, now_ms).await,
            Algorithm::TokenBucket => self.token_bucket(&namespaced, cost, now_ms).await?,
        };
        let decision = match outcome {
            Ok(decision) => decision,
            Err(error) => self.on_store_error(&namespaced, &error, now_ms),
        };
        if !decision.allowed {
            debug!(key = %namespaced, limit = decision.limit, "rate limit exceeded");
        }
        Ok(decision)
    }

    fn on_store_error(&self, key: &str, error: &StoreError, now_ms: u64) -> RateDecision {
        let limit = self.config.limit;
        let reset_at_ms = now_ms.saturating_add(self.config.window_ms());
        if self.config.fail_open {
            warn!(key, error = %error, "counter store failed, admitting request");
            RateDecision {
                allowed: true,
                limit,
                remaining: limit,
                reset_at_ms,
                retry_after_secs: 0,
            }
        } else {
            warn!(key, error = %error, "counter store failed, denying request");
            RateDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at_ms,
                retry_after_secs: 1,
            }
        }
    }

    async fn fixed_window(
        &self,
        key: &str,
        cost: u64,
        now_ms: u64,
    ) -> Result<RateDecision, StoreError> {
        let window_ms = self.config.window_ms();
        let window_start = now_ms - now_ms % window_ms;
        let (count, reset_at_ms) = self.store.increment(key, window_start, window_ms, cost).await?;
        let limit = self.config.limit;
        let allowed = count <= limit;
        Ok(RateDecision {
            allowed,
            limit,
            remaining: limit.saturating_sub(count),
            reset_at_ms,
            retry_after_secs: if allowed { 0 } else { secs_until(now_ms, reset_at_ms) },
        })
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    async fn sliding_window(
        &self,
        key: &str,
        cost: u64,
        now_ms: u64,
    ) -> Result<RateDecision, StoreError> {
        let window_ms = self.config.window_ms();
        let window_start = now_ms - now_ms % window_ms;
        let previous = match window_start.checked_sub(window_ms) {
            Some(prev_start) => self.store.count(key, prev_start).await?,
            None => 0,
        };
        let (current, reset_at_ms) =
            self.store.increment(key, window_start, window_ms, cost).await?;

        let elapsed = (now_ms - window_start) as f64 / window_ms as f64;
        let weighted = (previous as f64).mul_add(1.0 - elapsed, current as f64);
        let limit = self.config.limit;
        let allowed = weighted <= limit as f64;
        let remaining = (limit as f64 - weighted).max(0.0).floor() as u64;
        Ok(RateDecision {
            allowed,
            limit,
            remaining,
            reset_at_ms,
            retry_after_secs: if allowed { 0 } else { secs_until(now_ms, reset_at_ms) },
        })
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    async fn token_bucket(
        &self,
        key: &str,
        cost: u64,
        now_ms: u64,
    ) -> Result<Result<RateDecision, StoreError>, NimbusError> {
        let limit = self.config.limit;
        let capacity = limit as f64;
        let per_ms = capacity / self.config.window_ms() as f64;
        let cost_tokens = cost as f64;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let loaded = match self.store.load_bucket(key).await {
                Ok(loaded) => loaded,
                Err(error) => return Ok(Err(error)),
            };
            let (version, mut state) = match loaded {
                Some(v) => (Some(v.version), v.value),
                None => (
                    None,
                    BucketState {
                        tokens: capacity,
                        last_refill_ms: now_ms,
                        refill_ms: self.config.window_ms(),
                    },
                ),
            };
            if now_ms > state.last_refill_ms {
                let refill = (now_ms - state.last_refill_ms) as f64 * per_ms;
                state.tokens = (state.tokens + refill).min(capacity);
                state.last_refill_ms = now_ms;
            }
            state.refill_ms = self.config.window_ms();

            let ms_until = |tokens_needed: f64| -> u64 {
                if per_ms > 0.0 {
                    (tokens_needed.max(0.0) / per_ms).ceil() as u64
                } else {
                    u64::MAX
                }
            };

            if state.tokens < cost_tokens {
                let retry_at = now_ms.saturating_add(ms_until(cost_tokens - state.tokens));
                return Ok(Ok(RateDecision {
                    allowed: false,
                    limit,
                    remaining: state.tokens.floor() as u64,
                    reset_at_ms: now_ms.saturating_add(ms_until(capacity - state.tokens)),
                    retry_after_secs: secs_until(now_ms, retry_at),
                }));
            }

            state.tokens -= cost_tokens;
            match self.store.store_bucket(key, version, state).await {
                Ok(true) => {
                    return Ok(Ok(RateDecision {
                        allowed: true,
                        limit,
                        remaining: state.tokens.floor() as u64,
                        reset_at_ms: now_ms.saturating_add(ms_until(capacity - state.tokens)),
                        retry_after_secs: 0,
                    }));
                }
                Ok(false) => debug!(key, "token bucket update lost a race, retrying"),
                Err(error) => return Ok(Err(error)),
            }
        }
        Err(NimbusError::internal(format!(
            "token bucket for {key} is under persistent contention"
        )))
    }
}
