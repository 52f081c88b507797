//! Rate limiting middleware.
//!
//! Charges each invocation against a [`RateLimiter`] under a key derived
//! from the context, and rejects with `RateLimitExceeded` once the key's
//! quota is spent.
//!
//! ## Response Headers
//!
//! Request/response invocations that are admitted carry:
//!
//! - `x-ratelimit-limit`: units allowed per window
//! - `x-ratelimit-remaining`: units left in the window
//! - `x-ratelimit-reset`: Unix timestamp (seconds) when the window resets
//!
//! Rejections are rendered by the dispatcher with a `retry-after` header.
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use nimbus_middleware::stages::RateLimitMiddleware;
//! use nimbus_resilience::{Algorithm, Dimension};
//!
//! let rate_limit = RateLimitMiddleware::builder()
//!     .algorithm(Algorithm::SlidingWindow)
//!     .limit(100)
//!     .window(Duration::from_secs(60))
//!     .dimensions(vec![Dimension::Caller, Dimension::Route])
//!     .build();
//! # let _ = rate_limit;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use nimbus_core::{BoxFuture, HandlerResult, InvocationContext, Response, TriggerKind};
use nimbus_resilience::{
    Algorithm, Clock, CounterStore, Dimension, DimensionKey, InMemoryCounterStore, KeyFunc,
    RateDecision, RateLimitConfig, RateLimiter, SystemClock,
};

use crate::middleware::{Middleware, Next};

/// Rate limit header names.
pub mod headers {
    /// Maximum units allowed in the window.
    pub const LIMIT: &str = "x-ratelimit-limit";
    /// Remaining units in the current window.
    pub const REMAINING: &str = "x-ratelimit-remaining";
    /// Unix timestamp when the window resets.
    pub const RESET: &str = "x-ratelimit-reset";
    /// Seconds to wait before retrying (on 429).
    pub const RETRY_AFTER: &str = "retry-after";
}

/// Rate limiting middleware.
#[derive(Clone)]
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    key: Arc<dyn KeyFunc>,
    cost: u64,
}

impl fmt::Debug for RateLimitMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitMiddleware")
            .field("config", self.limiter.config())
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}

impl RateLimitMiddleware {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> RateLimitBuilder {
        RateLimitBuilder::new()
    }

    /// Creates the stage from a limiter and a key function.
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>, key: Arc<dyn KeyFunc>) -> Self {
        Self {
            limiter,
            key,
            cost: 1,
        }
    }

    /// Returns the limiter.
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn add_headers(response: &mut Response, decision: &RateDecision) {
        let map = response.headers_mut();
        map.insert(headers::LIMIT, decision.limit.to_string());
        map.insert(headers::REMAINING, decision.remaining.to_string());
        map.insert(headers::RESET, decision.reset_at_secs().to_string());
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut InvocationContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let Some(key) = self.key.key(ctx) else {
                return next.run(ctx).await;
            };
            let decision = self.limiter.check(&key, self.cost).await?.into_result(&key)?;

            let mut response = next.run(ctx).await?;
            if ctx.envelope().kind() == TriggerKind::RequestResponse {
                Self::add_headers(&mut response, &decision);
            }
            Ok(response)
        })
    }
}

/// Builder for [`RateLimitMiddleware`].
pub struct RateLimitBuilder {
    config: RateLimitConfig,
    store: Option<Arc<dyn CounterStore>>,
    clock: Arc<dyn Clock>,
    key: Arc<dyn KeyFunc>,
    cost: u64,
}

impl fmt::Debug for RateLimitBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitBuilder")
            .field("config", &self.config)
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}

impl Default for RateLimitBuilder {
    fn default() -> Self {
        Self {
            config: RateLimitConfig::default(),
            store: None,
            clock: Arc::new(SystemClock),
            key: Arc::new(DimensionKey::caller()),
            cost: 1,
        }
    }
}

impl RateLimitBuilder {
    /// Creates a builder: 100 per minute per caller, fixed window, fail-open,
    /// in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole limiter configuration.
    #[must_use]
    pub fn config(mut self, config: RateLimitConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the algorithm.
    #[must_use]
    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.config.algorithm = algorithm;
        self
    }

    /// Sets the units allowed per window.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.config.limit = limit;
        self
    }

    /// Sets the window length.
    #[must_use]
    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = window;
        self
    }

    /// Sets the store failure behaviour.
    #[must_use]
    pub fn fail_open(mut self, fail_open: bool) -> Self {
        self.config.fail_open = fail_open;
        self
    }

    /// Keys the limit by these dimensions.
    #[must_use]
    pub fn dimensions(mut self, dimensions: Vec<Dimension>) -> Self {
        self.key = Arc::new(DimensionKey::new(dimensions));
        self
    }

    /// Keys the limit with a custom function. Returning `None` exempts the
    /// invocation.
    #[must_use]
    pub fn key_func(mut self, key: Arc<dyn KeyFunc>) -> Self {
        self.key = key;
        self
    }

    /// Sets the counter store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the units charged per invocation.
    #[must_use]
    pub fn cost(mut self, cost: u64) -> Self {
        self.cost = cost;
        self
    }

    /// Builds the middleware.
    #[must_use]
    pub fn build(self) -> RateLimitMiddleware {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryCounterStore::new()) as Arc<dyn CounterStore>);
        let limiter = RateLimiter::new(self.config, store).with_clock(self.clock);
        RateLimitMiddleware {
            limiter: Arc::new(limiter),
            key: self.key,
            cost: self.cost,
        }
    }
}
