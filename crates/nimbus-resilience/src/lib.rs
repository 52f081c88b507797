//! Resilience primitives for Nimbus.
//!
//! Each primitive is usable on its own and is wrapped by a middleware stage
//! in `nimbus-middleware`:
//!
//! - [`CircuitBreaker`] / [`CircuitBreakerRegistry`]: stop calling a failing
//!   dependency, probe it again after a cool-down
//! - [`Bulkhead`] / [`BulkheadRegistry`]: cap concurrency per key with a
//!   bounded FIFO queue
//! - [`RetryPolicy`]: capped exponential backoff with jitter
//! - [`LoadShedder`]: drop traffic by percentage or priority under load
//! - [`run_until`]: bound a future by an absolute deadline
//! - [`RateLimiter`]: fixed window, sliding window and token bucket limits
//!   over a pluggable [`CounterStore`]
//!
//! Rejections (`CircuitOpen`, `BulkheadFull`, `LoadShed`,
//! `RateLimitExceeded`) are immediate and never retried.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use nimbus_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//!
//! let breaker = Arc::new(CircuitBreaker::new("billing", CircuitBreakerConfig {
//!     failure_threshold: 1,
//!     ..CircuitBreakerConfig::default()
//! }));
//!
//! let permit = breaker.acquire().unwrap();
//! permit.record_failure();
//! assert_eq!(breaker.state(), CircuitState::Open);
//! assert!(breaker.acquire().is_err());
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus-resilience/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod breaker;
mod bulkhead;
mod classifier;
mod clock;
mod load_shed;
pub mod rate_limit;
mod retry;
mod timeout;

pub use breaker::{
    BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitSnapshot,
    CircuitState,
};
pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadPermit, BulkheadRegistry};
pub use classifier::{CategoryClassifier, FailureClassifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use load_shed::{
    HeaderPriority, InFlightGauge, InFlightGuard, LoadShedder, LoadSignal, ManualLoad,
    PriorityExtractor, ShedMode, PRIORITY_HEADER,
};
pub use rate_limit::{
    Algorithm, BucketState, CounterStore, Dimension, DimensionKey, InMemoryCounterStore, KeyFunc,
    RateDecision, RateLimitConfig, RateLimiter, StoreError, Versioned,
};
pub use retry::RetryPolicy;
pub use timeout::{run_until, TimeoutConfig};
