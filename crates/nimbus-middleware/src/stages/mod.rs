//! Built-in middleware stages.
//!
//! Each stage wraps one resilience primitive from `nimbus-resilience`:
//!
//! | Stage | Primitive | Rejects with |
//! |-------|-----------|--------------|
//! | [`TimeoutMiddleware`] | deadline guard | `Timeout` |
//! | [`LoadShedMiddleware`] | [`LoadShedder`](nimbus_resilience::LoadShedder) | `LoadShed` |
//! | [`RateLimitMiddleware`] | [`RateLimiter`](nimbus_resilience::RateLimiter) | `RateLimitExceeded` |
//! | [`RetryMiddleware`] | [`RetryPolicy`](nimbus_resilience::RetryPolicy) | (last error) |
//! | [`CircuitBreakerMiddleware`] | [`CircuitBreakerRegistry`](nimbus_resilience::CircuitBreakerRegistry) | `CircuitOpen` |
//! | [`BulkheadMiddleware`] | [`BulkheadRegistry`](nimbus_resilience::BulkheadRegistry) | `BulkheadFull` |

pub mod bulkhead;
pub mod circuit_breaker;
pub mod load_shed;
pub mod rate_limit;
pub mod retry;
pub mod timeout;

pub use bulkhead::BulkheadMiddleware;
pub use circuit_breaker::CircuitBreakerMiddleware;
pub use load_shed::LoadShedMiddleware;
pub use rate_limit::RateLimitMiddleware;
pub use retry::RetryMiddleware;
pub use timeout::TimeoutMiddleware;

pub use crate::middleware::FnMiddleware;

use nimbus_resilience::{Dimension, DimensionKey};

/// The default key for keyed stages: the route id, else the path.
pub(crate) fn route_key() -> DimensionKey {
    DimensionKey::new(vec![Dimension::Route])
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use nimbus_core::{InvocationContext, NormalizedEnvelope, Params, TriggerKind};

    pub fn ctx(budget: Duration) -> InvocationContext {
        let envelope = NormalizedEnvelope::builder(TriggerKind::RequestResponse)
            .method("GET")
            .path("/users/42")
            .build()
            .unwrap();
        InvocationContext::with_budget(envelope, budget)
            .with_route("getUser", [("id", "42")].into_iter().collect::<Params>())
    }
}
