//! Circuit breaker middleware.
//!
//! Acquires a permit from the keyed registry before running the downstream
//! chain and reports the outcome. Rejections raised further down (a full
//! bulkhead, say) say nothing about the dependency, so the permit is
//! released without judging.

use std::fmt;
use std::sync::Arc;

use nimbus_core::{BoxFuture, HandlerResult, InvocationContext};
use nimbus_resilience::{
    CategoryClassifier, CircuitBreakerConfig, CircuitBreakerRegistry, FailureClassifier, KeyFunc,
};

use crate::middleware::{Middleware, Next};

/// Circuit breaker middleware.
#[derive(Clone)]
pub struct CircuitBreakerMiddleware {
    registry: Arc<CircuitBreakerRegistry>,
    classifier: Arc<dyn FailureClassifier>,
    key: Arc<dyn KeyFunc>,
}

impl CircuitBreakerMiddleware {
    /// Creates the stage over a shared registry.
    ///
    /// Breakers are keyed by route and count timeouts, internal and
    /// external errors as failures.
    #[must_use]
    pub fn new(registry: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            registry,
            classifier: Arc::new(CategoryClassifier::breaker_default()),
            key: Arc::new(super::route_key()),
        }
    }

    /// Creates the stage with its own registry.
    #[must_use]
    pub fn from_config(config: CircuitBreakerConfig) -> Self {
        Self::new(Arc::new(CircuitBreakerRegistry::new(config)))
    }

    /// Sets which errors count as failures.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Sets how the breaker key is derived. `None` bypasses the breaker.
    #[must_use]
    pub fn with_key(mut self, key: Arc<dyn KeyFunc>) -> Self {
        self.key = key;
        self
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }
}

impl fmt::Debug for CircuitBreakerMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerMiddleware")
            .field("breakers", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Middleware for CircuitBreakerMiddleware {
    fn name(&self) -> &'static str {
        "circuit_breaker"
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
            let permit = self.registry.acquire(&key)?;
            let result = next.run(ctx).await;
            match &result {
                Ok(_) => permit.record_success(),
                Err(error) if error.is_rejection() => drop(permit),
                Err(error) => permit.record(self.classifier.is_failure(error)),
            }
            result
        })
    }
}
