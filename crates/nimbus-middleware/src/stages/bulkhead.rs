//! Bulkhead middleware.
//!
//! Holds a slot for the whole downstream run. The permit is released when
//! the stage's future completes or is dropped, so a handler can never leak
//! a slot.

use std::fmt;
use std::sync::Arc;

use nimbus_core::{BoxFuture, HandlerResult, InvocationContext};
use nimbus_resilience::{BulkheadConfig, BulkheadRegistry, KeyFunc};

use crate::middleware::{Middleware, Next};

/// Bulkhead middleware.
#[derive(Clone)]
pub struct BulkheadMiddleware {
    registry: Arc<BulkheadRegistry>,
    key: Arc<dyn KeyFunc>,
}

impl BulkheadMiddleware {
    /// Creates the stage over a shared registry, keyed by route.
    #[must_use]
    pub fn new(registry: Arc<BulkheadRegistry>) -> Self {
        Self {
            registry,
            key: Arc::new(super::route_key()),
        }
    }

    /// Creates the stage with its own registry.
    #[must_use]
    pub fn from_config(config: BulkheadConfig) -> Self {
        Self::new(Arc::new(BulkheadRegistry::new(config)))
    }

    /// Sets how the bulkhead key is derived. `None` bypasses the bulkhead.
    #[must_use]
    pub fn with_key(mut self, key: Arc<dyn KeyFunc>) -> Self {
        self.key = key;
        self
    }

    /// Returns the registry, which doubles as a load signal.
    #[must_use]
    pub fn registry(&self) -> &Arc<BulkheadRegistry> {
        &self.registry
    }
}

impl fmt::Debug for BulkheadMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkheadMiddleware")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Middleware for BulkheadMiddleware {
    fn name(&self) -> &'static str {
        "bulkhead"
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
            let _permit = self.registry.admit(&key, Some(ctx.deadline())).await?;
            next.run(ctx).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::stages::test_support::ctx;
    use nimbus_core::{handler_fn, NimbusError, Response};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test(start_paused = true)]
    async fn test_third_concurrent_call_rejected() {
        let stage = BulkheadMiddleware::from_config(BulkheadConfig {
            max_concurrent: 2,
            queue_size: 0,
            queue_timeout: Duration::from_secs(1),
        });
        let registry = Arc::clone(stage.registry());
        let pipeline = Arc::new(Pipeline::builder().use_middleware(stage).build());
        let gate = Arc::new(Notify::new());

        let handler = {
            let gate = Arc::clone(&gate);
            Arc::new(handler_fn(move |_ctx| {
                let gate = Arc::clone(&gate);
                Box::pin(async move {
                    gate.notified().await;
                    Ok(Response::ok())
                })
            }))
        };

        let mut running = Vec::new();
        for _ in 0..2 {
            let pipeline = Arc::clone(&pipeline);
            let handler = Arc::clone(&handler);
            running.push(tokio::spawn(async move {
                let mut ctx = ctx(Duration::from_secs(10));
                pipeline.run(&mut ctx, handler.as_ref()).await
            }));
        }
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.get("getUser").in_flight(), 2);

        let mut ctx3 = ctx(Duration::from_secs(10));
        let err = pipeline.run(&mut ctx3, handler.as_ref()).await.unwrap_err();
        assert!(matches!(err, NimbusError::BulkheadFull { .. }));

        gate.notify_waiters();
        for task in running {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(registry.get("getUser").in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permit_released_on_error() {
        let stage = BulkheadMiddleware::from_config(BulkheadConfig {
            max_concurrent: 1,
            ..BulkheadConfig::default()
        });
        let registry = Arc::clone(stage.registry());
        let pipeline = Pipeline::builder().use_middleware(stage).build();
        let handler = handler_fn(|_ctx| Box::pin(async { Err(NimbusError::internal("boom")) }));

        for _ in 0..3 {
            let mut ctx = ctx(Duration::from_secs(1));
            let err = pipeline.run(&mut ctx, &handler).await.unwrap_err();
            assert!(matches!(err, NimbusError::Internal { .. }));
        }
        assert_eq!(registry.get("getUser").in_flight(), 0);
    }
}
