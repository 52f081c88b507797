//! Retry middleware.
//!
//! Re-runs the downstream chain (never the upstream stages) while the
//! [`RetryPolicy`] allows it. Backoff sleeps end early if the invocation is
//! cancelled.

use nimbus_core::{BoxFuture, HandlerResult, InvocationContext};
use nimbus_resilience::RetryPolicy;
use tracing::{debug, warn};

use crate::middleware::{Middleware, Next};

/// Retry middleware.
#[derive(Debug, Clone, Default)]
pub struct RetryMiddleware {
    policy: RetryPolicy,
}

impl RetryMiddleware {
    /// Creates the stage from a policy.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Returns the policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl Middleware for RetryMiddleware {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut InvocationContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let mut attempt = 1;
            loop {
                ctx.set_attempt(attempt);
                let error = match next.run(ctx).await {
                    Ok(response) => return Ok(response),
                    Err(error) => error,
                };

                let Some(delay) = self.policy.next_delay(attempt, &error, ctx) else {
                    if attempt > 1 {
                        warn!(
                            trace_id = ctx.trace_id(),
                            attempts = attempt,
                            error = %error,
                            "giving up after retries"
                        );
                    }
                    return Err(error);
                };

                debug!(
                    trace_id = ctx.trace_id(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after failure"
                );

                let cancellation = ctx.cancellation();
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancellation.cancelled() => return Err(error),
                }
                attempt += 1;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::stages::test_support::ctx;
    use crate::stages::TimeoutMiddleware;
    use nimbus_core::{handler_fn, NimbusError, Response};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn flaky(failures: u32, calls: &Arc<AtomicU32>) -> impl nimbus_core::Handler {
        let calls = Arc::clone(calls);
        handler_fn(move |ctx| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move {
                assert_eq!(ctx.attempt(), n);
                if n <= failures {
                    Err(NimbusError::external("flaky", Some("inventory")))
                } else {
                    Ok(Response::ok())
                }
            })
        })
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts)
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = Pipeline::builder()
            .use_middleware(RetryMiddleware::new(policy(3)))
            .build();
        let handler = flaky(2, &calls);
        let mut ctx = ctx(Duration::from_secs(5));

        assert!(pipeline.run(&mut ctx, &handler).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.attempt(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = Pipeline::builder()
            .use_middleware(RetryMiddleware::new(policy(2)))
            .build();
        let handler = flaky(2, &calls);
        let mut ctx = ctx(Duration::from_secs(5));

        let err = pipeline.run(&mut ctx, &handler).await.unwrap_err();
        assert!(matches!(err, NimbusError::External { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let handler = handler_fn(move |_ctx| {
            counted.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(NimbusError::BulkheadFull { key: "k".into() }) })
        });
        let pipeline = Pipeline::builder()
            .use_middleware(RetryMiddleware::new(policy(5)))
            .build();
        let mut ctx = ctx(Duration::from_secs(5));

        let err = pipeline.run(&mut ctx, &handler).await.unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_downstream_stages_rerun() {
        let outer = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&outer);
        let counter = crate::FnMiddleware::new("counter", move |ctx, next| {
            counted.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { next.run(ctx).await })
        });
        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = Pipeline::builder()
            .use_middleware(counter)
            .use_middleware(RetryMiddleware::new(policy(3)))
            .build();
        let handler = flaky(1, &calls);
        let mut ctx = ctx(Duration::from_secs(5));

        assert!(pipeline.run(&mut ctx, &handler).await.is_ok());
        assert_eq!(outer.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inner_timeout_stops_retries() {
        // The inner timeout cancels the context, so retry does not try again.
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let handler = handler_fn(move |_ctx| {
            counted.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Response::ok())
            })
        });
        let pipeline = Pipeline::builder()
            .use_middleware(RetryMiddleware::new(policy(5)))
            .use_middleware(TimeoutMiddleware::with_max_duration(Duration::from_millis(100)))
            .build();
        let mut ctx = ctx(Duration::from_secs(5));

        let err = pipeline.run(&mut ctx, &handler).await.unwrap_err();
        assert!(matches!(err, NimbusError::Timeout { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
