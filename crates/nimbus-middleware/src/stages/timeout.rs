//! Deadline guard middleware.
//!
//! Tightens the context deadline to the configured maximum, then drops the
//! downstream chain if it is still running at the deadline. The context is
//! marked cancelled so that an enclosing retry stage stops too.

use std::time::Duration;

use nimbus_core::{BoxFuture, HandlerResult, InvocationContext};
use nimbus_resilience::{run_until, TimeoutConfig};
use tracing::warn;

use crate::middleware::{Middleware, Next};

/// Deadline guard middleware.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutMiddleware {
    config: TimeoutConfig,
}

impl TimeoutMiddleware {
    /// Guards with the host deadline only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Guards with the earlier of the host deadline and `now + max`.
    #[must_use]
    pub fn with_max_duration(max: Duration) -> Self {
        Self::from_config(TimeoutConfig {
            max_duration: Some(max),
        })
    }

    /// Creates the stage from a configuration.
    #[must_use]
    pub const fn from_config(config: TimeoutConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &TimeoutConfig {
        &self.config
    }
}

impl Middleware for TimeoutMiddleware {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut InvocationContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let deadline = self.config.effective_deadline(ctx.deadline());
            ctx.tighten_deadline(deadline);

            match run_until(deadline, next.run(ctx)).await {
                Ok(result) => result,
                Err(timeout) => {
                    ctx.cancel();
                    warn!(
                        trace_id = ctx.trace_id(),
                        route = ctx.route_id().unwrap_or("-"),
                        elapsed_ms = ctx.elapsed().as_millis() as u64,
                        "invocation timed out"
                    );
                    Err(timeout)
                }
            }
        })
    }
}
