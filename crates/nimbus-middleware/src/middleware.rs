//! Core middleware trait and types.
//!
//! A [`Middleware`] receives the invocation context and a [`Next`] cursor
//! over the rest of the chain. It may run code before and after calling
//! `next.run(ctx)`, return early without calling it, or call it more than
//! once.
//!
//! # Example
//!
//! ```
//! use nimbus_core::{BoxFuture, HandlerResult, InvocationContext};
//! use nimbus_middleware::{Middleware, Next};
//!
//! struct Stamp;
//!
//! impl Middleware for Stamp {
//!     fn name(&self) -> &'static str {
//!         "stamp"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut InvocationContext,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, HandlerResult> {
//!         Box::pin(async move {
//!             let response = next.run(ctx).await?;
//!             Ok(response.with_header("x-stamped", "1"))
//!         })
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use nimbus_core::{BoxFuture, Handler, HandlerResult, InvocationContext};

/// A type-erased middleware that can be stored in a pipeline.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// The core middleware trait.
///
/// Stages must not spawn work that outlives the call: the host freezes or
/// discards the process as soon as the invocation returns.
pub trait Middleware: Send + Sync + 'static {
    /// Returns the name of this stage, used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Processes the invocation.
    ///
    /// Returning without calling `next` short-circuits the pipeline; the
    /// result is treated exactly like a handler result.
    fn process<'a>(
        &'a self,
        ctx: &'a mut InvocationContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult>;
}

/// Cursor over the remainder of a pipeline.
///
/// `Next` is `Copy`: a stage such as retry can run the downstream chain
/// several times, and every run starts from the same position.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [BoxedMiddleware],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    /// Creates a cursor over `stages` ending in `handler`.
    #[must_use]
    pub fn new(stages: &'a [BoxedMiddleware], handler: &'a dyn Handler) -> Self {
        Self { stages, handler }
    }

    /// Runs the next stage, or the handler if no stages remain.
    pub fn run<'b>(self, ctx: &'b mut InvocationContext) -> BoxFuture<'b, HandlerResult>
    where
        'a: 'b,
    {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.process(
                ctx,
                Next {
                    stages: rest,
                    handler: self.handler,
                },
            ),
            None => self.handler.call(ctx),
        }
    }

    /// Returns the number of stages left before the handler.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.stages.len()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// A middleware built from a closure.
///
/// ```
/// use nimbus_middleware::FnMiddleware;
///
/// let audit = FnMiddleware::new("audit", |ctx, next| {
///     Box::pin(async move {
///         tracing::info!(trace_id = ctx.trace_id(), "invocation started");
///         next.run(ctx).await
///     })
/// });
/// # let _ = audit;
/// ```
pub struct FnMiddleware<F> {
    name: &'static str,
    func: F,
}

impl<F> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut InvocationContext, Next<'a>) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    /// Creates a function-based middleware.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMiddleware")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut InvocationContext, Next<'a>) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut InvocationContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        (self.func)(ctx, next)
    }
}
