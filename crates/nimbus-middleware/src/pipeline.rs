//! Ordered middleware pipeline.
//!
//! The first middleware registered is the outermost: it sees the invocation
//! first on the way in and the result last on the way out.
//!
//! ```text
//! ctx → timeout → load_shed → rate_limit → retry → breaker → bulkhead → handler
//!                                                                         ↓
//! result ←──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Pipelines are built once, when the route table is sealed, and shared
//! read-only by every invocation.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use nimbus_core::{BoxFuture, Handler, HandlerResult, InvocationContext};
use serde::{Deserialize, Serialize};

use crate::middleware::{BoxedMiddleware, Middleware, Next};

/// An immutable, ordered list of middleware.
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[BoxedMiddleware]>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            stages: Arc::from(Vec::new()),
        }
    }
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Creates a pipeline with no stages.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Runs `handler` wrapped in every stage.
    pub fn run<'a>(
        &'a self,
        ctx: &'a mut InvocationContext,
        handler: &'a dyn Handler,
    ) -> BoxFuture<'a, HandlerResult> {
        Next::new(&self.stages, handler).run(ctx)
    }

    /// Returns a pipeline for a route with its own middleware.
    ///
    /// [`OverrideMode::Append`] runs the route's stages inside this
    /// pipeline's stages; [`OverrideMode::Replace`] uses them alone.
    #[must_use]
    pub fn with_overrides(&self, overrides: &[BoxedMiddleware], mode: OverrideMode) -> Self {
        let stages: Vec<BoxedMiddleware> = match mode {
            OverrideMode::Append => self.stages.iter().chain(overrides).cloned().collect(),
            OverrideMode::Replace => overrides.to_vec(),
        };
        Self {
            stages: stages.into(),
        }
    }

    /// Returns the names of all stages in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Returns the stages.
    #[must_use]
    pub fn stages(&self) -> &[BoxedMiddleware] {
        &self.stages
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if there are no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware. Earlier middleware wraps later middleware.
    #[must_use]
    pub fn use_middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Appends an already shared middleware.
    #[must_use]
    pub fn use_shared(mut self, middleware: BoxedMiddleware) -> Self {
        self.stages.push(middleware);
        self
    }

    /// Appends several shared middleware in order.
    #[must_use]
    pub fn use_all<I>(mut self, middleware: I) -> Self
    where
        I: IntoIterator<Item = BoxedMiddleware>,
    {
        self.stages.extend(middleware);
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages.into(),
        }
    }
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("stages", &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// How a route's own middleware combines with the global pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideMode {
    /// Route middleware runs inside the global stages.
    #[default]
    Append,
    /// Route middleware replaces the global stages.
    Replace,
}

/// The configurable built-in stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Deadline guard.
    Timeout,
    /// Load shedder.
    LoadShed,
    /// Rate limiter.
    RateLimit,
    /// Retry with backoff.
    Retry,
    /// Circuit breaker.
    CircuitBreaker,
    /// Concurrency limit.
    Bulkhead,
}

impl StageKind {
    /// The order used when none is configured.
    pub const DEFAULT_ORDER: [Self; 6] = [
        Self::Timeout,
        Self::LoadShed,
        Self::RateLimit,
        Self::Retry,
        Self::CircuitBreaker,
        Self::Bulkhead,
    ];

    /// Returns the stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::LoadShed => "load_shed",
            Self::RateLimit => "rate_limit",
            Self::Retry => "retry",
            Self::CircuitBreaker => "circuit_breaker",
            Self::Bulkhead => "bulkhead",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::DEFAULT_ORDER
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown middleware stage: {s}"))
    }
}
