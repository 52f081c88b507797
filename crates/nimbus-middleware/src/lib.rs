//! # Nimbus Middleware
//!
//! Composable middleware pipeline for Nimbus handlers.
//!
//! A [`Pipeline`] is an ordered list of [`Middleware`] wrapped around a
//! handler. The first middleware registered is the outermost. Each stage
//! receives the invocation context and a [`Next`] cursor, and may:
//!
//! - run code before and after the rest of the chain
//! - short-circuit by returning without calling `next`
//! - call `next` again (retry re-runs only the downstream chain)
//!
//! ## Built-in Stages
//!
//! | Stage | Name | Purpose |
//! |-------|------|---------|
//! | [`TimeoutMiddleware`](stages::TimeoutMiddleware) | `timeout` | Drop work at the deadline |
//! | [`LoadShedMiddleware`](stages::LoadShedMiddleware) | `load_shed` | Reject under load |
//! | [`RateLimitMiddleware`](stages::RateLimitMiddleware) | `rate_limit` | Per-key quotas |
//! | [`RetryMiddleware`](stages::RetryMiddleware) | `retry` | Backoff and re-run |
//! | [`CircuitBreakerMiddleware`](stages::CircuitBreakerMiddleware) | `circuit_breaker` | Stop calling failing dependencies |
//! | [`BulkheadMiddleware`](stages::BulkheadMiddleware) | `bulkhead` | Cap concurrency |
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use nimbus_middleware::Pipeline;
//! use nimbus_middleware::stages::{RetryMiddleware, TimeoutMiddleware};
//! use nimbus_resilience::RetryPolicy;
//!
//! let pipeline = Pipeline::builder()
//!     .use_middleware(TimeoutMiddleware::with_max_duration(Duration::from_secs(3)))
//!     .use_middleware(RetryMiddleware::new(RetryPolicy::new(3)))
//!     .build();
//! assert_eq!(pipeline.stage_names(), vec!["timeout", "retry"]);
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod middleware;
pub mod pipeline;
pub mod stages;

pub use middleware::{BoxedMiddleware, FnMiddleware, Middleware, Next};
pub use pipeline::{OverrideMode, Pipeline, PipelineBuilder, StageKind};
