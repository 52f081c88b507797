//! # Nimbus
//!
//! **Function dispatch and resilience for serverless handlers**
//!
//! Nimbus takes whatever payload the host hands a function, works out what
//! kind of trigger produced it, routes it to a handler and wraps the call in
//! a configurable resilience pipeline:
//!
//! - **Classification** of HTTP requests, queue batches, storage
//!   notifications, schedule ticks, bus events and socket frames
//! - **Routing** by path template and method, or by source pattern
//! - **Resilience** stages for timeouts, load shedding, rate limiting,
//!   retries, circuit breaking and bulkheads
//! - **Observability** through `tracing` and the `metrics` facade
//!
//! ## Quick Start
//!
//! ```
//! use nimbus::prelude::*;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = DispatcherBuilder::from_config(&NimbusConfig::development())?
//!     .route(Route::http(
//!         "getUser",
//!         "GET",
//!         "/users/{id}",
//!         handler_fn(|ctx| {
//!             let id = ctx.param("id").unwrap_or_default().to_string();
//!             Box::pin(async move { Response::json(&json!({ "id": id })) })
//!         }),
//!     ))
//!     .build()?;
//!
//! let raw = json!({ "httpMethod": "GET", "path": "/users/42" });
//! let response = dispatcher.handle(&raw, &HostInvocation::new()).await;
//! assert_eq!(response.body(), &json!({ "id": "42" }));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! raw payload → Classifier → RouteTable → InvocationContext → Authenticator
//!                                                                   ↓
//! Response ← Dispatcher ← Timeout → LoadShed → RateLimit → Retry → Breaker → Bulkhead → Handler
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use nimbus_core as core;

// Re-export router types
pub use nimbus_router as router;

// Re-export resilience primitives
pub use nimbus_resilience as resilience;

// Re-export middleware types
pub use nimbus_middleware as middleware;

// Re-export telemetry types
pub use nimbus_telemetry as telemetry;

// Re-export configuration types
pub use nimbus_config as config;

// Re-export dispatcher types
pub use nimbus_dispatch as dispatch;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```
/// use nimbus::prelude::*;
/// ```
pub mod prelude {
    pub use nimbus_core::{
        handler_fn, Classifier, Handler, HandlerResult, InvocationContext, NimbusError,
        NimbusResult, NormalizedEnvelope, Principal, Response, TriggerKind,
    };

    pub use nimbus_router::SourcePattern;

    pub use nimbus_middleware::{FnMiddleware, Middleware, Next, OverrideMode, Pipeline, StageKind};

    pub use nimbus_config::{ConfigLoader, NimbusConfig};

    pub use nimbus_telemetry::{init_logging, InvocationSink, LogConfig, TracingSink};

    pub use nimbus_dispatch::{
        Authenticator, Dispatcher, DispatcherBuilder, HeaderIdentity, HostInvocation, Route,
    };
}
