//! Route table and dispatcher for the Nimbus function dispatch framework.
//!
//! This crate ties the others together. A [`Dispatcher`] owns a classifier,
//! a sealed [`RouteTable`] whose routes each carry their own
//! [`Pipeline`](nimbus_middleware::Pipeline), an optional [`Authenticator`]
//! and an [`InvocationSink`](nimbus_telemetry::InvocationSink).
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use nimbus_config::NimbusConfig;
//! use nimbus_core::{handler_fn, Response, TriggerKind};
//! use nimbus_dispatch::{DispatcherBuilder, HostInvocation, Route};
//! use nimbus_router::SourcePattern;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let dispatcher = DispatcherBuilder::from_config(&NimbusConfig::development())
//!     .unwrap()
//!     .route(Route::source(
//!         "orders",
//!         TriggerKind::BatchMessage,
//!         SourcePattern::exact("orders"),
//!         handler_fn(|ctx| {
//!             let count = ctx.envelope().metadata_value("record_count").cloned();
//!             Box::pin(async move { Response::json(&json!({ "processed": count })) })
//!         }),
//!     ))
//!     .build()
//!     .unwrap();
//!
//! let raw = json!({
//!     "Records": [{
//!         "eventSource": "aws:sqs",
//!         "eventSourceARN": "arn:aws:sqs:us-east-1:123456789012:orders",
//!         "body": "{}"
//!     }]
//! });
//! let host = HostInvocation::new().with_remaining(Duration::from_secs(5));
//! let response = dispatcher.handle(&raw, &host).await;
//! assert!(response.is_success());
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus-dispatch/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod assembly;
mod auth;
mod dispatcher;
mod error;
mod host;
pub mod propagation;
mod table;

pub use assembly::pipeline_from_config;
pub use auth::{Authenticator, HeaderIdentity, NoAuthenticator, CALLER_IDENTITY_HEADER};
pub use dispatcher::{DispatchOptions, Dispatcher, DispatcherBuilder};
pub use error::BuildError;
pub use host::HostInvocation;
pub use table::{Matcher, ResolvedRoute, Route, RouteTable, RouteTableBuilder, SOCKET_DEFAULT_ROUTE};
