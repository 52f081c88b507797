//! # Nimbus Test
//!
//! Test utilities for functions built on Nimbus. Everything runs in process:
//! payload builders produce the JSON a host would deliver, and
//! [`TestHarness`] pushes it through a real [`Dispatcher`](nimbus_dispatch::Dispatcher)
//! with its full middleware pipeline.
//!
//! ## Key Features
//!
//! - **Payload builders** for every built-in trigger kind
//! - **Harness** that records each invocation in a [`MemorySink`]
//! - **Response assertions** that chain and print the body on failure
//!
//! ## Example
//!
//! ```
//! use nimbus_core::{handler_fn, Response};
//! use nimbus_dispatch::{Dispatcher, Route};
//! use nimbus_test::{HttpRequest, TestHarness};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let harness = TestHarness::new(Dispatcher::builder().route(Route::http(
//!     "createUser",
//!     "POST",
//!     "/users",
//!     handler_fn(|ctx| {
//!         let name = ctx
//!             .envelope()
//!             .body_json::<serde_json::Value>()
//!             .ok()
//!             .and_then(|body| body["name"].as_str().map(String::from));
//!         Box::pin(async move { Response::json(&json!({ "created": name })) })
//!     }),
//! )))
//! .unwrap();
//!
//! harness
//!     .invoke(HttpRequest::post("/users").json(&json!({ "name": "Alice" })))
//!     .await
//!     .assert_success()
//!     .assert_json_field("created", &json!("Alice"));
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod harness;
mod payload;
mod response;
mod sink;

pub use error::TestError;
pub use harness::TestHarness;
pub use payload::{
    BusEvent, HttpRequest, IntoPayload, PayloadVersion, QueueBatch, ScheduleTick, SocketFrame,
    StorageEvent,
};
pub use response::TestResponse;
pub use sink::{MemorySink, RecordedError};
