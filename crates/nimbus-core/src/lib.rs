//! Core types and traits for the Nimbus function dispatch framework.
//!
//! This crate provides the foundational types that every other Nimbus crate
//! builds on:
//!
//! - [`TriggerKind`]: the closed set of invocation sources
//! - [`NormalizedEnvelope`]: the trigger-agnostic view of a payload
//! - [`Classifier`]: ordered [`Sniffer`]s that turn raw JSON into envelopes
//! - [`InvocationContext`]: per-invocation state, deadline and cancellation
//! - [`Handler`] and [`Response`]: the handler contract
//! - [`NimbusError`]: the error taxonomy and its client-facing envelope
//!
//! # Example
//!
//! ```rust
//! use nimbus_core::{Classifier, TriggerKind};
//! use serde_json::json;
//!
//! let raw = json!({
//!     "Records": [{
//!         "eventSource": "aws:sqs",
//!         "eventSourceARN": "arn:aws:sqs:us-east-1:123456789012:orders",
//!         "body": "{}"
//!     }]
//! });
//!
//! let envelope = Classifier::new().classify(&raw).unwrap();
//! assert_eq!(envelope.kind(), TriggerKind::BatchMessage);
//! assert_eq!(envelope.path(), "orders");
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod classify;
mod context;
mod envelope;
mod error;
mod handler;
mod identity;
mod trigger;

pub use classify::{
    Classifier, ClassifierBuilder, ClassifierError, Sniffer, DEFAULT_SNIFFER_ORDER, MAX_REASON_LEN,
};
pub use context::{generate_trace_id, CancellationSignal, InvocationContext, InvocationId};
pub use envelope::{
    EnvelopeBuilder, Headers, NormalizedEnvelope, EVENT_METHOD, HEADER_VALUE_SEPARATOR,
};
pub use error::{
    ErrorCategory, ErrorDetail, ErrorEnvelope, ErrorOrigin, NimbusError, NimbusResult,
    INTERNAL_ERROR_MESSAGE,
};
pub use handler::{handler_fn, BoxFuture, FnHandler, Handler, HandlerResult, Response, SharedHandler};
pub use identity::Principal;
pub use nimbus_router::Params;
pub use trigger::{ParseTriggerKindError, TriggerKind};
