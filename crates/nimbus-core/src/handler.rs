//! Handler trait and the response type handlers produce.
//!
//! Handlers are object-safe so the route table can store them as
//! `Arc<dyn Handler>`. Closures are adapted with [`handler_fn`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::context::InvocationContext;
use crate::envelope::Headers;
use crate::error::NimbusError;

/// A boxed, sendable future borrowing for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a handler, and every middleware stage, returns.
pub type HandlerResult = Result<Response, NimbusError>;

/// A user-supplied function invoked for a matched route.
///
/// # Example
///
/// ```rust
/// use nimbus_core::{BoxFuture, Handler, HandlerResult, InvocationContext, Response};
///
/// struct GetUser;
///
/// impl Handler for GetUser {
///     fn call<'a>(&'a self, ctx: &'a mut InvocationContext) -> BoxFuture<'a, HandlerResult> {
///         Box::pin(async move {
///             let id = ctx.param("id").unwrap_or_default().to_string();
///             Ok(Response::json(&serde_json::json!({ "id": id }))?)
///         })
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Handles one invocation.
    fn call<'a>(&'a self, ctx: &'a mut InvocationContext) -> BoxFuture<'a, HandlerResult>;
}

/// A shared, type-erased handler.
pub type SharedHandler = Arc<dyn Handler>;

/// Adapter turning a closure into a [`Handler`].
#[derive(Clone)]
pub struct FnHandler<F> {
    f: F,
}

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut InvocationContext) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut InvocationContext) -> BoxFuture<'a, HandlerResult> {
        (self.f)(ctx)
    }
}

/// Wraps a closure as a handler.
///
/// ```rust
/// use nimbus_core::{handler_fn, Response};
///
/// let handler = handler_fn(|ctx| {
///     Box::pin(async move { Ok(Response::ok().with_header("x-path", ctx.envelope().path())) })
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(&'a mut InvocationContext) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    FnHandler { f }
}

/// The trigger-agnostic result of an invocation.
///
/// The trigger-specific encoder turns it into whatever the host expects.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Value,
}

impl Response {
    /// Creates a response with the given status and body.
    #[must_use]
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body,
        }
    }

    /// An empty 200 response.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(StatusCode::OK, Value::Null)
    }

    /// An empty response with the given status.
    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, Value::Null)
    }

    /// A 200 response with a serialized body.
    ///
    /// # Errors
    ///
    /// Returns an internal error if `body` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(body: &T) -> Result<Self, NimbusError> {
        let body = serde_json::to_value(body)
            .map_err(|e| NimbusError::internal_with_source("failed to serialize response", e))?;
        Ok(Self::new(StatusCode::OK, body))
    }

    /// Builds the error envelope response for `error`.
    ///
    /// Rate-limit and circuit rejections carry a `retry-after` header.
    #[must_use]
    pub fn from_error(error: &NimbusError, trace_id: Option<&str>, expose_internal: bool) -> Self {
        let envelope = error.to_envelope(trace_id, expose_internal);
        let body = serde_json::to_value(&envelope).unwrap_or(Value::Null);
        let mut response = Self::new(error.status_code(), body);
        if let Some(secs) = error.retry_after_secs() {
            response.headers.insert("retry-after", secs.to_string());
        }
        if let NimbusError::MethodNotAllowed { allowed, .. } = error {
            response.headers.insert("allow", allowed.join(", "));
        }
        response
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns the status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the headers mutably.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the body.
    #[must_use]
    pub const fn body(&self) -> &Value {
        &self.body
    }

    /// Consumes the response, returning its body.
    #[must_use]
    pub fn into_body(self) -> Value {
        self.body
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Renders the response as `{ statusCode, headers, body }`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let headers: serde_json::Map<String, Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        serde_json::json!({
            "statusCode": self.status.as_u16(),
            "headers": headers,
            "body": self.body,
        })
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::ok()
    }
}
