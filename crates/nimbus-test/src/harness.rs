//! In-process dispatcher harness.

use std::sync::Arc;
use std::time::Duration;

use nimbus_core::HandlerResult;
use nimbus_dispatch::{Dispatcher, DispatcherBuilder, HostInvocation};
use nimbus_telemetry::InvocationRecord;

use crate::payload::IntoPayload;
use crate::response::TestResponse;
use crate::sink::MemorySink;
use crate::TestError;

const DEFAULT_REMAINING: Duration = Duration::from_secs(30);

/// Drives a dispatcher with synthetic payloads.
///
/// The harness installs a [`MemorySink`] so tests can inspect what the
/// dispatcher reported, and hands every invocation the same remaining time
/// unless told otherwise.
///
/// ```
/// use nimbus_core::{handler_fn, Response};
/// use nimbus_dispatch::{Dispatcher, Route};
/// use nimbus_test::{HttpRequest, TestHarness};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let harness = TestHarness::new(
///     Dispatcher::builder().route(Route::http(
///         "health",
///         "GET",
///         "/health",
///         handler_fn(|_ctx| Box::pin(async { Ok(Response::ok()) })),
///     )),
/// )
/// .unwrap();
///
/// harness.invoke(HttpRequest::get("/health")).await.assert_status_code(200);
/// assert_eq!(harness.records().len(), 1);
/// # }
/// ```
#[derive(Debug)]
pub struct TestHarness {
    dispatcher: Dispatcher,
    sink: MemorySink,
    remaining: Duration,
}

impl TestHarness {
    /// Builds the dispatcher with an in-memory sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher fails to build.
    pub fn new(builder: DispatcherBuilder) -> Result<Self, TestError> {
        let sink = MemorySink::new();
        let dispatcher = builder.sink(Arc::new(sink.clone())).build()?;
        Ok(Self {
            dispatcher,
            sink,
            remaining: DEFAULT_REMAINING,
        })
    }

    /// Sets the remaining host time reported for each invocation.
    #[must_use]
    pub const fn with_remaining(mut self, remaining: Duration) -> Self {
        self.remaining = remaining;
        self
    }

    /// Invokes through [`Dispatcher::handle`], so errors arrive as envelopes.
    pub async fn invoke(&self, payload: impl IntoPayload) -> TestResponse {
        let raw = payload.into_payload();
        TestResponse::new(self.dispatcher.handle(&raw, &self.host()).await)
    }

    /// Invokes through [`Dispatcher::dispatch`], keeping the typed error.
    pub async fn dispatch(&self, payload: impl IntoPayload) -> HandlerResult {
        let raw = payload.into_payload();
        self.dispatcher.dispatch(&raw, &self.host()).await
    }

    /// Returns the recorded invocations.
    #[must_use]
    pub fn records(&self) -> Vec<InvocationRecord> {
        self.sink.records()
    }

    /// Returns the sink.
    #[must_use]
    pub const fn sink(&self) -> &MemorySink {
        &self.sink
    }

    /// Returns the dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn host(&self) -> HostInvocation {
        HostInvocation::new().with_remaining(self.remaining)
    }
}
