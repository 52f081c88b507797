//! The dispatcher.
//!
//! One call to [`Dispatcher::dispatch`] runs a raw payload through the
//! whole framework:
//!
//! ```text
//! raw JSON → classify → resolve route → context → authenticate → pipeline → handler
//!                                                                            ↓
//! Response / NimbusError ← record outcome ←──────────────────────────────────┘
//! ```
//!
//! Panics raised by the authenticator, a middleware stage or the handler
//! are caught here and reported as `Internal`; the panic message is logged
//! but never returned to the caller.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use nimbus_config::NimbusConfig;
use nimbus_core::{
    Classifier, HandlerResult, InvocationContext, InvocationId, NimbusError, Response,
    TriggerKind,
};
use nimbus_middleware::{Middleware, OverrideMode, Pipeline};
use nimbus_telemetry::{InvocationRecord, InvocationSink, Outcome, TracingSink};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::assembly::pipeline_from_config;
use crate::auth::{Authenticator, NoAuthenticator};
use crate::error::BuildError;
use crate::host::HostInvocation;
use crate::propagation::{headers, trace_id_for};
use crate::table::{Route, RouteTable, RouteTableBuilder};

/// Dispatcher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Subtracted from the host's remaining time.
    pub safety_margin: Duration,
    /// Budget used when the host reports no remaining time.
    pub default_budget: Duration,
    /// Return internal error messages to callers.
    pub expose_internal_errors: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_millis(100),
            default_budget: Duration::from_secs(30),
            expose_internal_errors: false,
        }
    }
}

impl DispatchOptions {
    /// Time the pipeline gets for an invocation.
    #[must_use]
    pub fn budget_for(&self, host: &HostInvocation) -> Duration {
        host.remaining()
            .unwrap_or(self.default_budget)
            .saturating_sub(self.safety_margin)
    }
}

/// What one run produced, before it is shaped into a return value.
struct Dispatched {
    result: HandlerResult,
    trace_id: String,
    kind: Option<TriggerKind>,
}

/// What the dispatcher knows about an invocation so far.
struct Trail {
    started: Instant,
    trace_id: String,
    invocation_id: InvocationId,
    kind: Option<TriggerKind>,
    route: Option<String>,
    attempts: u32,
}

/// Routes raw payloads to handlers through the middleware pipeline.
///
/// Built once per process with [`DispatcherBuilder`] and shared by every
/// invocation.
///
/// # Example
///
/// ```
/// use nimbus_core::{handler_fn, Response};
/// use nimbus_dispatch::{Dispatcher, HostInvocation, Route};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let dispatcher = Dispatcher::builder()
///     .route(Route::http(
///         "getUser",
///         "GET",
///         "/users/{id}",
///         handler_fn(|ctx| {
///             let id = ctx.param("id").unwrap_or_default().to_string();
///             Box::pin(async move { Response::json(&json!({ "id": id })) })
///         }),
///     ))
///     .build()
///     .unwrap();
///
/// let raw = json!({ "httpMethod": "GET", "path": "/users/42" });
/// let response = dispatcher.dispatch(&raw, &HostInvocation::new()).await.unwrap();
/// assert_eq!(response.body(), &json!({ "id": "42" }));
/// # }
/// ```
pub struct Dispatcher {
    classifier: Classifier,
    table: Arc<RouteTable>,
    authenticator: Arc<dyn Authenticator>,
    sink: Arc<dyn InvocationSink>,
    options: DispatchOptions,
}

impl Dispatcher {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Runs one invocation and returns the handler's response untouched.
    ///
    /// # Errors
    ///
    /// Returns the classification, routing, authentication, resilience or
    /// handler error that ended the invocation. Panics become `Internal`.
    pub async fn dispatch(&self, raw: &Value, host: &HostInvocation) -> HandlerResult {
        self.run(raw, host).await.result
    }

    /// Runs one invocation and always produces a response.
    ///
    /// Errors are rendered as the error envelope with the matching status.
    /// Request/response errors also carry an `x-trace-id` header.
    pub async fn handle(&self, raw: &Value, host: &HostInvocation) -> Response {
        let Dispatched {
            result,
            trace_id,
            kind,
        } = self.run(raw, host).await;
        match result {
            Ok(response) => response,
            Err(error) => {
                let response = Response::from_error(
                    &error,
                    Some(&trace_id),
                    self.options.expose_internal_errors,
                );
                if kind == Some(TriggerKind::RequestResponse) {
                    response.with_header(headers::TRACE_ID, trace_id)
                } else {
                    response
                }
            }
        }
    }

    /// Returns the sealed route table.
    #[must_use]
    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    /// Returns the classifier.
    #[must_use]
    pub const fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Returns the settings.
    #[must_use]
    pub const fn options(&self) -> &DispatchOptions {
        &self.options
    }

    async fn run(&self, raw: &Value, host: &HostInvocation) -> Dispatched {
        let mut trail = Trail {
            started: Instant::now(),
            trace_id: String::new(),
            invocation_id: InvocationId::new(),
            kind: None,
            route: None,
            attempts: 0,
        };
        let result = self.execute(raw, host, &mut trail).await;
        self.record(&trail, &result);
        Dispatched {
            result,
            trace_id: trail.trace_id,
            kind: trail.kind,
        }
    }

    async fn execute(&self, raw: &Value, host: &HostInvocation, trail: &mut Trail) -> HandlerResult {
        let envelope = match self.classifier.classify(raw) {
            Ok(envelope) => envelope,
            Err(error) => {
                trail.trace_id = trace_id_for(host, None);
                return Err(error);
            }
        };
        trail.trace_id = trace_id_for(host, Some(&envelope));
        trail.kind = Some(envelope.kind());

        let resolved = self.table.resolve(&envelope)?;
        let route = resolved.route;
        trail.route = Some(route.id().to_string());
        debug!(
            trace_id = %trail.trace_id,
            route = route.id(),
            trigger_kind = envelope.kind().as_str(),
            method = envelope.method(),
            path = envelope.path(),
            "route resolved"
        );

        let mut ctx = InvocationContext::with_budget(envelope, self.options.budget_for(host))
            .with_trace_id(trail.trace_id.clone())
            .with_route(route.id(), resolved.params);
        trail.invocation_id = ctx.invocation_id();

        let span = info_span!(
            "invocation",
            trace_id = %trail.trace_id,
            invocation_id = %trail.invocation_id,
            route = route.id(),
            trigger_kind = route.kind().as_str(),
        );
        let pipeline = resolved.pipeline;
        let invoke = async {
            match self.authenticator.authenticate(ctx.envelope()) {
                Ok(Some(principal)) => ctx.set_principal(principal),
                Ok(None) => {}
                Err(error) => return Err(error),
            }
            pipeline.run(&mut ctx, route.handler()).await
        };

        let result = match AssertUnwindSafe(invoke.instrument(span)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                error!(
                    trace_id = %trail.trace_id,
                    route = route.id(),
                    panic = panic_message(panic.as_ref()),
                    "invocation panicked"
                );
                Err(NimbusError::internal("invocation panicked"))
            }
        };
        trail.attempts = ctx.attempt();
        result
    }

    fn record(&self, trail: &Trail, result: &HandlerResult) {
        let record = InvocationRecord {
            trace_id: trail.trace_id.clone(),
            invocation_id: trail.invocation_id.to_string(),
            route: trail.route.clone(),
            trigger: trail.kind,
            outcome: Outcome::of(result),
            status: match result {
                Ok(response) => response.status().as_u16(),
                Err(error) => error.status_code().as_u16(),
            },
            duration: trail.started.elapsed(),
            attempts: trail.attempts,
        };

        let reported = std::panic::catch_unwind(AssertUnwindSafe(|| {
            if let Err(error) = result {
                self.sink.record_error(&record.trace_id, error);
            }
            self.sink.record_invocation(&record);
        }));
        if reported.is_err() {
            warn!(trace_id = %trail.trace_id, "invocation sink panicked");
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("sniffers", &self.classifier.sniffer_names())
            .field("routes", &self.table.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Assembles a [`Dispatcher`].
///
/// Route registration errors are held until [`build`](Self::build) so
/// routes can be chained.
pub struct DispatcherBuilder {
    classifier: Option<Classifier>,
    sniffer_order: Vec<String>,
    routes: RouteTableBuilder,
    route_error: Option<BuildError>,
    pipeline: Pipeline,
    authenticator: Arc<dyn Authenticator>,
    sink: Arc<dyn InvocationSink>,
    options: DispatchOptions,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self {
            classifier: None,
            sniffer_order: Vec::new(),
            routes: RouteTableBuilder::new(),
            route_error: None,
            pipeline: Pipeline::empty(),
            authenticator: Arc::new(NoAuthenticator),
            sink: Arc::new(TracingSink::default()),
            options: DispatchOptions::default(),
        }
    }
}

impl DispatcherBuilder {
    /// Creates a builder with no routes, an empty pipeline, the default
    /// classifier and a [`TracingSink`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder from validated configuration.
    ///
    /// The global pipeline, sniffer order, dispatcher options and sink
    /// service name all come from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Config`] if the configuration is invalid.
    pub fn from_config(config: &NimbusConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let dispatcher = &config.dispatcher;
        Ok(Self {
            sniffer_order: dispatcher.sniffer_order.clone(),
            pipeline: pipeline_from_config(config),
            sink: Arc::new(TracingSink::new(config.service_name.clone())),
            options: DispatchOptions {
                safety_margin: dispatcher.safety_margin(),
                default_budget: dispatcher.default_budget(),
                expose_internal_errors: dispatcher.expose_internal_errors,
            },
            ..Self::default()
        })
    }

    /// Uses a custom classifier. Overrides any sniffer order.
    #[must_use]
    pub fn classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Reorders the built-in sniffers by name.
    #[must_use]
    pub fn sniffer_order<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sniffer_order = names.into_iter().map(Into::into).collect();
        self
    }

    /// Registers a route.
    #[must_use]
    pub fn route(mut self, route: Route) -> Self {
        if self.route_error.is_none() {
            if let Err(error) = self.routes.register(route) {
                self.route_error = Some(error);
            }
        }
        self
    }

    /// Replaces the global pipeline.
    #[must_use]
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Appends a stage to the global pipeline, innermost so far.
    #[must_use]
    pub fn middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.pipeline = self
            .pipeline
            .with_overrides(&[Arc::new(middleware)], OverrideMode::Append);
        self
    }

    /// Sets the authenticator.
    #[must_use]
    pub fn authenticator(mut self, authenticator: impl Authenticator) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    /// Sets the invocation sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn InvocationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the safety margin.
    #[must_use]
    pub fn safety_margin(mut self, margin: Duration) -> Self {
        self.options.safety_margin = margin;
        self
    }

    /// Sets the fallback budget.
    #[must_use]
    pub fn default_budget(mut self, budget: Duration) -> Self {
        self.options.default_budget = budget;
        self
    }

    /// Returns internal error messages to callers.
    #[must_use]
    pub fn expose_internal_errors(mut self, expose: bool) -> Self {
        self.options.expose_internal_errors = expose;
        self
    }

    /// Seals the route table and builds the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns the first route registration error, or a classifier error
    /// for an unknown or repeated sniffer name.
    pub fn build(self) -> Result<Dispatcher, BuildError> {
        if let Some(error) = self.route_error {
            return Err(error);
        }
        let classifier = match self.classifier {
            Some(classifier) => classifier,
            None if self.sniffer_order.is_empty() => Classifier::new(),
            None => Classifier::builder()
                .with_builtin()
                .order(self.sniffer_order)?
                .build()?,
        };
        Ok(Dispatcher {
            classifier,
            table: Arc::new(self.routes.seal(&self.pipeline)),
            authenticator: self.authenticator,
            sink: self.sink,
            options: self.options,
        })
    }
}

impl fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("routes", &self.routes.len())
            .field("stages", &self.pipeline.stage_names())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
