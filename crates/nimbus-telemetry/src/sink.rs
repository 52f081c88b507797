//! Invocation sinks.
//!
//! The dispatcher reports every finished invocation to an
//! [`InvocationSink`]. Reporting is fire-and-forget: a sink cannot fail the
//! invocation, and the dispatcher contains sink panics.

use std::fmt;
use std::time::Duration;

use nimbus_core::{ErrorCategory, ErrorOrigin, NimbusError, TriggerKind};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::metrics;

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "category")]
pub enum Outcome {
    /// The handler produced a response.
    Success,
    /// The invocation ended with an error of this category.
    Failure(ErrorCategory),
}

impl Outcome {
    /// Derives the outcome of a dispatch result.
    pub fn of<T>(result: &Result<T, NimbusError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(error) => Self::Failure(error.category()),
        }
    }

    /// Returns `success` or the error category name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure(category) => category.as_str(),
        }
    }

    /// Returns true for [`Outcome::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one finished invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationRecord {
    /// Trace id carried by the context.
    pub trace_id: String,
    /// Invocation id (UUID v7).
    pub invocation_id: String,
    /// Resolved route id, if resolution succeeded.
    pub route: Option<String>,
    /// Trigger kind, if classification succeeded.
    pub trigger: Option<TriggerKind>,
    /// How the invocation ended.
    pub outcome: Outcome,
    /// Status code of the returned response.
    pub status: u16,
    /// Wall time spent in the dispatcher.
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Attempts made (1 without retries).
    pub attempts: u32,
}

impl InvocationRecord {
    /// Trigger label for logs and metrics.
    #[must_use]
    pub fn trigger_name(&self) -> &'static str {
        self.trigger.map_or("unclassified", |kind| kind.as_str())
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Receives invocation outcomes.
pub trait InvocationSink: Send + Sync {
    /// Called once per invocation, after the response is produced.
    fn record_invocation(&self, record: &InvocationRecord);

    /// Called for every invocation that ended in an error, before
    /// [`record_invocation`](Self::record_invocation).
    fn record_error(&self, trace_id: &str, error: &NimbusError);
}

/// Sink that emits `tracing` events and `metrics` series.
#[derive(Debug, Clone)]
pub struct TracingSink {
    service_name: String,
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new("nimbus")
    }
}

impl TracingSink {
    /// Creates a sink that tags events with `service_name`.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        metrics::describe_metrics();
        Self {
            service_name: service_name.into(),
        }
    }

    /// Returns the service name.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl InvocationSink for TracingSink {
    fn record_invocation(&self, record: &InvocationRecord) {
        info!(
            service.name = %self.service_name,
            trace_id = %record.trace_id,
            invocation_id = %record.invocation_id,
            route = record.route.as_deref().unwrap_or("-"),
            trigger_kind = record.trigger_name(),
            outcome = record.outcome.as_str(),
            status = record.status,
            duration_ms = record.duration.as_millis() as u64,
            attempt = record.attempts,
            "invocation completed"
        );

        metrics::record_invocation(
            record.route.as_deref(),
            record.trigger_name(),
            record.outcome.as_str(),
            record.duration,
            record.attempts,
        );
    }

    fn record_error(&self, trace_id: &str, err: &NimbusError) {
        match err.origin() {
            ErrorOrigin::Framework if err.category() == ErrorCategory::Internal => {
                error!(
                    service.name = %self.service_name,
                    trace_id,
                    error_code = err.error_code(),
                    error = ?err,
                    "invocation failed"
                );
            }
            ErrorOrigin::Resilience => {
                warn!(
                    service.name = %self.service_name,
                    trace_id,
                    error_code = err.error_code(),
                    error = %err,
                    "invocation rejected"
                );
            }
            _ => {
                debug!(
                    service.name = %self.service_name,
                    trace_id,
                    error_code = err.error_code(),
                    error = %err,
                    "invocation returned an error"
                );
            }
        }
        metrics::record_error(err);
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl InvocationSink for NoopSink {
    fn record_invocation(&self, _record: &InvocationRecord) {}

    fn record_error(&self, _trace_id: &str, _error: &NimbusError) {}
}
