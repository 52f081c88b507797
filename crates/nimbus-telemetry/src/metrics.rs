//! Invocation metrics.
//!
//! Metrics are emitted through the `metrics` facade. No exporter is
//! installed here; the host process picks its own recorder, and without one
//! every call is a no-op.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `nimbus_invocations_total` | Counter | `route`, `trigger`, `outcome` | Completed invocations |
//! | `nimbus_invocation_duration_seconds` | Histogram | `route`, `trigger` | Invocation latency |
//! | `nimbus_errors_total` | Counter | `category`, `origin` | Errors by category |
//! | `nimbus_invocation_attempts` | Histogram | `route` | Attempts per invocation |

use std::sync::Once;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use nimbus_core::NimbusError;

/// Completed invocations.
pub const INVOCATIONS_TOTAL: &str = "nimbus_invocations_total";

/// Invocation latency in seconds.
pub const INVOCATION_DURATION_SECONDS: &str = "nimbus_invocation_duration_seconds";

/// Errors by category and origin.
pub const ERRORS_TOTAL: &str = "nimbus_errors_total";

/// Attempts per invocation.
pub const INVOCATION_ATTEMPTS: &str = "nimbus_invocation_attempts";

/// Label used when no route was resolved.
pub const UNROUTED: &str = "unrouted";

static DESCRIBE: Once = Once::new();

/// Registers descriptions for the standard metrics with the installed
/// recorder. Safe to call more than once.
pub fn describe_metrics() {
    DESCRIBE.call_once(|| {
        describe_counter!(INVOCATIONS_TOTAL, "Total number of invocations dispatched");
        describe_histogram!(
            INVOCATION_DURATION_SECONDS,
            metrics::Unit::Seconds,
            "Invocation duration in seconds"
        );
        describe_counter!(ERRORS_TOTAL, "Total errors by category and origin");
        describe_histogram!(INVOCATION_ATTEMPTS, "Attempts made per invocation");
    });
}

/// Records a completed invocation.
///
/// Updates:
/// - `nimbus_invocations_total` (incremented)
/// - `nimbus_invocation_duration_seconds` (observation)
/// - `nimbus_invocation_attempts` (observation)
pub fn record_invocation(
    route: Option<&str>,
    trigger: &'static str,
    outcome: &'static str,
    duration: Duration,
    attempts: u32,
) {
    let route = route.unwrap_or(UNROUTED).to_string();

    counter!(
        INVOCATIONS_TOTAL,
        "route" => route.clone(),
        "trigger" => trigger,
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        INVOCATION_DURATION_SECONDS,
        "route" => route.clone(),
        "trigger" => trigger
    )
    .record(duration.as_secs_f64());

    histogram!(INVOCATION_ATTEMPTS, "route" => route).record(f64::from(attempts));
}

/// Records an error.
pub fn record_error(error: &NimbusError) {
    counter!(
        ERRORS_TOTAL,
        "category" => error.category().as_str(),
        "origin" => error.origin().as_str()
    )
    .increment(1);
}
