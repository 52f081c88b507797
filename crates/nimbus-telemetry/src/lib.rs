//! Observability for Nimbus.
//!
//! - **Logging**: [`logging::init_logging`] installs a `tracing-subscriber`
//!   registry with JSON or human-readable output
//! - **Metrics**: standard series emitted through the `metrics` facade
//! - **Sinks**: [`InvocationSink`] receives one [`InvocationRecord`] per
//!   dispatched invocation
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `nimbus_invocations_total` | Counter | `route`, `trigger`, `outcome` | Completed invocations |
//! | `nimbus_invocation_duration_seconds` | Histogram | `route`, `trigger` | Invocation latency |
//! | `nimbus_errors_total` | Counter | `category`, `origin` | Errors by category |
//!
//! # Example
//!
//! ```rust,ignore
//! use nimbus_telemetry::{init_logging, LogConfig, TracingSink};
//!
//! init_logging(&LogConfig::production())?;
//! let sink = TracingSink::new("orders-service");
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod logging;
pub mod metrics;
mod sink;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use sink::{InvocationRecord, InvocationSink, NoopSink, Outcome, TracingSink};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
