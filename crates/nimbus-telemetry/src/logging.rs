//! Structured logging for Nimbus.
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and a JSON
//! or human-readable `fmt` layer. Every crate in the workspace logs through
//! `tracing` macros using the field names in [`fields`], so one subscriber
//! covers dispatch, resilience and handler logs alike.
//!
//! # Example
//!
//! ```rust,ignore
//! use nimbus_telemetry::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::production())?;
//!
//! tracing::info!(route = "getUser", trace_id = "abc", "invocation started");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line human-readable output.
    Compact,
}

impl LogFormat {
    /// Returns the configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Compact => "compact",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(TelemetryError::InvalidConfig(format!(
                "unknown log format '{other}', expected json, pretty or compact"
            ))),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Whether logging is installed at all.
    pub enabled: bool,

    /// Filter directives (e.g., "info", "nimbus_dispatch=debug,warn").
    pub level: String,

    /// Output format.
    pub format: LogFormat,

    /// Whether to include file and line.
    pub include_location: bool,

    /// Whether to colorize output.
    pub ansi_enabled: bool,

    /// Whether to log span open and close events.
    pub span_events: bool,

    /// Whether to include the target (module path).
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Creates a development configuration with human-readable output.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            include_location: true,
            ansi_enabled: true,
            span_events: true,
            include_target: true,
        }
    }

    /// Creates a production configuration with JSON output.
    ///
    /// Function hosts capture stdout line by line, so colors are off.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
            include_location: false,
            ansi_enabled: false,
            span_events: false,
            include_target: true,
        }
    }

    /// Checks that the filter directives parse.
    pub fn validate(&self) -> TelemetryResult<()> {
        create_env_filter(&self.level)
            .map(|_| ())
            .map_err(|e| TelemetryError::InvalidConfig(format!("log level: {e}")))
    }
}

/// Initializes the global subscriber.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the filter does not parse or a
/// global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = EnvFilter::try_new(&config.level)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = tracing_subscriber::fmt::layer()
        .with_span_events(span_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_target(config.include_target)
        .with_ansi(config.ansi_enabled);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => base.json().with_filter(filter).boxed(),
        LogFormat::Pretty => base.pretty().with_filter(filter).boxed(),
        LogFormat::Compact => base.compact().with_filter(filter).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Creates an env filter from a directive string.
///
/// # Errors
///
/// Returns error if the filter string is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter).map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Standard log field names.
///
/// Use these names for consistency across crates.
pub mod fields {
    /// Trace ID.
    pub const TRACE_ID: &str = "trace_id";

    /// Invocation ID (UUID v7).
    pub const INVOCATION_ID: &str = "invocation_id";

    /// Resolved route id.
    pub const ROUTE: &str = "route";

    /// Trigger kind name.
    pub const TRIGGER_KIND: &str = "trigger_kind";

    /// Attempt number.
    pub const ATTEMPT: &str = "attempt";

    /// Outcome (`success` or an error category).
    pub const OUTCOME: &str = "outcome";

    /// Response status code.
    pub const STATUS: &str = "status";

    /// Duration in milliseconds.
    pub const DURATION_MS: &str = "duration_ms";

    /// Error message.
    pub const ERROR: &str = "error";

    /// Machine error code.
    pub const ERROR_CODE: &str = "error_code";

    /// Resilience key (breaker, bulkhead, limiter).
    pub const KEY: &str = "key";

    /// Service name.
    pub const SERVICE_NAME: &str = "service.name";
}
