//! Typed configuration for Nimbus.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict parsing (unknown fields fail)
//! - Layered loading (defaults → files → strings → env)
//!
//! [`NimbusConfig`] holds one section per resilience primitive plus the
//! dispatcher and telemetry settings. Each section converts into the runtime
//! type it configures, e.g. [`CircuitBreakerSection::to_config`] or
//! [`RetrySection::to_policy`].
//!
//! # Example
//!
//! ```no_run
//! use nimbus_config::ConfigLoader;
//!
//! # fn main() -> Result<(), nimbus_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_dotenv()?
//!     .with_optional_file("nimbus.toml")?
//!     .with_env_prefix("NIMBUS")
//!     .load()?;
//!
//! println!("breaker opens after {} failures", config.circuit_breaker.failure_threshold);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! service_name = "orders"
//! middleware_order = ["timeout", "load_shed", "rate_limit", "retry", "circuit_breaker", "bulkhead"]
//!
//! [circuit_breaker]
//! failure_threshold = 5
//! half_open_after_ms = 30000
//!
//! [bulkhead]
//! max_concurrent = 50
//! queue_size = 10
//! queue_timeout_ms = 500
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 100
//!
//! [rate_limit]
//! algorithm = "sliding_window"
//! limit = 100
//! window_ms = 60000
//! dimensions = ["caller"]
//!
//! [load_shed]
//! mode = "priority"
//! priority_threshold = 5
//! trigger_load = 0.9
//!
//! [timeout]
//! max_duration_ms = 10000
//!
//! [dispatcher]
//! safety_margin_ms = 100
//! expose_internal_errors = false
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `PREFIX__SECTION__KEY`:
//!
//! - `NIMBUS__SERVICE_NAME=orders`
//! - `NIMBUS__RETRY__MAX_ATTEMPTS=5`
//! - `NIMBUS__RATE_LIMIT__DIMENSIONS=tenant,route`
//! - `NIMBUS__TELEMETRY__LOGGING__LEVEL=debug`

#![doc(html_root_url = "https://docs.rs/nimbus-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::NimbusConfig;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    BulkheadSection, CircuitBreakerSection, DispatcherSection, LoadShedModeKind,
    LoadShedSection, RateLimitSection, RetrySection, TelemetrySection, TimeoutSection,
};
