//! Top-level configuration.

use nimbus_middleware::StageKind;
use nimbus_telemetry::LogConfig;
use serde::{Deserialize, Serialize};

use crate::schema::{
    first_duplicate, validate_sections, BulkheadSection, CircuitBreakerSection,
    DispatcherSection, LoadShedSection, RateLimitSection, RetrySection, TelemetrySection,
    TimeoutSection,
};
use crate::ConfigError;

/// Complete Nimbus configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use nimbus_config::NimbusConfig;
///
/// let config = NimbusConfig::default();
/// assert_eq!(config.middleware_order.len(), 6);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct NimbusConfig {
    /// Service name attached to logs and metrics.
    pub service_name: String,

    /// Resilience stages to run, outermost first. Stages not listed are
    /// not built.
    pub middleware_order: Vec<StageKind>,

    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerSection,

    /// Bulkhead settings.
    pub bulkhead: BulkheadSection,

    /// Retry settings.
    pub retry: RetrySection,

    /// Rate limit settings.
    pub rate_limit: RateLimitSection,

    /// Load shedding settings.
    pub load_shed: LoadShedSection,

    /// Timeout settings.
    pub timeout: TimeoutSection,

    /// Dispatcher settings.
    pub dispatcher: DispatcherSection,

    /// Telemetry settings.
    pub telemetry: TelemetrySection,
}

impl Default for NimbusConfig {
    fn default() -> Self {
        Self {
            service_name: "nimbus".to_string(),
            middleware_order: StageKind::DEFAULT_ORDER.to_vec(),
            circuit_breaker: CircuitBreakerSection::default(),
            bulkhead: BulkheadSection::default(),
            retry: RetrySection::default(),
            rate_limit: RateLimitSection::default(),
            load_shed: LoadShedSection::default(),
            timeout: TimeoutSection::default(),
            dispatcher: DispatcherSection::default(),
            telemetry: TelemetrySection::default(),
        }
    }
}

impl NimbusConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field:
    /// - a stage listed twice in `middleware_order`
    /// - an empty service name
    /// - zero limits, thresholds or attempts
    /// - fractions outside `0.0..=1.0`
    /// - an unparsable log level
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::invalid("service_name", "cannot be empty"));
        }
        if let Some(dup) = first_duplicate(&self.middleware_order) {
            return Err(ConfigError::invalid(
                "middleware_order",
                format!("stage '{dup}' listed twice"),
            ));
        }
        validate_sections(self)
    }

    /// Returns true if the stage is part of the pipeline.
    #[must_use]
    pub fn has_stage(&self, kind: StageKind) -> bool {
        self.middleware_order.contains(&kind)
    }

    /// Development preset: pretty debug logs, internal errors exposed,
    /// no rate limiting or load shedding.
    ///
    /// # Example
    ///
    /// ```
    /// use nimbus_config::NimbusConfig;
    ///
    /// let config = NimbusConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// assert!(config.dispatcher.expose_internal_errors);
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.telemetry.logging = LogConfig::development();
        config.dispatcher.expose_internal_errors = true;
        config
            .middleware_order
            .retain(|kind| !matches!(kind, StageKind::RateLimit | StageKind::LoadShed));
        config
    }

    /// Production preset: JSON logs, internal errors hidden, all stages.
    ///
    /// # Example
    ///
    /// ```
    /// use nimbus_config::NimbusConfig;
    /// use nimbus_telemetry::LogFormat;
    ///
    /// let config = NimbusConfig::production();
    /// assert_eq!(config.telemetry.logging.format, LogFormat::Json);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.telemetry.logging = LogConfig::production();
        config.dispatcher.expose_internal_errors = false;
        config
    }
}
