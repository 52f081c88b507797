//! Configuration schema types.
//!
//! One struct per section. Durations are stored as milliseconds so that
//! files and environment variables stay plain integers; each section
//! converts itself into the runtime type it configures.

use std::sync::Arc;
use std::time::Duration;

use nimbus_core::ErrorCategory;
use nimbus_resilience::{
    Algorithm, BulkheadConfig, CategoryClassifier, CircuitBreakerConfig, Dimension,
    DimensionKey, RateLimitConfig, RetryPolicy, ShedMode, TimeoutConfig,
};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Circuit breaker section.
///
/// # Example
///
/// ```toml
/// [circuit_breaker]
/// failure_threshold = 5
/// failure_window_ms = 60000
/// half_open_after_ms = 30000
/// half_open_trial_count = 1
/// failure_categories = ["timeout", "internal", "external"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerSection {
    /// Failures that open the breaker.
    pub failure_threshold: u32,

    /// Rolling window for counting failures. None counts consecutive
    /// failures.
    pub failure_window_ms: Option<u64>,

    /// Time spent open before trials are admitted.
    pub half_open_after_ms: u64,

    /// Concurrent trials allowed, and successes needed to close.
    pub half_open_trial_count: u32,

    /// Error categories that count as failures.
    pub failure_categories: Vec<ErrorCategory>,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_ms: None,
            half_open_after_ms: 30_000,
            half_open_trial_count: 1,
            failure_categories: vec![
                ErrorCategory::Timeout,
                ErrorCategory::Internal,
                ErrorCategory::External,
            ],
        }
    }
}

impl CircuitBreakerSection {
    /// Converts into a breaker configuration.
    #[must_use]
    pub fn to_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            failure_window: self.failure_window_ms.map(Duration::from_millis),
            half_open_after: Duration::from_millis(self.half_open_after_ms),
            half_open_trial_count: self.half_open_trial_count,
        }
    }

    /// Builds the failure classifier.
    #[must_use]
    pub fn classifier(&self) -> CategoryClassifier {
        CategoryClassifier::new(self.failure_categories.iter().copied())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        at_least_one("circuit_breaker.failure_threshold", u64::from(self.failure_threshold))?;
        at_least_one(
            "circuit_breaker.half_open_trial_count",
            u64::from(self.half_open_trial_count),
        )?;
        at_least_one("circuit_breaker.half_open_after_ms", self.half_open_after_ms)?;
        if let Some(window) = self.failure_window_ms {
            at_least_one("circuit_breaker.failure_window_ms", window)?;
        }
        if self.failure_categories.is_empty() {
            return Err(ConfigError::invalid(
                "circuit_breaker.failure_categories",
                "at least one category must count as a failure",
            ));
        }
        Ok(())
    }
}

/// Bulkhead section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BulkheadSection {
    /// Calls allowed to run at once per key.
    pub max_concurrent: usize,

    /// Callers allowed to wait. Zero rejects immediately when full.
    pub queue_size: usize,

    /// Longest a queued caller waits.
    pub queue_timeout_ms: u64,
}

impl Default for BulkheadSection {
    fn default() -> Self {
        let defaults = BulkheadConfig::default();
        Self {
            max_concurrent: defaults.max_concurrent,
            queue_size: defaults.queue_size,
            queue_timeout_ms: defaults.queue_timeout.as_millis() as u64,
        }
    }
}

impl BulkheadSection {
    /// Converts into a bulkhead configuration.
    #[must_use]
    pub fn to_config(&self) -> BulkheadConfig {
        BulkheadConfig {
            max_concurrent: self.max_concurrent,
            queue_size: self.queue_size,
            queue_timeout: Duration::from_millis(self.queue_timeout_ms),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        at_least_one("bulkhead.max_concurrent", self.max_concurrent as u64)
    }
}

/// Retry section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay_ms: u64,

    /// Cap on any single delay.
    pub max_delay_ms: u64,

    /// Error categories that are retried.
    pub retry_categories: Vec<ErrorCategory>,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            retry_categories: vec![ErrorCategory::Timeout, ErrorCategory::External],
        }
    }
}

impl RetrySection {
    /// Builds the retry policy.
    #[must_use]
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_classifier(Arc::new(CategoryClassifier::new(
                self.retry_categories.iter().copied(),
            )))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        at_least_one("retry.max_attempts", u64::from(self.max_attempts))?;
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                format!(
                    "base delay {}ms exceeds max delay {}ms",
                    self.base_delay_ms, self.max_delay_ms
                ),
            ));
        }
        Ok(())
    }
}

/// Rate limit section.
///
/// # Example
///
/// ```toml
/// [rate_limit]
/// algorithm = "sliding_window"
/// limit = 100
/// window_ms = 60000
/// dimensions = ["caller", "route"]
/// fail_open = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSection {
    /// Counting algorithm.
    pub algorithm: Algorithm,

    /// Units allowed per window.
    pub limit: u64,

    /// Window length.
    pub window_ms: u64,

    /// Key dimensions (`global`, `caller`, `tenant`, `route`, `header:<name>`).
    pub dimensions: Vec<Dimension>,

    /// Admit calls when the counter store fails.
    pub fail_open: bool,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::FixedWindow,
            limit: 100,
            window_ms: 60_000,
            dimensions: vec![Dimension::Caller],
            fail_open: true,
        }
    }
}

impl RateLimitSection {
    /// Converts into a limiter configuration.
    #[must_use]
    pub fn to_config(&self) -> RateLimitConfig {
        RateLimitConfig::new(self.algorithm, self.limit, Duration::from_millis(self.window_ms))
            .with_fail_open(self.fail_open)
    }

    /// Builds the key function.
    #[must_use]
    pub fn key(&self) -> DimensionKey {
        DimensionKey::new(self.dimensions.clone())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        at_least_one("rate_limit.limit", self.limit)?;
        at_least_one("rate_limit.window_ms", self.window_ms)
    }
}

/// Load shedding mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadShedModeKind {
    /// Shed a fixed fraction of calls.
    #[default]
    Percentage,
    /// Shed low-priority calls under load.
    Priority,
}

/// Load shedding section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoadShedSection {
    /// Which mode to run.
    pub mode: LoadShedModeKind,

    /// Fraction shed in percentage mode (`0.0..=1.0`).
    pub percentage: f64,

    /// Calls below this priority are shed in priority mode.
    pub priority_threshold: i64,

    /// Load (`0.0..=1.0`) at which priority shedding starts.
    pub trigger_load: f64,
}

impl Default for LoadShedSection {
    fn default() -> Self {
        Self {
            mode: LoadShedModeKind::Percentage,
            percentage: 0.0,
            priority_threshold: 0,
            trigger_load: 0.9,
        }
    }
}

impl LoadShedSection {
    /// Converts into a shedder mode.
    #[must_use]
    pub fn to_mode(&self) -> ShedMode {
        match self.mode {
            LoadShedModeKind::Percentage => ShedMode::Percentage {
                fraction: self.percentage,
            },
            LoadShedModeKind::Priority => ShedMode::Priority {
                threshold: self.priority_threshold,
                trigger: self.trigger_load,
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.percentage) {
            return Err(ConfigError::invalid(
                "load_shed.percentage",
                "must be between 0.0 and 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.trigger_load) {
            return Err(ConfigError::invalid(
                "load_shed.trigger_load",
                "must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }
}

/// Timeout section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutSection {
    /// Upper bound on one invocation. None relies on the host deadline alone.
    pub max_duration_ms: Option<u64>,
}

impl TimeoutSection {
    /// Converts into a timeout configuration.
    #[must_use]
    pub fn to_config(&self) -> TimeoutConfig {
        TimeoutConfig {
            max_duration: self.max_duration_ms.map(Duration::from_millis),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.max_duration_ms {
            Some(ms) => at_least_one("timeout.max_duration_ms", ms),
            None => Ok(()),
        }
    }
}

/// Dispatcher section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherSection {
    /// Subtracted from the host's remaining time to leave room for
    /// encoding the response.
    pub safety_margin_ms: u64,

    /// Budget used when the host does not report remaining time.
    pub default_budget_ms: u64,

    /// Sniffer names to try first, in order. Empty keeps the default order.
    pub sniffer_order: Vec<String>,

    /// Return internal error messages to callers.
    pub expose_internal_errors: bool,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            safety_margin_ms: 100,
            default_budget_ms: 30_000,
            sniffer_order: Vec::new(),
            expose_internal_errors: false,
        }
    }
}

impl DispatcherSection {
    /// Returns the safety margin.
    #[must_use]
    pub const fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.safety_margin_ms)
    }

    /// Returns the fallback budget.
    #[must_use]
    pub const fn default_budget(&self) -> Duration {
        Duration::from_millis(self.default_budget_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        at_least_one("dispatcher.default_budget_ms", self.default_budget_ms)?;
        if self.safety_margin_ms >= self.default_budget_ms {
            return Err(ConfigError::invalid(
                "dispatcher.safety_margin_ms",
                "must be smaller than dispatcher.default_budget_ms",
            ));
        }
        if let Some(dup) = first_duplicate(&self.sniffer_order) {
            return Err(ConfigError::invalid(
                "dispatcher.sniffer_order",
                format!("sniffer '{dup}' listed twice"),
            ));
        }
        Ok(())
    }
}

/// Telemetry section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetrySection {
    /// Logging configuration.
    pub logging: nimbus_telemetry::LogConfig,
}

impl TelemetrySection {
    fn validate(&self) -> Result<(), ConfigError> {
        self.logging
            .validate()
            .map_err(|e| ConfigError::invalid("telemetry.logging.level", e.to_string()))
    }
}

pub(crate) fn validate_sections(config: &crate::NimbusConfig) -> Result<(), ConfigError> {
    config.circuit_breaker.validate()?;
    config.bulkhead.validate()?;
    config.retry.validate()?;
    config.rate_limit.validate()?;
    config.load_shed.validate()?;
    config.timeout.validate()?;
    config.dispatcher.validate()?;
    config.telemetry.validate()
}

fn at_least_one(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::invalid(field, "must be at least 1"))
    } else {
        Ok(())
    }
}

pub(crate) fn first_duplicate<T: PartialEq>(items: &[T]) -> Option<&T> {
    items
        .iter()
        .enumerate()
        .find(|(i, item)| items[..*i].contains(item))
        .map(|(_, item)| item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::NimbusError;
    use nimbus_resilience::FailureClassifier;

    #[test]
    fn test_breaker_defaults_convert() {
        let config = CircuitBreakerSection::default().to_config();
        assert_eq!(config, CircuitBreakerConfig::default());
    }

    #[test]
    fn test_breaker_window_and_classifier() {
        let section = CircuitBreakerSection {
            failure_window_ms: Some(10_000),
            failure_categories: vec![ErrorCategory::External],
            ..CircuitBreakerSection::default()
        };
        assert_eq!(section.to_config().failure_window, Some(Duration::from_secs(10)));
        let classifier = section.classifier();
        assert!(classifier.is_failure(&NimbusError::external("down", Some("db"))));
        assert!(!classifier.is_failure(&NimbusError::timeout("slow")));
    }

    #[test]
    fn test_bulkhead_defaults_match_primitive() {
        assert_eq!(BulkheadSection::default().to_config(), BulkheadConfig::default());
    }

    #[test]
    fn test_retry_policy_conversion() {
        let policy = RetrySection {
            max_attempts: 4,
            retry_categories: vec![ErrorCategory::Internal],
            ..RetrySection::default()
        }
        .to_policy();
        assert_eq!(policy.max_attempts(), 4);
        assert!(policy.is_retryable(&NimbusError::internal("flaky")));
        assert!(!policy.is_retryable(&NimbusError::timeout("slow")));
    }

    #[test]
    fn test_retry_rejects_inverted_delays() {
        let section = RetrySection {
            base_delay_ms: 1_000,
            max_delay_ms: 10,
            ..RetrySection::default()
        };
        assert!(section.validate().is_err());
    }

    #[test]
    fn test_load_shed_modes() {
        let section = LoadShedSection {
            mode: LoadShedModeKind::Priority,
            priority_threshold: 5,
            trigger_load: 0.8,
            ..LoadShedSection::default()
        };
        assert_eq!(
            section.to_mode(),
            ShedMode::Priority {
                threshold: 5,
                trigger: 0.8
            }
        );

        let bad = LoadShedSection {
            percentage: 1.5,
            ..LoadShedSection::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_rate_limit_dimensions_parse() {
        let section: RateLimitSection = serde_json::from_str(
            r#"{"algorithm":"token_bucket","limit":10,"dimensions":["tenant","header:x-api-key"]}"#,
        )
        .unwrap();
        assert_eq!(section.algorithm, Algorithm::TokenBucket);
        assert_eq!(
            section.dimensions,
            vec![Dimension::Tenant, Dimension::Header("x-api-key".to_string())]
        );
        assert_eq!(section.to_config().window, Duration::from_secs(60));
    }

    #[test]
    fn test_dispatcher_rejects_duplicate_sniffers() {
        let section = DispatcherSection {
            sniffer_order: vec!["bus_event".into(), "socket_frame".into(), "bus_event".into()],
            ..DispatcherSection::default()
        };
        let err = section.validate().unwrap_err();
        assert!(err.to_string().contains("bus_event"));
    }

    #[test]
    fn test_timeout_zero_rejected() {
        let section = TimeoutSection {
            max_duration_ms: Some(0),
        };
        assert!(section.validate().is_err());
        assert_eq!(TimeoutSection::default().to_config().max_duration, None);
    }
}
