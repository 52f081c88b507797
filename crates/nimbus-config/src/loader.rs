//! Layered configuration loader.
//!
//! Layers apply in the order they are added, each one overriding only the
//! fields it sets:
//! 1. Defaults or a preset
//! 2. Configuration files (TOML or JSON)
//! 3. Configuration strings
//! 4. Environment variables (`PREFIX__SECTION__KEY`), applied at `load()`

use std::env;
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde_json::Value;

use crate::schema::LoadShedModeKind;
use crate::{ConfigError, NimbusConfig};

/// Configuration loader.
///
/// # Example
///
/// ```no_run
/// use nimbus_config::ConfigLoader;
///
/// # fn main() -> Result<(), nimbus_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_production()
///     .with_optional_file("nimbus.toml")?
///     .with_env_prefix("NIMBUS")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: NimbusConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: NimbusConfig::default(),
            env_prefix: None,
        }
    }

    /// Resets to default values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = NimbusConfig::default();
        self
    }

    /// Resets to the development preset.
    ///
    /// # Example
    ///
    /// ```
    /// use nimbus_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = NimbusConfig::development();
        self
    }

    /// Resets to the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = NimbusConfig::production();
        self
    }

    /// Merges a configuration file. The format follows the extension
    /// (`.toml` or `.json`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing or unreadable, fails to
    /// parse, or contains unknown fields.
    pub fn with_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.display().to_string()))?;

        self.with_string(&content, &format)
    }

    /// Merges a configuration file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Merges configuration text in `format` ("toml" or "json").
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or unknown fields are present.
    ///
    /// # Example
    ///
    /// ```
    /// use nimbus_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[retry]\nmax_attempts = 5", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.retry.max_attempts, 5);
    /// assert_eq!(config.retry.base_delay_ms, 100);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let layer: Value = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => return Err(ConfigError::UnsupportedFormat(format.to_string())),
        };

        // Reject unknown fields in the layer itself before merging.
        serde_json::from_value::<NimbusConfig>(layer.clone())?;

        let mut merged = serde_json::to_value(&self.config)?;
        merge(&mut merged, layer);
        self.config = serde_json::from_value(merged)?;
        Ok(self)
    }

    /// Sets the environment variable prefix.
    ///
    /// Variables use the format `PREFIX__SECTION__KEY`, for example
    /// `NIMBUS__RETRY__MAX_ATTEMPTS=5` or
    /// `NIMBUS__TELEMETRY__LOGGING__LEVEL=debug`. Lists are comma-separated.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Loads variables from a `.env` file in the working directory, if
    /// present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads variables from a specific dotenv file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn with_dotenv_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        dotenvy::from_path(path)?;
        Ok(self)
    }

    /// Applies environment overrides and validates.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override does not parse or validation
    /// fails.
    pub fn load(mut self) -> Result<NimbusConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let marker = format!("{prefix}__");
            let vars: Vec<(String, String)> =
                env::vars().filter(|(k, _)| k.starts_with(&marker)).collect();
            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Returns the configuration without environment overrides or
    /// validation.
    #[must_use]
    pub fn load_unvalidated(self) -> NimbusConfig {
        self.config
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let path = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env(key, "invalid key format"))?;
        let parts: Vec<&str> = path.split("__").collect();
        let c = &mut self.config;

        match parts.as_slice() {
            ["SERVICE_NAME"] => c.service_name = value.to_string(),
            ["MIDDLEWARE_ORDER"] => c.middleware_order = parse_list(key, value)?,

            ["CIRCUIT_BREAKER", "FAILURE_THRESHOLD"] => {
                c.circuit_breaker.failure_threshold = parse(key, value, "expected integer")?;
            }
            ["CIRCUIT_BREAKER", "FAILURE_WINDOW_MS"] => {
                c.circuit_breaker.failure_window_ms = parse_optional(key, value)?;
            }
            ["CIRCUIT_BREAKER", "HALF_OPEN_AFTER_MS"] => {
                c.circuit_breaker.half_open_after_ms = parse(key, value, "expected integer")?;
            }
            ["CIRCUIT_BREAKER", "HALF_OPEN_TRIAL_COUNT"] => {
                c.circuit_breaker.half_open_trial_count = parse(key, value, "expected integer")?;
            }
            ["CIRCUIT_BREAKER", "FAILURE_CATEGORIES"] => {
                c.circuit_breaker.failure_categories = parse_list(key, value)?;
            }

            ["BULKHEAD", "MAX_CONCURRENT"] => {
                c.bulkhead.max_concurrent = parse(key, value, "expected integer")?;
            }
            ["BULKHEAD", "QUEUE_SIZE"] => {
                c.bulkhead.queue_size = parse(key, value, "expected integer")?;
            }
            ["BULKHEAD", "QUEUE_TIMEOUT_MS"] => {
                c.bulkhead.queue_timeout_ms = parse(key, value, "expected integer")?;
            }

            ["RETRY", "MAX_ATTEMPTS"] => {
                c.retry.max_attempts = parse(key, value, "expected integer")?;
            }
            ["RETRY", "BASE_DELAY_MS"] => {
                c.retry.base_delay_ms = parse(key, value, "expected integer")?;
            }
            ["RETRY", "MAX_DELAY_MS"] => {
                c.retry.max_delay_ms = parse(key, value, "expected integer")?;
            }
            ["RETRY", "RETRY_CATEGORIES"] => c.retry.retry_categories = parse_list(key, value)?,

            ["RATE_LIMIT", "ALGORITHM"] => {
                c.rate_limit.algorithm = value
                    .parse()
                    .map_err(|e: String| ConfigError::env(key, e))?;
            }
            ["RATE_LIMIT", "LIMIT"] => c.rate_limit.limit = parse(key, value, "expected integer")?,
            ["RATE_LIMIT", "WINDOW_MS"] => {
                c.rate_limit.window_ms = parse(key, value, "expected integer")?;
            }
            ["RATE_LIMIT", "DIMENSIONS"] => c.rate_limit.dimensions = parse_list(key, value)?,
            ["RATE_LIMIT", "FAIL_OPEN"] => c.rate_limit.fail_open = parse_bool_var(key, value)?,

            ["LOAD_SHED", "MODE"] => {
                c.load_shed.mode = match value.to_lowercase().as_str() {
                    "percentage" => LoadShedModeKind::Percentage,
                    "priority" => LoadShedModeKind::Priority,
                    _ => {
                        return Err(ConfigError::env(
                            key,
                            "expected 'percentage' or 'priority'",
                        ))
                    }
                };
            }
            ["LOAD_SHED", "PERCENTAGE"] => {
                c.load_shed.percentage = parse(key, value, "expected float")?;
            }
            ["LOAD_SHED", "PRIORITY_THRESHOLD"] => {
                c.load_shed.priority_threshold = parse(key, value, "expected integer")?;
            }
            ["LOAD_SHED", "TRIGGER_LOAD"] => {
                c.load_shed.trigger_load = parse(key, value, "expected float")?;
            }

            ["TIMEOUT", "MAX_DURATION_MS"] => {
                c.timeout.max_duration_ms = parse_optional(key, value)?;
            }

            ["DISPATCHER", "SAFETY_MARGIN_MS"] => {
                c.dispatcher.safety_margin_ms = parse(key, value, "expected integer")?;
            }
            ["DISPATCHER", "DEFAULT_BUDGET_MS"] => {
                c.dispatcher.default_budget_ms = parse(key, value, "expected integer")?;
            }
            ["DISPATCHER", "SNIFFER_ORDER"] => c.dispatcher.sniffer_order = parse_list(key, value)?,
            ["DISPATCHER", "EXPOSE_INTERNAL_ERRORS"] => {
                c.dispatcher.expose_internal_errors = parse_bool_var(key, value)?;
            }

            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                c.telemetry.logging.enabled = parse_bool_var(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => c.telemetry.logging.level = value.to_string(),
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                c.telemetry.logging.format = value
                    .parse()
                    .map_err(|e: nimbus_telemetry::TelemetryError| {
                        ConfigError::env(key, e.to_string())
                    })?;
            }
            ["TELEMETRY", "LOGGING", "INCLUDE_LOCATION"] => {
                c.telemetry.logging.include_location = parse_bool_var(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "ANSI_ENABLED"] => {
                c.telemetry.logging.ansi_enabled = parse_bool_var(key, value)?;
            }

            _ => return Err(ConfigError::env(key, "unknown configuration key")),
        }

        Ok(())
    }
}

/// Deep-merges `layer` into `base`. Objects merge by key; anything else
/// replaces.
fn merge(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

fn parse<T: FromStr>(key: &str, value: &str, expected: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env(key, expected))
}

fn parse_optional(key: &str, value: &str) -> Result<Option<u64>, ConfigError> {
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        Ok(None)
    } else {
        parse(key, value, "expected integer or 'none'").map(Some)
    }
}

fn parse_list<T>(key: &str, value: &str) -> Result<Vec<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse()
                .map_err(|e: T::Err| ConfigError::env(key, e.to_string()))
        })
        .collect()
}

fn parse_bool_var(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env(key, "expected boolean"))
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::ErrorCategory;
    use nimbus_middleware::StageKind;
    use nimbus_resilience::{Algorithm, Dimension};
    use nimbus_telemetry::LogFormat;

    #[test]
    fn test_loader_new() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, NimbusConfig::default());
    }

    #[test]
    fn test_loader_with_development() {
        let config = ConfigLoader::new().with_development().load().unwrap();
        assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_string_layer_keeps_preset_fields() {
        let config = ConfigLoader::new()
            .with_development()
            .with_string("[bulkhead]\nmax_concurrent = 8", "toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.bulkhead.max_concurrent, 8);
        assert_eq!(config.telemetry.logging.level, "debug");
        assert!(config.dispatcher.expose_internal_errors);
    }

    #[test]
    fn test_later_layer_wins() {
        let config = ConfigLoader::new()
            .with_string(r#"{"retry": {"max_attempts": 2, "max_delay_ms": 900}}"#, "json")
            .unwrap()
            .with_string("[retry]\nmax_attempts = 4", "toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.max_delay_ms, 900);
    }

    #[test]
    fn test_lists_replace_rather_than_merge() {
        let config = ConfigLoader::new()
            .with_string("middleware_order = [\"timeout\", \"retry\"]", "toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.middleware_order, vec![StageKind::Timeout, StageKind::Retry]);
    }

    #[test]
    fn test_unknown_field_in_layer_rejected() {
        let result = ConfigLoader::new().with_string("[bulkhead]\nmax_concurent = 8", "toml");
        assert!(matches!(result, Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_unsupported_format() {
        let result = ConfigLoader::new().with_string("a: 1", "yaml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_invalid_values_fail_load() {
        let result = ConfigLoader::new()
            .with_string("[rate_limit]\nlimit = 0", "toml")
            .unwrap()
            .load();
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_loader_with_missing_file() {
        let result = ConfigLoader::new().with_file("/nonexistent/nimbus.toml");
        assert!(matches!(result, Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn test_loader_with_optional_missing_file() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/nimbus.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.service_name, "nimbus");
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    // Env overrides go through apply_env_var directly; the workspace
    // forbids the unsafe blocks that mutating the process environment
    // would need on newer editions.

    #[test]
    fn test_apply_env_var_scalars() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("T__SERVICE_NAME", "orders", "T").unwrap();
        loader.apply_env_var("T__RETRY__MAX_ATTEMPTS", "5", "T").unwrap();
        loader.apply_env_var("T__RATE_LIMIT__ALGORITHM", "token_bucket", "T").unwrap();
        loader.apply_env_var("T__RATE_LIMIT__FAIL_OPEN", "no", "T").unwrap();
        loader.apply_env_var("T__LOAD_SHED__MODE", "priority", "T").unwrap();
        loader.apply_env_var("T__TELEMETRY__LOGGING__FORMAT", "compact", "T").unwrap();

        let config = loader.load_unvalidated();
        assert_eq!(config.service_name, "orders");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.rate_limit.algorithm, Algorithm::TokenBucket);
        assert!(!config.rate_limit.fail_open);
        assert_eq!(config.load_shed.mode, LoadShedModeKind::Priority);
        assert_eq!(config.telemetry.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_apply_env_var_lists_and_options() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("T__MIDDLEWARE_ORDER", "timeout, retry,bulkhead", "T").unwrap();
        loader.apply_env_var("T__RATE_LIMIT__DIMENSIONS", "tenant,header:X-Api-Key", "T").unwrap();
        loader.apply_env_var("T__RETRY__RETRY_CATEGORIES", "timeout,internal", "T").unwrap();
        loader.apply_env_var("T__TIMEOUT__MAX_DURATION_MS", "2500", "T").unwrap();
        loader.apply_env_var("T__CIRCUIT_BREAKER__FAILURE_WINDOW_MS", "none", "T").unwrap();

        let config = loader.load_unvalidated();
        assert_eq!(
            config.middleware_order,
            vec![StageKind::Timeout, StageKind::Retry, StageKind::Bulkhead]
        );
        assert_eq!(
            config.rate_limit.dimensions,
            vec![Dimension::Tenant, Dimension::Header("x-api-key".to_string())]
        );
        assert_eq!(
            config.retry.retry_categories,
            vec![ErrorCategory::Timeout, ErrorCategory::Internal]
        );
        assert_eq!(config.timeout.max_duration_ms, Some(2_500));
        assert_eq!(config.circuit_breaker.failure_window_ms, None);
    }

    #[test]
    fn test_apply_env_var_errors() {
        let mut loader = ConfigLoader::new();
        assert!(loader.apply_env_var("T__BULKHEAD__MAX_CONCURRENT", "lots", "T").is_err());
        assert!(loader.apply_env_var("T__MIDDLEWARE_ORDER", "timeout,auth", "T").is_err());
        assert!(loader.apply_env_var("T__RETRY__MAX_ATEMPTS", "3", "T").is_err());
        assert!(loader.apply_env_var("T__DISPATCHER__EXPOSE_INTERNAL_ERRORS", "sure", "T").is_err());
    }
}
