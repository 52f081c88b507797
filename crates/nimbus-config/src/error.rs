//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Why a configuration layer could not be loaded or validated.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("config file {} does not exist", .path.display())]
    Missing {
        /// Requested path.
        path: PathBuf,
    },

    /// The file exists but could not be read.
    #[error("could not read config file {}", .path.display())]
    Io {
        /// Path that failed.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A TOML layer did not parse.
    #[error("invalid TOML layer: {0}")]
    Toml(#[from] toml::de::Error),

    /// A layer did not deserialize, usually because of an unknown field.
    #[error("invalid config layer: {0}")]
    Json(#[from] serde_json::Error),

    /// A merged value is out of range.
    #[error("{field}: {reason}")]
    Invalid {
        /// Dotted path of the field.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An environment override could not be applied.
    #[error("environment override {var}: {reason}")]
    Env {
        /// Variable name.
        var: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The layer format is neither TOML nor JSON.
    #[error("unsupported config format `{0}`")]
    UnsupportedFormat(String),

    /// A dotenv file could not be loaded.
    #[error("dotenv: {0}")]
    Dotenv(#[from] dotenvy::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn env(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Env {
            var: var.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_names_field() {
        let err = ConfigError::invalid("bulkhead.max_concurrent", "must be at least 1");
        assert_eq!(err.to_string(), "bulkhead.max_concurrent: must be at least 1");
    }

    #[test]
    fn test_env_names_variable() {
        let err = ConfigError::env("NIMBUS__RETRY__MAX_ATTEMPTS", "expected integer");
        assert_eq!(
            err.to_string(),
            "environment override NIMBUS__RETRY__MAX_ATTEMPTS: expected integer"
        );
    }

    #[test]
    fn test_missing_shows_path() {
        let err = ConfigError::Missing {
            path: "/etc/nimbus/nimbus.toml".into(),
        };
        assert!(err.to_string().contains("/etc/nimbus/nimbus.toml"));
    }
}
