//! Error types for Nimbus.
//!
//! [`NimbusError`] is the single error type that flows through the
//! classifier, router, pipeline and handlers. Every variant belongs to an
//! [`ErrorCategory`] (used by failure classifiers and configuration) and an
//! [`ErrorOrigin`], which lets the retry and circuit breaker stages tell
//! resilience rejections apart from handler business errors without
//! inspecting handler-specific types.
//!
//! | Origin | Variants |
//! |---|---|
//! | `Framework` | `UnclassifiedPayload`, `RouteNotFound`, `MethodNotAllowed`, `Internal` |
//! | `Resilience` | `CircuitOpen`, `BulkheadFull`, `LoadShed`, `RateLimitExceeded`, `Timeout` |
//! | `Handler` | `Validation`, `Unauthorized`, `Forbidden`, `NotFound`, `Conflict`, `External` |

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::trigger::TriggerKind;

/// Result type alias using [`NimbusError`].
pub type NimbusResult<T> = Result<T, NimbusError>;

/// Message returned to callers in place of internal error details.
pub const INTERNAL_ERROR_MESSAGE: &str = "an internal error occurred";

/// Categories of errors for classification and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Payload matched no sniffer.
    Unclassified,
    /// No route for the path or source.
    RouteNotFound,
    /// Path matched but the method did not.
    MethodNotAllowed,
    /// Circuit breaker rejected the call.
    CircuitOpen,
    /// Bulkhead had no capacity.
    BulkheadFull,
    /// Load shedder rejected the call.
    LoadShed,
    /// Rate limit exceeded.
    RateLimited,
    /// Deadline elapsed.
    Timeout,
    /// Unexpected fault or handler panic.
    Internal,
    /// Handler rejected the input.
    Validation,
    /// Missing or invalid credentials.
    Authentication,
    /// Caller lacks permission.
    Authorization,
    /// Handler could not find a resource.
    NotFound,
    /// Concurrent modification or state conflict.
    Conflict,
    /// Downstream dependency failed.
    External,
}

impl ErrorCategory {
    /// All categories, in declaration order.
    pub const ALL: [ErrorCategory; 15] = [
        Self::Unclassified,
        Self::RouteNotFound,
        Self::MethodNotAllowed,
        Self::CircuitOpen,
        Self::BulkheadFull,
        Self::LoadShed,
        Self::RateLimited,
        Self::Timeout,
        Self::Internal,
        Self::Validation,
        Self::Authentication,
        Self::Authorization,
        Self::NotFound,
        Self::Conflict,
        Self::External,
    ];

    /// Returns the snake_case name used in configuration.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unclassified => "unclassified",
            Self::RouteNotFound => "route_not_found",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::CircuitOpen => "circuit_open",
            Self::BulkheadFull => "bulkhead_full",
            Self::LoadShed => "load_shed",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::External => "external",
        }
    }

    /// Returns the default HTTP status code for this category.
    #[must_use]
    pub const fn default_status_code(&self) -> StatusCode {
        match self {
            Self::Unclassified | Self::Validation => StatusCode::BAD_REQUEST,
            Self::RouteNotFound | Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::CircuitOpen | Self::BulkheadFull | Self::LoadShed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::Conflict => StatusCode::CONFLICT,
            Self::External => StatusCode::BAD_GATEWAY,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| format!("unknown error category: {s}"))
    }
}

/// Which layer produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorOrigin {
    /// Classification, routing or an unexpected fault.
    Framework,
    /// A resilience primitive refused or abandoned the call.
    Resilience,
    /// Returned by user handler code.
    Handler,
}

impl ErrorOrigin {
    /// Returns the snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Framework => "framework",
            Self::Resilience => "resilience",
            Self::Handler => "handler",
        }
    }
}

/// Standard error type for Nimbus.
///
/// # Example
///
/// ```
/// use nimbus_core::{ErrorCategory, NimbusError};
///
/// fn load(id: &str) -> Result<(), NimbusError> {
///     if id.is_empty() {
///         return Err(NimbusError::validation("id cannot be empty"));
///     }
///     Err(NimbusError::not_found(format!("order {id}")))
/// }
///
/// assert_eq!(load("").unwrap_err().category(), ErrorCategory::Validation);
/// ```
#[derive(Error, Debug)]
pub enum NimbusError {
    /// No sniffer recognized the payload.
    #[error("unrecognized payload shape (top-level keys: [{}])", keys.join(", "))]
    UnclassifiedPayload {
        /// Sorted top-level keys of the payload. Values are never recorded.
        keys: Vec<String>,
        /// Which sniffer rejected the payload during normalization, if any.
        reason: Option<String>,
    },

    /// No route matched the envelope.
    #[error("no {kind} route matches '{path}'")]
    RouteNotFound {
        /// Trigger kind of the envelope.
        kind: TriggerKind,
        /// The path or source identifier that failed to match.
        path: String,
    },

    /// The path matched but the method did not.
    #[error("method {method} not allowed for '{path}'")]
    MethodNotAllowed {
        /// The requested path.
        path: String,
        /// The requested method.
        method: String,
        /// Methods that would have been accepted.
        allowed: Vec<String>,
    },

    /// The circuit breaker for the key is open.
    #[error("circuit open for '{key}'")]
    CircuitOpen {
        /// Breaker key.
        key: String,
        /// Milliseconds until a trial call may be admitted.
        retry_after_ms: u64,
    },

    /// The bulkhead for the key had no capacity.
    #[error("bulkhead full for '{key}'")]
    BulkheadFull {
        /// Bulkhead key.
        key: String,
    },

    /// The load shedder rejected the call.
    #[error("request shed: {reason}")]
    LoadShed {
        /// Why the call was shed.
        reason: String,
    },

    /// The rate limit for the key was exceeded.
    #[error("rate limit of {limit} exceeded")]
    RateLimitExceeded {
        /// Composite rate limit key (kept out of client-facing output).
        key: String,
        /// The configured limit.
        limit: u64,
        /// Seconds until the caller may retry.
        retry_after_secs: u64,
    },

    /// The invocation deadline elapsed.
    #[error("timed out: {message}")]
    Timeout {
        /// Human-readable error message.
        message: String,
    },

    /// Unexpected fault. Details are logged, never returned to callers.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// The underlying error (not exposed to clients).
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Handler rejected the input.
    #[error("validation error: {message}")]
    Validation {
        /// Human-readable error message.
        message: String,
    },

    /// Missing or invalid credentials.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Human-readable error message.
        message: String,
    },

    /// Caller lacks permission.
    #[error("forbidden: {message}")]
    Forbidden {
        /// Human-readable error message.
        message: String,
    },

    /// A resource was not found.
    #[error("not found: {message}")]
    NotFound {
        /// Human-readable error message.
        message: String,
    },

    /// State conflict.
    #[error("conflict: {message}")]
    Conflict {
        /// Human-readable error message.
        message: String,
    },

    /// A downstream dependency failed.
    #[error("external service error: {message}")]
    External {
        /// Human-readable error message.
        message: String,
        /// The name of the external service.
        service: Option<String>,
    },
}

impl NimbusError {
    /// Creates an unclassified payload error from the payload's keys.
    #[must_use]
    pub fn unclassified<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        Self::UnclassifiedPayload { keys, reason: None }
    }

    /// Creates a route-not-found error.
    #[must_use]
    pub fn route_not_found(kind: TriggerKind, path: impl Into<String>) -> Self {
        Self::RouteNotFound {
            kind,
            path: path.into(),
        }
    }

    /// Creates a method-not-allowed error.
    #[must_use]
    pub fn method_not_allowed(
        path: impl Into<String>,
        method: impl Into<String>,
        allowed: Vec<String>,
    ) -> Self {
        Self::MethodNotAllowed {
            path: path.into(),
            method: method.into(),
            allowed,
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error with a source error.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an authentication error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates an authorization error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates an external service error.
    #[must_use]
    pub fn external(message: impl Into<String>, service: Option<impl Into<String>>) -> Self {
        Self::External {
            message: message.into(),
            service: service.map(Into::into),
        }
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::UnclassifiedPayload { .. } => ErrorCategory::Unclassified,
            Self::RouteNotFound { .. } => ErrorCategory::RouteNotFound,
            Self::MethodNotAllowed { .. } => ErrorCategory::MethodNotAllowed,
            Self::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            Self::BulkheadFull { .. } => ErrorCategory::BulkheadFull,
            Self::LoadShed { .. } => ErrorCategory::LoadShed,
            Self::RateLimitExceeded { .. } => ErrorCategory::RateLimited,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Internal { .. } => ErrorCategory::Internal,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Unauthorized { .. } => ErrorCategory::Authentication,
            Self::Forbidden { .. } => ErrorCategory::Authorization,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::External { .. } => ErrorCategory::External,
        }
    }

    /// Returns which layer produced the error.
    #[must_use]
    pub const fn origin(&self) -> ErrorOrigin {
        match self {
            Self::UnclassifiedPayload { .. }
            | Self::RouteNotFound { .. }
            | Self::MethodNotAllowed { .. }
            | Self::Internal { .. } => ErrorOrigin::Framework,
            Self::CircuitOpen { .. }
            | Self::BulkheadFull { .. }
            | Self::LoadShed { .. }
            | Self::RateLimitExceeded { .. }
            | Self::Timeout { .. } => ErrorOrigin::Resilience,
            Self::Validation { .. }
            | Self::Unauthorized { .. }
            | Self::Forbidden { .. }
            | Self::NotFound { .. }
            | Self::Conflict { .. }
            | Self::External { .. } => ErrorOrigin::Handler,
        }
    }

    /// Returns true for admission refusals by a resilience primitive.
    ///
    /// Rejections are never retried in place: retrying straight into an
    /// open breaker or a full bulkhead cannot succeed.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. }
                | Self::BulkheadFull { .. }
                | Self::LoadShed { .. }
                | Self::RateLimitExceeded { .. }
        )
    }

    /// Returns true for classification and routing failures, which no
    /// amount of retrying can fix.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::UnclassifiedPayload { .. }
                | Self::RouteNotFound { .. }
                | Self::MethodNotAllowed { .. }
        )
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.category().default_status_code()
    }

    /// Returns the number of seconds a caller should wait, if known.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            Self::CircuitOpen { retry_after_ms, .. } => Some(retry_after_ms.div_ceil(1000)),
            _ => None,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::UnclassifiedPayload { .. } => "UNCLASSIFIED_PAYLOAD",
            Self::RouteNotFound { .. } => "ROUTE_NOT_FOUND",
            Self::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::BulkheadFull { .. } => "BULKHEAD_FULL",
            Self::LoadShed { .. } => "LOAD_SHED",
            Self::RateLimitExceeded { .. } => "RATE_LIMITED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Internal { .. } => "INTERNAL_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Unauthorized { .. } => "AUTHENTICATION_ERROR",
            Self::Forbidden { .. } => "AUTHORIZATION_DENIED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::External { .. } => "EXTERNAL_SERVICE_ERROR",
        }
    }

    /// Converts this error to a serializable envelope.
    ///
    /// Internal errors carry a fixed message unless `expose_internal` is set,
    /// which is meant for local development only.
    #[must_use]
    pub fn to_envelope(&self, trace_id: Option<&str>, expose_internal: bool) -> ErrorEnvelope {
        let message = match self {
            Self::Internal { .. } if !expose_internal => INTERNAL_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        };

        ErrorEnvelope {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message,
                category: self.category(),
                details: self.error_details(),
            },
            trace_id: trace_id.map(ToString::to_string),
        }
    }

    fn error_details(&self) -> Option<serde_json::Value> {
        match self {
            Self::UnclassifiedPayload { keys, .. } => Some(serde_json::json!({ "keys": keys })),
            Self::MethodNotAllowed { allowed, .. } => {
                Some(serde_json::json!({ "allowed": allowed }))
            }
            Self::CircuitOpen { retry_after_ms, .. } => {
                Some(serde_json::json!({ "retry_after_ms": retry_after_ms }))
            }
            Self::RateLimitExceeded {
                limit,
                retry_after_secs,
                ..
            } => Some(serde_json::json!({
                "limit": limit,
                "retry_after_seconds": retry_after_secs
            })),
            Self::External {
                service: Some(svc), ..
            } => Some(serde_json::json!({ "service": svc })),
            _ => None,
        }
    }
}

/// Serializable error envelope returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error details.
    pub error: ErrorDetail,
    /// The trace ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Error detail within an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Error category.
    pub category: ErrorCategory,
    /// Additional error details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
