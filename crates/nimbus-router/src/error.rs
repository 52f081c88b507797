//! Router error types.

use thiserror::Error;

/// Errors raised while registering routes.
///
/// All of these are configuration-time failures; lookups never produce them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The path template could not be parsed.
    #[error("invalid path template '{template}': {reason}")]
    InvalidTemplate {
        /// The offending template.
        template: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The same template and method were registered twice.
    #[error("duplicate route: {method} {template}")]
    Duplicate {
        /// The template that already exists.
        template: String,
        /// The method that is already bound.
        method: String,
    },

    /// Two templates reach the same node with different parameter names.
    #[error("template '{template}' conflicts with '{existing}': parameter names differ")]
    ParamConflict {
        /// The template being inserted.
        template: String,
        /// The template already registered at that position.
        existing: String,
    },

    /// A source pattern could not be compiled.
    #[error("invalid source pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An identical source pattern is already registered.
    #[error("duplicate source pattern: {pattern}")]
    DuplicatePattern {
        /// The repeated pattern.
        pattern: String,
    },
}

impl RouteError {
    pub(crate) fn invalid_template(template: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            template: template.to_string(),
            reason: reason.into(),
        }
    }
}

/// Outcome of a failed path lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// No template matches the path.
    #[error("no route matches the path")]
    NotFound,

    /// At least one template matches, but none accepts the method.
    #[error("method not allowed; allowed: {}", allowed.join(", "))]
    MethodNotAllowed {
        /// Methods accepted by the matching templates, in registration order.
        allowed: Vec<String>,
    },
}
