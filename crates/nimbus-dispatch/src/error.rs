//! Dispatcher build errors.
//!
//! Everything here is raised while assembling a [`Dispatcher`](crate::Dispatcher);
//! once built, a dispatcher only ever reports [`NimbusError`](nimbus_core::NimbusError)s.

use nimbus_config::ConfigError;
use nimbus_core::{ClassifierError, TriggerKind};
use nimbus_router::RouteError;
use thiserror::Error;

/// Errors raised while registering routes or building a dispatcher.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The route's template or pattern was rejected by the router.
    #[error("route '{id}': {source}")]
    Route {
        /// The offending route id.
        id: String,
        /// The router error.
        #[source]
        source: RouteError,
    },

    /// Two routes share an id.
    #[error("duplicate route id: {0}")]
    DuplicateRouteId(String),

    /// The route's matcher does not fit its trigger kind.
    #[error("route '{id}': {kind} routes must be addressed by {expected}")]
    KindMismatch {
        /// The offending route id.
        id: String,
        /// The route's trigger kind.
        kind: TriggerKind,
        /// The matcher this kind requires.
        expected: &'static str,
    },

    /// The sniffer order names an unknown or repeated sniffer.
    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BuildError {
    pub(crate) fn route(id: &str, source: RouteError) -> Self {
        Self::Route {
            id: id.to_string(),
            source,
        }
    }
}
