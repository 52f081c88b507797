//! Test error types.

use nimbus_dispatch::BuildError;
use thiserror::Error;

/// Errors that can occur during testing.
#[derive(Debug, Error)]
pub enum TestError {
    /// The dispatcher under test could not be built.
    #[error("dispatcher build error: {0}")]
    Build(#[from] BuildError),
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
