//! Deadline guard.

use std::future::Future;
use std::time::Duration;

use nimbus_core::NimbusError;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Timeout configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Upper bound on an invocation, applied on top of the host deadline.
    pub max_duration: Option<Duration>,
}

impl TimeoutConfig {
    /// Returns the effective deadline: the earlier of `deadline` and
    /// `now + max_duration`.
    #[must_use]
    pub fn effective_deadline(&self, deadline: Instant) -> Instant {
        self.max_duration
            .map_or(deadline, |max| deadline.min(Instant::now() + max))
    }
}

/// Runs `fut` until `deadline`, dropping it if the deadline passes first.
///
/// # Errors
///
/// Returns [`NimbusError::Timeout`] if the deadline passes.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use nimbus_resilience::run_until;
/// use tokio::time::Instant;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let deadline = Instant::now() + Duration::from_millis(10);
/// let result = run_until(deadline, tokio::time::sleep(Duration::from_secs(5))).await;
/// assert!(result.is_err());
/// # }
/// ```
pub async fn run_until<F: Future>(deadline: Instant, fut: F) -> Result<F::Output, NimbusError> {
    let started = Instant::now();
    tokio::time::timeout_at(deadline, fut).await.map_err(|_| {
        NimbusError::timeout(format!(
            "deadline exceeded after {}ms",
            started.elapsed().as_millis()
        ))
    })
}
