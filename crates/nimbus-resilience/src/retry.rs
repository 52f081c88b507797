//! Retry policy with capped exponential backoff and jitter.
//!
//! The policy only decides; the retry middleware owns the loop and re-runs
//! the downstream chain.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use nimbus_core::{InvocationContext, NimbusError};
use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

use crate::classifier::{CategoryClassifier, FailureClassifier};

/// Decides whether and when a failed attempt is retried.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    classifier: Arc<dyn FailureClassifier>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` total attempts.
    ///
    /// Defaults: 100ms base delay, 5s cap, retrying timeouts and external
    /// errors.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            classifier: Arc::new(CategoryClassifier::retry_default()),
        }
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets which errors are retryable.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Returns the total number of attempts allowed.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns `min(max_delay, base_delay * 2^retry_index)`, before jitter.
    #[must_use]
    pub fn backoff(&self, retry_index: u32) -> Duration {
        2_u32
            .checked_pow(retry_index)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Returns the backoff scaled by a uniform factor in `[0.5, 1.5)`.
    pub fn jittered<R: Rng + ?Sized>(&self, retry_index: u32, rng: &mut R) -> Duration {
        self.backoff(retry_index).mul_f64(rng.gen_range(0.5..1.5))
    }

    /// Returns true if the error may be retried at all.
    ///
    /// Resilience rejections and routing failures never are.
    #[must_use]
    pub fn is_retryable(&self, error: &NimbusError) -> bool {
        !error.is_rejection() && !error.is_terminal() && self.classifier.is_failure(error)
    }

    /// Returns the delay before the next attempt, or `None` to give up.
    ///
    /// `attempt` is the 1-based number of the attempt that just failed.
    /// Gives up when attempts are exhausted, the error is not retryable, the
    /// invocation is cancelled, or the delay would reach the deadline.
    pub fn next_delay(
        &self,
        attempt: u32,
        error: &NimbusError,
        ctx: &InvocationContext,
    ) -> Option<Duration> {
        if attempt >= self.max_attempts {
            debug!(trace_id = ctx.trace_id(), attempt, "retry attempts exhausted");
            return None;
        }
        if !self.is_retryable(error) {
            return None;
        }
        if ctx.is_cancelled() {
            debug!(trace_id = ctx.trace_id(), attempt, "not retrying cancelled invocation");
            return None;
        }
        let delay = self.jittered(attempt - 1, &mut rand::thread_rng());
        if Instant::now() + delay >= ctx.deadline() {
            debug!(trace_id = ctx.trace_id(), attempt, ?delay, "retry would cross deadline");
            return None;
        }
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::{NormalizedEnvelope, TriggerKind};

    fn ctx(budget: Duration) -> InvocationContext {
        let envelope = NormalizedEnvelope::builder(TriggerKind::BatchMessage)
            .path("orders")
            .build()
            .unwrap();
        InvocationContext::with_budget(envelope, budget)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(1000));
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_millis(1000));
        assert_eq!(policy.backoff(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(3).with_base_delay(Duration::from_millis(100));
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let d = policy.jittered(1, &mut rng);
            assert!(d >= Duration::from_millis(100) && d < Duration::from_millis(300));
        }
    }

    #[tokio::test]
    async fn test_rejections_and_terminal_errors_not_retried() {
        let policy = RetryPolicy::new(5);
        let ctx = ctx(Duration::from_secs(60));
        for error in [
            NimbusError::CircuitOpen { key: "k".into(), retry_after_ms: 0 },
            NimbusError::BulkheadFull { key: "k".into() },
            NimbusError::LoadShed { reason: "busy".into() },
            NimbusError::RateLimitExceeded { key: "k".into(), limit: 1, retry_after_secs: 1 },
            NimbusError::unclassified(["x"]),
        ] {
            assert!(policy.next_delay(1, &error, &ctx).is_none(), "{error}");
        }
        assert!(policy.next_delay(1, &NimbusError::timeout("slow"), &ctx).is_some());
    }

    #[tokio::test]
    async fn test_attempts_exhausted() {
        let policy = RetryPolicy::new(2).with_base_delay(Duration::from_millis(1));
        let ctx = ctx(Duration::from_secs(60));
        let error = NimbusError::external("down", Some("billing"));
        assert!(policy.next_delay(1, &error, &ctx).is_some());
        assert!(policy.next_delay(2, &error, &ctx).is_none());
    }

    #[tokio::test]
    async fn test_deadline_and_cancellation_stop_retries() {
        let policy = RetryPolicy::new(5).with_base_delay(Duration::from_secs(1));
        let error = NimbusError::timeout("slow");

        let short = ctx(Duration::from_millis(100));
        assert!(policy.next_delay(1, &error, &short).is_none());

        let long = ctx(Duration::from_secs(60));
        long.cancel();
        assert!(policy.next_delay(1, &error, &long).is_none());
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        let policy = RetryPolicy::new(3)
            .with_classifier(Arc::new(|e: &NimbusError| matches!(e, NimbusError::Conflict { .. })));
        let ctx = ctx(Duration::from_secs(60));
        assert!(policy.next_delay(1, &NimbusError::conflict("stale"), &ctx).is_some());
        assert!(policy.next_delay(1, &NimbusError::timeout("slow"), &ctx).is_none());
    }
}
