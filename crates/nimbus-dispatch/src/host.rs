//! What the hosting runtime tells us about an invocation.

use std::time::Duration;

/// Per-invocation facts supplied by the host, alongside the raw payload.
///
/// Everything is optional: a missing budget falls back to the dispatcher's
/// default, a missing trace id is taken from the payload headers or
/// generated.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use nimbus_dispatch::HostInvocation;
///
/// let host = HostInvocation::new()
///     .with_remaining(Duration::from_secs(3))
///     .with_request_id("c6af9ac6-7b61-11e6-9a41-93e8deadbeef");
/// assert_eq!(host.remaining(), Some(Duration::from_secs(3)));
/// assert!(host.trace_id().is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostInvocation {
    remaining: Option<Duration>,
    trace_id: Option<String>,
    request_id: Option<String>,
}

impl HostInvocation {
    /// Creates an empty host description.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the time the host will let the invocation run.
    #[must_use]
    pub fn with_remaining(mut self, remaining: Duration) -> Self {
        self.remaining = Some(remaining);
        self
    }

    /// Sets the trace id propagated by the host.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Sets the host's request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Returns the remaining time, if reported.
    #[must_use]
    pub const fn remaining(&self) -> Option<Duration> {
        self.remaining
    }

    /// Returns the host trace id.
    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Returns the host request id.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}
