//! Caller authentication.
//!
//! The dispatcher asks its [`Authenticator`] for a [`Principal`] after the
//! route is resolved and before the pipeline runs, so rate limiting can key
//! on the caller.

use nimbus_core::{NimbusError, NimbusResult, NormalizedEnvelope, Principal};

/// Header carrying a JSON-encoded [`Principal`] set by a trusted front proxy.
pub const CALLER_IDENTITY_HEADER: &str = "x-caller-identity";

/// Derives the caller from an envelope.
///
/// Returning `Ok(None)` runs the invocation anonymously. Returning an error
/// stops it before the pipeline.
pub trait Authenticator: Send + Sync + 'static {
    /// Authenticates the caller.
    fn authenticate(&self, envelope: &NormalizedEnvelope) -> NimbusResult<Option<Principal>>;
}

impl<F> Authenticator for F
where
    F: Fn(&NormalizedEnvelope) -> NimbusResult<Option<Principal>> + Send + Sync + 'static,
{
    fn authenticate(&self, envelope: &NormalizedEnvelope) -> NimbusResult<Option<Principal>> {
        self(envelope)
    }
}

/// Leaves every invocation anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthenticator;

impl Authenticator for NoAuthenticator {
    fn authenticate(&self, _envelope: &NormalizedEnvelope) -> NimbusResult<Option<Principal>> {
        Ok(None)
    }
}

/// Reads the principal from a JSON header.
///
/// Only use this behind a proxy that strips the header from untrusted
/// traffic.
///
/// # Example
///
/// ```
/// use nimbus_core::{NormalizedEnvelope, Principal, TriggerKind};
/// use nimbus_dispatch::{Authenticator, HeaderIdentity};
///
/// let envelope = NormalizedEnvelope::builder(TriggerKind::RequestResponse)
///     .method("GET")
///     .path("/me")
///     .header("x-caller-identity", r#"{"type":"user","user_id":"u-1","tenant_id":"acme"}"#)
///     .build()
///     .unwrap();
///
/// let principal = HeaderIdentity::default().authenticate(&envelope).unwrap();
/// assert_eq!(principal, Some(Principal::user("u-1").with_tenant("acme")));
/// ```
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    header: String,
    required: bool,
}

impl Default for HeaderIdentity {
    fn default() -> Self {
        Self::new(CALLER_IDENTITY_HEADER)
    }
}

impl HeaderIdentity {
    /// Reads the principal from `header`.
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            required: false,
        }
    }

    /// Rejects invocations that carry no identity header.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

impl Authenticator for HeaderIdentity {
    fn authenticate(&self, envelope: &NormalizedEnvelope) -> NimbusResult<Option<Principal>> {
        let Some(raw) = envelope.header(&self.header) else {
            if self.required {
                return Err(NimbusError::unauthorized("missing caller identity"));
            }
            return Ok(None);
        };
        serde_json::from_str(raw)
            .map(Some)
            .map_err(|_| NimbusError::unauthorized("malformed caller identity"))
    }
}
