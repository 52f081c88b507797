//! Rate limit keys.
//!
//! A key is built from one or more dimensions of the invocation, joined with
//! `|`. Routes limited per caller use `[Caller]`; a global quota uses
//! `[Global]`.

use std::fmt;
use std::str::FromStr;

use nimbus_core::InvocationContext;
use serde::{Deserialize, Serialize};

/// One part of a rate limit key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Dimension {
    /// The same value for every invocation.
    Global,
    /// The authenticated principal, else the forwarded client address.
    Caller,
    /// The principal's tenant, else the `x-tenant-id` header.
    Tenant,
    /// The matched route, else the raw path.
    Route,
    /// The value of a header.
    Header(String),
}

impl Dimension {
    /// Extracts this dimension's value from the context.
    #[must_use]
    pub fn value(&self, ctx: &InvocationContext) -> String {
        let envelope = ctx.envelope();
        match self {
            Self::Global => "global".to_string(),
            Self::Caller => ctx
                .principal()
                .map(|p| p.log_id())
                .or_else(|| {
                    envelope
                        .header("x-forwarded-for")
                        .and_then(|v| v.split(',').next())
                        .map(|v| v.trim().to_string())
                })
                .unwrap_or_else(|| "anonymous".to_string()),
            Self::Tenant => ctx
                .principal()
                .and_then(|p| p.tenant())
                .or_else(|| envelope.header("x-tenant-id"))
                .unwrap_or("none")
                .to_string(),
            Self::Route => ctx.route_id().unwrap_or(envelope.path()).to_string(),
            Self::Header(name) => envelope.header(name).unwrap_or("-").to_string(),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Caller => f.write_str("caller"),
            Self::Tenant => f.write_str("tenant"),
            Self::Route => f.write_str("route"),
            Self::Header(name) => write!(f, "header:{name}"),
        }
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "caller" => Ok(Self::Caller),
            "tenant" => Ok(Self::Tenant),
            "route" => Ok(Self::Route),
            other => match other.strip_prefix("header:") {
                Some(name) if !name.is_empty() => Ok(Self::Header(name.to_ascii_lowercase())),
                _ => Err(format!("unknown rate limit dimension: {other}")),
            },
        }
    }
}

impl TryFrom<String> for Dimension {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Dimension> for String {
    fn from(value: Dimension) -> Self {
        value.to_string()
    }
}

/// Computes the rate limit key for an invocation.
///
/// Returning `None` exempts the invocation from the limit.
pub trait KeyFunc: Send + Sync {
    /// Returns the key, or `None` to skip limiting.
    fn key(&self, ctx: &InvocationContext) -> Option<String>;
}

impl<F> KeyFunc for F
where
    F: Fn(&InvocationContext) -> Option<String> + Send + Sync,
{
    fn key(&self, ctx: &InvocationContext) -> Option<String> {
        self(ctx)
    }
}

/// A key built from a list of dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionKey {
    dimensions: Vec<Dimension>,
}

impl DimensionKey {
    /// Creates a key from dimensions. An empty list behaves as `[Global]`.
    #[must_use]
    pub fn new(dimensions: Vec<Dimension>) -> Self {
        if dimensions.is_empty() {
            Self {
                dimensions: vec![Dimension::Global],
            }
        } else {
            Self { dimensions }
        }
    }

    /// Keys by caller.
    #[must_use]
    pub fn caller() -> Self {
        Self::new(vec![Dimension::Caller])
    }

    /// Returns the dimensions.
    #[must_use]
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }
}

impl KeyFunc for DimensionKey {
    fn key(&self, ctx: &InvocationContext) -> Option<String> {
        let parts: Vec<String> = self.dimensions.iter().map(|d| d.value(ctx)).collect();
        Some(parts.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::{NormalizedEnvelope, Params, Principal, TriggerKind};
    use std::time::Duration;

    fn ctx(headers: &[(&str, &str)]) -> InvocationContext {
        let mut builder = NormalizedEnvelope::builder(TriggerKind::RequestResponse)
            .method("GET")
            .path("/users/42");
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        InvocationContext::with_budget(builder.build().unwrap(), Duration::from_secs(1))
    }

    #[test]
    fn test_caller_prefers_principal() {
        let mut ctx = ctx(&[("x-forwarded-for", "10.0.0.1, 10.0.0.2")]);
        assert_eq!(Dimension::Caller.value(&ctx), "10.0.0.1");

        ctx.set_principal(Principal::user("u-1"));
        assert_eq!(Dimension::Caller.value(&ctx), "user:u-1");
    }

    #[test]
    fn test_fallbacks() {
        let ctx = ctx(&[]);
        assert_eq!(Dimension::Caller.value(&ctx), "anonymous");
        assert_eq!(Dimension::Tenant.value(&ctx), "none");
        assert_eq!(Dimension::Route.value(&ctx), "/users/42");
        assert_eq!(Dimension::Header("x-api-key".into()).value(&ctx), "-");
    }

    #[test]
    fn test_route_and_tenant() {
        let mut ctx = ctx(&[("x-tenant-id", "acme")]).with_route("getUser", Params::new());
        assert_eq!(Dimension::Route.value(&ctx), "getUser");
        assert_eq!(Dimension::Tenant.value(&ctx), "acme");

        ctx.set_principal(Principal::service("billing").with_tenant("globex"));
        assert_eq!(Dimension::Tenant.value(&ctx), "globex");
    }

    #[test]
    fn test_dimension_key_joins_parts() {
        let ctx = ctx(&[("x-api-key", "k1")]).with_route("getUser", Params::new());
        let key = DimensionKey::new(vec![
            Dimension::Route,
            "header:X-Api-Key".parse().unwrap(),
        ]);
        assert_eq!(key.key(&ctx).as_deref(), Some("getUser|k1"));
        assert_eq!(DimensionKey::new(vec![]).key(&ctx).as_deref(), Some("global"));
    }

    #[test]
    fn test_parse_round_trip() {
        for text in ["global", "caller", "tenant", "route", "header:x-a"] {
            let dim: Dimension = text.parse().unwrap();
            assert_eq!(dim.to_string(), text);
        }
        assert!("header:".parse::<Dimension>().is_err());
        assert!("ip".parse::<Dimension>().is_err());
    }

    #[test]
    fn test_dimensions_deserialize_from_config_strings() {
        let dims: Vec<Dimension> =
            serde_json::from_str(r#"["tenant", "header:X-Api-Key"]"#).unwrap();
        assert_eq!(dims, vec![Dimension::Tenant, Dimension::Header("x-api-key".into())]);
        assert!(serde_json::from_str::<Dimension>(r#""ip""#).is_err());
    }
}
