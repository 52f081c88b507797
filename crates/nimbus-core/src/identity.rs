//! Authenticated caller identity.
//!
//! An authenticator populates the [`Principal`] before the pipeline runs;
//! rate limiting reads the caller and tenant dimensions from it.

use serde::{Deserialize, Serialize};

/// The authenticated caller of an invocation.
///
/// # Example
///
/// ```rust
/// use nimbus_core::Principal;
///
/// let principal = Principal::user("u-1").with_tenant("acme").with_roles(["admin"]);
/// assert_eq!(principal.log_id(), "user:u-1");
/// assert_eq!(principal.tenant(), Some("acme"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Principal {
    /// An end user.
    User {
        /// User identifier.
        user_id: String,
        /// Tenant the user belongs to.
        tenant_id: Option<String>,
        /// Granted roles.
        #[serde(default)]
        roles: Vec<String>,
    },
    /// Another service.
    Service {
        /// Service identifier.
        service_id: String,
        /// Tenant the service acts for.
        tenant_id: Option<String>,
    },
    /// An API key holder.
    ApiKey {
        /// Key identifier (never the secret).
        key_id: String,
        /// Tenant owning the key.
        tenant_id: Option<String>,
        /// Granted scopes.
        #[serde(default)]
        scopes: Vec<String>,
    },
}

impl Principal {
    /// Creates a user principal.
    #[must_use]
    pub fn user(user_id: impl Into<String>) -> Self {
        Self::User {
            user_id: user_id.into(),
            tenant_id: None,
            roles: Vec::new(),
        }
    }

    /// Creates a service principal.
    #[must_use]
    pub fn service(service_id: impl Into<String>) -> Self {
        Self::Service {
            service_id: service_id.into(),
            tenant_id: None,
        }
    }

    /// Creates an API key principal.
    #[must_use]
    pub fn api_key(key_id: impl Into<String>) -> Self {
        Self::ApiKey {
            key_id: key_id.into(),
            tenant_id: None,
            scopes: Vec::new(),
        }
    }

    /// Sets the tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        match &mut self {
            Self::User { tenant_id, .. }
            | Self::Service { tenant_id, .. }
            | Self::ApiKey { tenant_id, .. } => *tenant_id = Some(tenant.into()),
        }
        self
    }

    /// Sets roles (users) or scopes (API keys). Ignored for services.
    #[must_use]
    pub fn with_roles<I, S>(mut self, granted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let granted: Vec<String> = granted.into_iter().map(Into::into).collect();
        match &mut self {
            Self::User { roles, .. } => *roles = granted,
            Self::ApiKey { scopes, .. } => *scopes = granted,
            Self::Service { .. } => {}
        }
        self
    }

    /// Returns the caller identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::User { user_id, .. } => user_id,
            Self::Service { service_id, .. } => service_id,
            Self::ApiKey { key_id, .. } => key_id,
        }
    }

    /// Returns the tenant, if known.
    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        match self {
            Self::User { tenant_id, .. }
            | Self::Service { tenant_id, .. }
            | Self::ApiKey { tenant_id, .. } => tenant_id.as_deref(),
        }
    }

    /// Returns a string identifier suitable for logging.
    ///
    /// Never contains secrets.
    #[must_use]
    pub fn log_id(&self) -> String {
        match self {
            Self::User { user_id, .. } => format!("user:{user_id}"),
            Self::Service { service_id, .. } => format!("service:{service_id}"),
            Self::ApiKey { key_id, .. } => format!("apikey:{key_id}"),
        }
    }

    /// Returns roles, with API key scopes treated as roles.
    #[must_use]
    pub fn roles(&self) -> Vec<&str> {
        match self {
            Self::User { roles, .. } => roles.iter().map(String::as_str).collect(),
            Self::ApiKey { scopes, .. } => scopes.iter().map(String::as_str).collect(),
            Self::Service { service_id, .. } => vec![service_id.as_str()],
        }
    }
}
