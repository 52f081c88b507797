//! The normalized envelope every trigger payload is reduced to.
//!
//! Routing and middleware only ever see a [`NormalizedEnvelope`]; the raw
//! payload shape is the classifier's concern.

use bytes::Bytes;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::NimbusError;
use crate::trigger::TriggerKind;

/// Separator used when a header carries several values.
pub const HEADER_VALUE_SEPARATOR: &str = ", ";

/// Synthetic method used for event triggers that have no verb.
pub const EVENT_METHOD: &str = "EVENT";

/// Ordered header map with case-insensitive keys.
///
/// Keys are stored lower-cased. Repeated headers are folded into a single
/// value joined with [`HEADER_VALUE_SEPARATOR`].
///
/// # Example
///
/// ```
/// use nimbus_core::Headers;
///
/// let mut headers = Headers::new();
/// headers.append("Accept", "text/html");
/// headers.append("accept", "application/json");
/// assert_eq!(headers.get("ACCEPT"), Some("text/html, application/json"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: IndexMap<String, String>,
}

impl Headers {
    /// Creates an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header, replacing any previous value.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.inner
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Adds a value, joining it to any existing value.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl AsRef<str>) {
        let key = name.as_ref().to_ascii_lowercase();
        match self.inner.get_mut(&key) {
            Some(existing) => {
                existing.push_str(HEADER_VALUE_SEPARATOR);
                existing.push_str(value.as_ref());
            }
            None => {
                self.inner.insert(key, value.as_ref().to_string());
            }
        }
    }

    /// Returns the (possibly joined) value of a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns the individual values of a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.get(name)
            .map(|v| v.split(HEADER_VALUE_SEPARATOR).collect())
            .unwrap_or_default()
    }

    /// Returns true if the header is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&name.to_ascii_lowercase())
    }

    /// Removes a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.inner.shift_remove(&name.to_ascii_lowercase())
    }

    /// Iterates headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of distinct headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

/// A trigger payload reduced to the fields routing and handlers need.
///
/// Equality is structural over every field.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEnvelope {
    kind: TriggerKind,
    method: String,
    path: String,
    headers: Headers,
    query: IndexMap<String, String>,
    body: Bytes,
    metadata: Map<String, Value>,
}

impl NormalizedEnvelope {
    /// Starts building an envelope of the given kind.
    ///
    /// The method defaults to [`EVENT_METHOD`].
    #[must_use]
    pub fn builder(kind: TriggerKind) -> EnvelopeBuilder {
        EnvelopeBuilder {
            kind,
            method: EVENT_METHOD.to_string(),
            path: String::new(),
            headers: Headers::new(),
            query: IndexMap::new(),
            body: Bytes::new(),
            metadata: Map::new(),
        }
    }

    /// Returns the trigger kind.
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        self.kind
    }

    /// Returns the method, socket event type or [`EVENT_METHOD`].
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the path or source identifier.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns the query string parameters or event attributes.
    #[must_use]
    pub const fn query(&self) -> &IndexMap<String, String> {
        &self.query
    }

    /// Returns a single query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Returns the raw body bytes.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the body as UTF-8 text, if it is valid.
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Deserializes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the body is not valid JSON for `T`.
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, NimbusError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| NimbusError::validation(format!("invalid JSON body: {e}")))
    }

    /// Returns the metadata map.
    #[must_use]
    pub const fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Returns a single metadata value.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

/// Builder for [`NormalizedEnvelope`].
#[derive(Debug, Clone)]
#[must_use]
pub struct EnvelopeBuilder {
    kind: TriggerKind,
    method: String,
    path: String,
    headers: Headers,
    query: IndexMap<String, String>,
    body: Bytes,
    metadata: Map<String, Value>,
}

impl EnvelopeBuilder {
    /// Sets the method. Stored upper-cased.
    pub fn method(mut self, method: impl AsRef<str>) -> Self {
        self.method = method.as_ref().trim().to_ascii_uppercase();
        self
    }

    /// Sets the path or source identifier.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Appends a header value.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replaces all headers.
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a query parameter or event attribute.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Sets the body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Builds the envelope.
    ///
    /// # Errors
    ///
    /// Returns a validation error if no path was set.
    pub fn build(self) -> Result<NormalizedEnvelope, NimbusError> {
        if self.path.is_empty() {
            return Err(NimbusError::validation(format!(
                "{} envelope requires a non-empty path",
                self.kind
            )));
        }
        Ok(NormalizedEnvelope {
            kind: self.kind,
            method: self.method,
            path: self.path,
            headers: self.headers,
            query: self.query,
            body: self.body,
            metadata: self.metadata,
        })
    }
}
