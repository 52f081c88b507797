//! Test response with assertion helpers.

use nimbus_core::Response;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::TestError;

/// A dispatcher response wrapped for assertions.
///
/// Every assertion returns `&Self` so checks chain:
///
/// ```
/// use nimbus_core::Response;
/// use nimbus_test::TestResponse;
/// use serde_json::json;
///
/// let response = TestResponse::new(Response::json(&json!({ "user": { "id": 7 } })).unwrap());
/// response
///     .assert_success()
///     .assert_json_field("user.id", &json!(7));
/// ```
#[derive(Debug, Clone)]
pub struct TestResponse {
    inner: Response,
}

impl TestResponse {
    /// Wraps a response.
    #[must_use]
    pub const fn new(inner: Response) -> Self {
        Self { inner }
    }

    /// Returns the status code as a number.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.inner.status().as_u16()
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.inner.is_success()
    }

    /// Returns true for 4xx statuses.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.inner.status().is_client_error()
    }

    /// Returns true for 5xx statuses.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.inner.status().is_server_error()
    }

    /// Gets a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers().get(name)
    }

    /// Returns the body.
    #[must_use]
    pub fn body(&self) -> &Value {
        self.inner.body()
    }

    /// Deserializes the body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TestError> {
        Ok(T::deserialize(self.inner.body())?)
    }

    /// Returns the `error.code` of an error envelope body.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        json_path(self.inner.body(), "error.code").and_then(Value::as_str)
    }

    /// Returns the wrapped response.
    #[must_use]
    pub const fn inner(&self) -> &Response {
        &self.inner
    }

    /// Consumes the wrapper, returning the response.
    #[must_use]
    pub fn into_inner(self) -> Response {
        self.inner
    }

    /// Asserts the status code.
    ///
    /// # Panics
    ///
    /// Panics if the status does not match.
    #[track_caller]
    pub fn assert_status_code(&self, expected: u16) -> &Self {
        assert_eq!(
            self.status_code(),
            expected,
            "Expected status {}, got {}. Body: {}",
            expected,
            self.status_code(),
            self.inner.body()
        );
        self
    }

    /// Asserts a 2xx status.
    ///
    /// # Panics
    ///
    /// Panics if the status is not 2xx.
    #[track_caller]
    pub fn assert_success(&self) -> &Self {
        assert!(
            self.is_success(),
            "Expected success status, got {}. Body: {}",
            self.status_code(),
            self.inner.body()
        );
        self
    }

    /// Asserts a header value.
    ///
    /// # Panics
    ///
    /// Panics if the header is missing or differs.
    #[track_caller]
    pub fn assert_header(&self, name: &str, expected: &str) -> &Self {
        let actual = self.header(name);
        assert_eq!(
            actual,
            Some(expected),
            "Expected header '{name}' to be '{expected}', got {actual:?}"
        );
        self
    }

    /// Asserts a header is present.
    ///
    /// # Panics
    ///
    /// Panics if the header is missing.
    #[track_caller]
    pub fn assert_header_exists(&self, name: &str) -> &Self {
        assert!(
            self.inner.headers().contains(name),
            "Expected header '{name}' to exist"
        );
        self
    }

    /// Asserts the whole body.
    ///
    /// # Panics
    ///
    /// Panics if the body differs.
    #[track_caller]
    pub fn assert_json_eq(&self, expected: &Value) -> &Self {
        assert_eq!(self.inner.body(), expected, "JSON body mismatch");
        self
    }

    /// Asserts a field addressed by a dotted path such as `items.0.name`.
    ///
    /// # Panics
    ///
    /// Panics if the field is missing or differs.
    #[track_caller]
    pub fn assert_json_field(&self, path: &str, expected: &Value) -> &Self {
        let actual = json_path(self.inner.body(), path);
        assert_eq!(
            actual,
            Some(expected),
            "JSON field '{path}' mismatch. Body: {}",
            self.inner.body()
        );
        self
    }

    /// Asserts the error envelope code.
    ///
    /// # Panics
    ///
    /// Panics if the body is not an error envelope with this code.
    #[track_caller]
    pub fn assert_error_code(&self, expected: &str) -> &Self {
        assert_eq!(
            self.error_code(),
            Some(expected),
            "Expected error code '{expected}'. Body: {}",
            self.inner.body()
        );
        self
    }
}

impl From<Response> for TestResponse {
    fn from(inner: Response) -> Self {
        Self::new(inner)
    }
}

fn json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match segment.parse::<usize>() {
            Ok(index) => current.get(index)?,
            Err(_) => current.get(segment)?,
        };
    }
    Some(current)
}
