//! Raw payload builders.
//!
//! Each builder produces the JSON a host would hand the function for one
//! trigger kind, with just the fields the classifier reads plus the usual
//! surrounding noise.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Anything the harness can invoke with.
pub trait IntoPayload {
    /// Produces the raw payload.
    fn into_payload(self) -> Value;
}

impl IntoPayload for Value {
    fn into_payload(self) -> Value {
        self
    }
}

impl IntoPayload for &Value {
    fn into_payload(self) -> Value {
        self.clone()
    }
}

/// Gateway payload format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadVersion {
    /// REST-style payload with `httpMethod` and `path`.
    V1,
    /// HTTP-API payload with `rawPath` and `requestContext.http`.
    #[default]
    V2,
}

/// An HTTP request as delivered by an API gateway.
///
/// # Example
///
/// ```
/// use nimbus_test::{HttpRequest, IntoPayload};
///
/// let raw = HttpRequest::post("/users")
///     .header("authorization", "Bearer t")
///     .query("dry_run", "true")
///     .json(&serde_json::json!({ "name": "Ada" }))
///     .into_payload();
/// assert_eq!(raw["requestContext"]["http"]["method"], "POST");
/// assert_eq!(raw["rawQueryString"], "dry_run=true");
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct HttpRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: Option<String>,
    base64: bool,
    source_ip: String,
    version: PayloadVersion,
}

impl HttpRequest {
    /// Creates a request with any method.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            base64: false,
            source_ip: "203.0.113.10".to_string(),
            version: PayloadVersion::default(),
        }
    }

    /// Creates a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    /// Creates a POST request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    /// Creates a PUT request.
    pub fn put(path: impl Into<String>) -> Self {
        Self::new("PUT", path)
    }

    /// Creates a PATCH request.
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new("PATCH", path)
    }

    /// Creates a DELETE request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new("DELETE", path)
    }

    /// Sets a header. Names are lowercased the way gateways deliver them.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
        self
    }

    /// Adds a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Sets a JSON body and content type.
    ///
    /// # Panics
    ///
    /// Panics if `body` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Self {
        let text = serde_json::to_string(body).expect("JSON body should serialize");
        self.header("content-type", "application/json").text(text)
    }

    /// Sets a plain text body.
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.base64 = false;
        self
    }

    /// Sets a binary body, base64 encoded in the payload.
    pub fn binary(mut self, body: impl AsRef<[u8]>) -> Self {
        self.body = Some(STANDARD.encode(body));
        self.base64 = true;
        self
    }

    /// Sets the caller's address.
    pub fn source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = ip.into();
        self
    }

    /// Selects the gateway payload format.
    pub fn version(mut self, version: PayloadVersion) -> Self {
        self.version = version;
        self
    }

    fn header_map(&self) -> Map<String, Value> {
        let mut headers = Map::new();
        for (name, value) in &self.headers {
            headers.insert(name.clone(), Value::String(value.clone()));
        }
        headers
    }

    fn query_map(&self) -> Value {
        if self.query.is_empty() {
            return Value::Null;
        }
        let mut query = Map::new();
        for (name, value) in &self.query {
            query.insert(name.clone(), Value::String(value.clone()));
        }
        Value::Object(query)
    }

    fn into_v1(self) -> Value {
        json!({
            "resource": self.path,
            "path": self.path,
            "httpMethod": self.method,
            "headers": self.header_map(),
            "queryStringParameters": self.query_map(),
            "requestContext": {
                "stage": "test",
                "requestId": "test-request",
                "identity": { "sourceIp": self.source_ip }
            },
            "body": self.body,
            "isBase64Encoded": self.base64
        })
    }

    fn into_v2(self) -> Value {
        let raw_query = self
            .query
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        json!({
            "version": "2.0",
            "routeKey": "$default",
            "rawPath": self.path,
            "rawQueryString": raw_query,
            "headers": self.header_map(),
            "queryStringParameters": self.query_map(),
            "requestContext": {
                "stage": "$default",
                "requestId": "test-request",
                "http": {
                    "method": self.method,
                    "path": self.path,
                    "sourceIp": self.source_ip
                }
            },
            "body": self.body,
            "isBase64Encoded": self.base64
        })
    }
}

impl IntoPayload for HttpRequest {
    fn into_payload(self) -> Value {
        match self.version {
            PayloadVersion::V1 => self.into_v1(),
            PayloadVersion::V2 => self.into_v2(),
        }
    }
}

/// A queue or stream batch.
///
/// ```
/// use nimbus_test::{IntoPayload, QueueBatch};
///
/// let raw = QueueBatch::sqs("orders").message("{\"id\":1}").message("{\"id\":2}").into_payload();
/// assert_eq!(raw["Records"].as_array().map(Vec::len), Some(2));
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct QueueBatch {
    event_source: &'static str,
    arn: String,
    bodies: Vec<String>,
}

impl QueueBatch {
    /// A batch from the named queue.
    pub fn sqs(queue: impl AsRef<str>) -> Self {
        Self {
            event_source: "aws:sqs",
            arn: format!("arn:aws:sqs:us-east-1:123456789012:{}", queue.as_ref()),
            bodies: Vec::new(),
        }
    }

    /// A batch from the named stream.
    pub fn kinesis(stream: impl AsRef<str>) -> Self {
        Self {
            event_source: "aws:kinesis",
            arn: format!("arn:aws:kinesis:us-east-1:123456789012:stream/{}", stream.as_ref()),
            bodies: Vec::new(),
        }
    }

    /// Adds a message.
    pub fn message(mut self, body: impl Into<String>) -> Self {
        self.bodies.push(body.into());
        self
    }
}

impl IntoPayload for QueueBatch {
    fn into_payload(self) -> Value {
        let bodies = if self.bodies.is_empty() {
            vec![String::from("{}")]
        } else {
            self.bodies
        };
        let records: Vec<Value> = bodies
            .into_iter()
            .enumerate()
            .map(|(i, body)| {
                json!({
                    "messageId": format!("msg-{i}"),
                    "eventSource": self.event_source,
                    "eventSourceARN": self.arn,
                    "awsRegion": "us-east-1",
                    "body": body
                })
            })
            .collect();
        json!({ "Records": records })
    }
}

/// A storage change notification.
#[derive(Debug, Clone)]
#[must_use]
pub struct StorageEvent {
    bucket: String,
    objects: Vec<(String, String)>,
}

impl StorageEvent {
    /// Events from the named bucket.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Vec::new(),
        }
    }

    /// Adds an object-created record.
    pub fn created(mut self, key: impl Into<String>) -> Self {
        self.objects.push(("ObjectCreated:Put".to_string(), key.into()));
        self
    }

    /// Adds an object-removed record.
    pub fn removed(mut self, key: impl Into<String>) -> Self {
        self.objects.push(("ObjectRemoved:Delete".to_string(), key.into()));
        self
    }
}

impl IntoPayload for StorageEvent {
    fn into_payload(self) -> Value {
        let bucket = self.bucket;
        let records: Vec<Value> = self
            .objects
            .into_iter()
            .map(|(event_name, key)| {
                json!({
                    "eventSource": "aws:s3",
                    "eventName": event_name,
                    "s3": {
                        "bucket": { "name": bucket },
                        "object": { "key": key }
                    }
                })
            })
            .collect();
        json!({ "Records": records })
    }
}

/// A schedule rule firing.
#[derive(Debug, Clone)]
#[must_use]
pub struct ScheduleTick {
    rule: String,
    time: String,
}

impl ScheduleTick {
    /// A tick from the named rule, scheduled now.
    pub fn new(rule: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            time: rfc3339(Utc::now()),
        }
    }

    /// Sets the scheduled time as the host would format it.
    pub fn at(mut self, time: impl Into<String>) -> Self {
        self.time = time.into();
        self
    }

    /// Sets the scheduled time from a timestamp.
    pub fn at_datetime(self, time: DateTime<Utc>) -> Self {
        self.at(rfc3339(time))
    }
}

impl IntoPayload for ScheduleTick {
    fn into_payload(self) -> Value {
        json!({
            "version": "0",
            "id": "tick-1",
            "source": "aws.events",
            "detail-type": "Scheduled Event",
            "account": "123456789012",
            "time": self.time,
            "region": "us-east-1",
            "resources": [format!("arn:aws:events:us-east-1:123456789012:rule/{}", self.rule)],
            "detail": {}
        })
    }
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// A custom event from an event bus.
#[derive(Debug, Clone)]
#[must_use]
pub struct BusEvent {
    source: String,
    detail_type: String,
    detail: Value,
}

impl BusEvent {
    /// An event with the given source and detail type.
    pub fn new(source: impl Into<String>, detail_type: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            detail_type: detail_type.into(),
            detail: json!({}),
        }
    }

    /// Sets the event detail.
    pub fn detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

impl IntoPayload for BusEvent {
    fn into_payload(self) -> Value {
        json!({
            "version": "0",
            "id": "event-1",
            "source": self.source,
            "detail-type": self.detail_type,
            "account": "123456789012",
            "time": "2024-01-01T00:00:00Z",
            "region": "us-east-1",
            "detail": self.detail
        })
    }
}

/// A frame on a persistent socket connection.
///
/// ```
/// use nimbus_test::{IntoPayload, SocketFrame};
///
/// let raw = SocketFrame::message("conn-1", "sendMessage", "hi").into_payload();
/// assert_eq!(raw["requestContext"]["routeKey"], "sendMessage");
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct SocketFrame {
    connection_id: String,
    route_key: String,
    event_type: &'static str,
    body: Option<String>,
}

impl SocketFrame {
    /// A connect frame.
    pub fn connect(connection_id: impl Into<String>) -> Self {
        Self::frame(connection_id, "$connect", "CONNECT", None)
    }

    /// A disconnect frame.
    pub fn disconnect(connection_id: impl Into<String>) -> Self {
        Self::frame(connection_id, "$disconnect", "DISCONNECT", None)
    }

    /// A message frame for a route key.
    pub fn message(
        connection_id: impl Into<String>,
        route_key: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let route_key: String = route_key.into();
        Self::frame(connection_id, &route_key, "MESSAGE", Some(body.into()))
    }

    fn frame(
        connection_id: impl Into<String>,
        route_key: &str,
        event_type: &'static str,
        body: Option<String>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            route_key: route_key.to_string(),
            event_type,
            body,
        }
    }
}

impl IntoPayload for SocketFrame {
    fn into_payload(self) -> Value {
        json!({
            "requestContext": {
                "routeKey": self.route_key,
                "eventType": self.event_type,
                "connectionId": self.connection_id,
                "stage": "test",
                "requestId": "test-frame"
            },
            "body": self.body,
            "isBase64Encoded": false
        })
    }
}
