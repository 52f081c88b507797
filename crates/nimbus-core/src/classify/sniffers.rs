//! Built-in sniffers for the common cloud trigger payload shapes.
//!
//! Each sniffer extracts just enough to build an envelope; handlers that need
//! the full record shape read it from the envelope metadata.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};

use super::Sniffer;
use crate::envelope::{EnvelopeBuilder, NormalizedEnvelope};
use crate::error::NimbusError;
use crate::trigger::TriggerKind;

const SCHEDULED_DETAIL_TYPE: &str = "Scheduled Event";
const SCHEDULER_SOURCE: &str = "aws.events";
const DEFAULT_RULE_NAME: &str = "default";

fn str_at<'a>(raw: &'a Value, pointer: &str) -> Option<&'a str> {
    raw.pointer(pointer).and_then(Value::as_str)
}

fn malformed(sniffer: &str, field: &str) -> NimbusError {
    NimbusError::validation(format!("{sniffer}: missing or malformed field '{field}'"))
}

/// Copies string-valued entries of a JSON object into headers.
fn copy_headers(mut builder: EnvelopeBuilder, headers: Option<&Value>) -> EnvelopeBuilder {
    if let Some(Value::Object(map)) = headers {
        for (name, value) in map {
            match value {
                Value::String(s) => builder = builder.header(name, s),
                Value::Array(values) => {
                    for v in values.iter().filter_map(Value::as_str) {
                        builder = builder.header(name, v);
                    }
                }
                _ => {}
            }
        }
    }
    builder
}

fn copy_query(mut builder: EnvelopeBuilder, params: Option<&Value>) -> EnvelopeBuilder {
    if let Some(Value::Object(map)) = params {
        for (name, value) in map {
            if let Some(s) = value.as_str() {
                builder = builder.query(name, s);
            }
        }
    }
    builder
}

/// Decodes the `body` field, honoring `isBase64Encoded`.
fn decode_body(sniffer: &str, raw: &Value) -> Result<Vec<u8>, NimbusError> {
    let Some(body) = str_at(raw, "/body") else {
        return Ok(Vec::new());
    };
    let encoded = raw
        .get("isBase64Encoded")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if encoded {
        STANDARD
            .decode(body)
            .map_err(|_| malformed(sniffer, "body"))
    } else {
        Ok(body.as_bytes().to_vec())
    }
}

fn first_record(raw: &Value) -> Option<&Map<String, Value>> {
    raw.get("Records")
        .and_then(Value::as_array)
        .and_then(|records| records.first())
        .and_then(Value::as_object)
}

/// Extracts a queue, stream or table name from an ARN.
///
/// `arn:aws:sqs:us-east-1:123:orders` yields `orders`;
/// `arn:aws:dynamodb:us-east-1:123:table/users/stream/2024` yields `users`.
fn name_from_arn(arn: &str) -> Option<&str> {
    let resource = arn.rsplit(':').next()?;
    let name = if resource.contains('/') {
        let mut parts = resource.split('/');
        match parts.next() {
            Some("table" | "stream") => parts.next(),
            _ => resource.rsplit('/').next(),
        }
    } else {
        Some(resource)
    };
    name.filter(|n| !n.is_empty())
}

/// Persistent socket connection frames (connect, disconnect, message).
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketFrameSniffer;

impl Sniffer for SocketFrameSniffer {
    fn name(&self) -> &'static str {
        "socket_frame"
    }

    fn kind(&self) -> TriggerKind {
        TriggerKind::SocketFrame
    }

    fn matches(&self, raw: &Value) -> bool {
        str_at(raw, "/requestContext/connectionId").is_some()
            && str_at(raw, "/requestContext/routeKey").is_some()
    }

    fn normalize(&self, raw: &Value) -> Result<NormalizedEnvelope, NimbusError> {
        let route_key = str_at(raw, "/requestContext/routeKey")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| malformed(self.name(), "requestContext.routeKey"))?;
        let connection_id = str_at(raw, "/requestContext/connectionId").unwrap_or_default();
        let event_type = str_at(raw, "/requestContext/eventType").unwrap_or("MESSAGE");
        let path = if route_key.starts_with('/') {
            route_key.to_string()
        } else {
            format!("/{route_key}")
        };

        let mut builder = NormalizedEnvelope::builder(TriggerKind::SocketFrame)
            .method(event_type)
            .path(path)
            .body(decode_body(self.name(), raw)?)
            .metadata("connection_id", connection_id)
            .metadata("route_key", route_key);
        if let Some(stage) = str_at(raw, "/requestContext/stage") {
            builder = builder.metadata("stage", stage);
        }
        builder = copy_headers(builder, raw.get("headers"));
        builder.build()
    }
}

/// HTTP requests from an API gateway or function URL (payload v1 and v2).
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestResponseSniffer;

impl RequestResponseSniffer {
    fn builder_v1(&self, raw: &Value, method: &str) -> Result<EnvelopeBuilder, NimbusError> {
        let path = str_at(raw, "/path").ok_or_else(|| malformed(self.name(), "path"))?;
        let mut builder = NormalizedEnvelope::builder(TriggerKind::RequestResponse)
            .method(method)
            .path(path);
        // multiValueHeaders is a superset of headers when present.
        builder = match raw.get("multiValueHeaders") {
            Some(multi @ Value::Object(_)) => copy_headers(builder, Some(multi)),
            _ => copy_headers(builder, raw.get("headers")),
        };
        Ok(copy_query(builder, raw.get("queryStringParameters")))
    }

    fn builder_v2(&self, raw: &Value, method: &str) -> Result<EnvelopeBuilder, NimbusError> {
        let path = str_at(raw, "/rawPath")
            .or_else(|| str_at(raw, "/requestContext/http/path"))
            .ok_or_else(|| malformed(self.name(), "rawPath"))?;
        let mut builder = NormalizedEnvelope::builder(TriggerKind::RequestResponse)
            .method(method)
            .path(path);
        builder = copy_headers(builder, raw.get("headers"));

        if let Some(cookies) = raw.get("cookies").and_then(Value::as_array) {
            let joined: Vec<&str> = cookies.iter().filter_map(Value::as_str).collect();
            if !joined.is_empty() {
                builder = builder.header("cookie", joined.join("; "));
            }
        }

        match raw.get("queryStringParameters") {
            Some(params @ Value::Object(_)) => Ok(copy_query(builder, Some(params))),
            _ => {
                if let Some(qs) = str_at(raw, "/rawQueryString") {
                    for pair in qs.split('&').filter(|p| !p.is_empty()) {
                        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                        builder = builder.query(name, value);
                    }
                }
                Ok(builder)
            }
        }
    }
}

impl Sniffer for RequestResponseSniffer {
    fn name(&self) -> &'static str {
        "request_response"
    }

    fn kind(&self) -> TriggerKind {
        TriggerKind::RequestResponse
    }

    fn matches(&self, raw: &Value) -> bool {
        str_at(raw, "/httpMethod").is_some() || str_at(raw, "/requestContext/http/method").is_some()
    }

    fn normalize(&self, raw: &Value) -> Result<NormalizedEnvelope, NimbusError> {
        let mut builder = if let Some(method) = str_at(raw, "/httpMethod") {
            self.builder_v1(raw, method)?
        } else {
            let method = str_at(raw, "/requestContext/http/method")
                .ok_or_else(|| malformed(self.name(), "requestContext.http.method"))?;
            self.builder_v2(raw, method)?
        };

        builder = builder.body(decode_body(self.name(), raw)?);
        for (key, pointer) in [
            ("stage", "/requestContext/stage"),
            ("request_id", "/requestContext/requestId"),
            ("source_ip", "/requestContext/identity/sourceIp"),
            ("source_ip", "/requestContext/http/sourceIp"),
        ] {
            if let Some(value) = str_at(raw, pointer) {
                builder = builder.metadata(key, value);
            }
        }
        builder.build()
    }
}

/// Storage object change notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeNotificationSniffer;

impl Sniffer for ChangeNotificationSniffer {
    fn name(&self) -> &'static str {
        "change_notification"
    }

    fn kind(&self) -> TriggerKind {
        TriggerKind::ChangeNotification
    }

    fn matches(&self, raw: &Value) -> bool {
        first_record(raw).is_some_and(|r| r.contains_key("s3"))
    }

    fn normalize(&self, raw: &Value) -> Result<NormalizedEnvelope, NimbusError> {
        let records = raw
            .get("Records")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed(self.name(), "Records"))?;
        let bucket = str_at(raw, "/Records/0/s3/bucket/name")
            .ok_or_else(|| malformed(self.name(), "Records[0].s3.bucket.name"))?;

        let mut event_names: Vec<&str> = Vec::new();
        for name in records
            .iter()
            .filter_map(|r| r.get("eventName").and_then(Value::as_str))
        {
            if !event_names.contains(&name) {
                event_names.push(name);
            }
        }

        NormalizedEnvelope::builder(TriggerKind::ChangeNotification)
            .path(bucket)
            .metadata("record_count", records.len())
            .metadata("records", Value::Array(records.clone()))
            .metadata("event_names", event_names)
            .build()
    }
}

/// Queue, stream and table-stream batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchMessageSniffer;

impl BatchMessageSniffer {
    const SOURCES: [&'static str; 3] = ["aws:sqs", "aws:kinesis", "aws:dynamodb"];

    fn event_source(raw: &Value) -> Option<&str> {
        let record = first_record(raw)?;
        record
            .get("eventSource")
            .or_else(|| record.get("EventSource"))
            .and_then(Value::as_str)
    }
}

impl Sniffer for BatchMessageSniffer {
    fn name(&self) -> &'static str {
        "batch_message"
    }

    fn kind(&self) -> TriggerKind {
        TriggerKind::BatchMessage
    }

    fn matches(&self, raw: &Value) -> bool {
        Self::event_source(raw).is_some_and(|s| Self::SOURCES.contains(&s))
    }

    fn normalize(&self, raw: &Value) -> Result<NormalizedEnvelope, NimbusError> {
        let records = raw
            .get("Records")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed(self.name(), "Records"))?;
        let event_source = Self::event_source(raw).unwrap_or_default();
        let arn = str_at(raw, "/Records/0/eventSourceARN")
            .ok_or_else(|| malformed(self.name(), "Records[0].eventSourceARN"))?;
        let name = name_from_arn(arn).ok_or_else(|| malformed(self.name(), "eventSourceARN"))?;

        NormalizedEnvelope::builder(TriggerKind::BatchMessage)
            .path(name)
            .metadata("record_count", records.len())
            .metadata("records", Value::Array(records.clone()))
            .metadata("event_source", event_source)
            .build()
    }
}

/// Timer firings from a schedule rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduledTickSniffer;

impl Sniffer for ScheduledTickSniffer {
    fn name(&self) -> &'static str {
        "scheduled_tick"
    }

    fn kind(&self) -> TriggerKind {
        TriggerKind::ScheduledTick
    }

    fn matches(&self, raw: &Value) -> bool {
        str_at(raw, "/source") == Some(SCHEDULER_SOURCE)
            && str_at(raw, "/detail-type") == Some(SCHEDULED_DETAIL_TYPE)
    }

    fn normalize(&self, raw: &Value) -> Result<NormalizedEnvelope, NimbusError> {
        let rule = str_at(raw, "/resources/0")
            .and_then(|arn| arn.rsplit_once("rule/").map(|(_, name)| name))
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_RULE_NAME);

        let mut builder = NormalizedEnvelope::builder(TriggerKind::ScheduledTick).path(rule);
        if let Some(time) = str_at(raw, "/time") {
            builder = builder.metadata("scheduled_time", time);
        }
        if let Some(detail) = raw.get("detail").filter(|d| !d.is_null()) {
            let body = serde_json::to_vec(detail).map_err(|e| {
                NimbusError::internal_with_source("failed to encode schedule detail", e)
            })?;
            builder = builder.body(body);
        }
        builder.build()
    }
}

/// Custom events published on an event bus.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusEventSniffer;

impl Sniffer for BusEventSniffer {
    fn name(&self) -> &'static str {
        "bus_event"
    }

    fn kind(&self) -> TriggerKind {
        TriggerKind::BusEvent
    }

    fn matches(&self, raw: &Value) -> bool {
        str_at(raw, "/detail-type").is_some()
            && str_at(raw, "/source").is_some()
            && raw.get("detail").is_some()
    }

    fn normalize(&self, raw: &Value) -> Result<NormalizedEnvelope, NimbusError> {
        let source = str_at(raw, "/source").ok_or_else(|| malformed(self.name(), "source"))?;
        let detail_type =
            str_at(raw, "/detail-type").ok_or_else(|| malformed(self.name(), "detail-type"))?;
        let detail = raw
            .get("detail")
            .ok_or_else(|| malformed(self.name(), "detail"))?;
        let body = serde_json::to_vec(detail)
            .map_err(|e| NimbusError::internal_with_source("failed to encode event detail", e))?;

        let mut builder = NormalizedEnvelope::builder(TriggerKind::BusEvent)
            .path(format!("{source}/{detail_type}"))
            .query("source", source)
            .query("detail_type", detail_type)
            .body(body);
        for key in ["id", "time", "account", "region"] {
            if let Some(value) = str_at(raw, &format!("/{key}")) {
                builder = builder.metadata(key, value);
            }
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_name_from_arn() {
        assert_eq!(name_from_arn("arn:aws:sqs:us-east-1:123:orders"), Some("orders"));
        assert_eq!(
            name_from_arn("arn:aws:kinesis:us-east-1:123:stream/clicks"),
            Some("clicks")
        );
        assert_eq!(
            name_from_arn("arn:aws:dynamodb:us-east-1:123:table/users/stream/2024-01-01"),
            Some("users")
        );
        assert_eq!(name_from_arn("arn:aws:sqs:us-east-1:123:"), None);
    }

    #[test]
    fn test_http_v1_multi_value_headers_and_base64_body() {
        let raw = json!({
            "httpMethod": "post",
            "path": "/upload",
            "multiValueHeaders": { "X-Tag": ["a", "b"] },
            "headers": { "X-Tag": "b" },
            "queryStringParameters": { "dry_run": "true" },
            "body": STANDARD.encode("hello"),
            "isBase64Encoded": true,
            "requestContext": { "stage": "prod" }
        });
        let env = RequestResponseSniffer.normalize(&raw).unwrap();
        assert_eq!(env.method(), "POST");
        assert_eq!(env.header("x-tag"), Some("a, b"));
        assert_eq!(env.query_param("dry_run"), Some("true"));
        assert_eq!(env.body_str(), Some("hello"));
        assert_eq!(env.metadata_value("stage"), Some(&json!("prod")));
    }

    #[test]
    fn test_http_v2_cookies_and_raw_query() {
        let raw = json!({
            "version": "2.0",
            "rawPath": "/search",
            "rawQueryString": "q=rust&page=2",
            "cookies": ["a=1", "b=2"],
            "requestContext": { "http": { "method": "GET", "path": "/search" } }
        });
        assert!(RequestResponseSniffer.matches(&raw));
        let env = RequestResponseSniffer.normalize(&raw).unwrap();
        assert_eq!(env.path(), "/search");
        assert_eq!(env.header("cookie"), Some("a=1; b=2"));
        assert_eq!(env.query_param("page"), Some("2"));
    }

    #[test]
    fn test_invalid_base64_body_is_rejected() {
        let raw = json!({
            "httpMethod": "GET",
            "path": "/",
            "body": "not base64!!",
            "isBase64Encoded": true
        });
        assert!(RequestResponseSniffer.normalize(&raw).is_err());
    }

    #[test]
    fn test_socket_frame_path_and_metadata() {
        let raw = json!({
            "requestContext": {
                "connectionId": "abc=",
                "routeKey": "$connect",
                "eventType": "CONNECT",
                "stage": "dev"
            }
        });
        let env = SocketFrameSniffer.normalize(&raw).unwrap();
        assert_eq!(env.path(), "/$connect");
        assert_eq!(env.method(), "CONNECT");
        assert_eq!(env.metadata_value("connection_id"), Some(&json!("abc=")));
        assert_eq!(env.metadata_value("stage"), Some(&json!("dev")));
    }

    #[test]
    fn test_storage_event_names_are_deduplicated() {
        let raw = json!({
            "Records": [
                { "eventName": "ObjectCreated:Put", "s3": { "bucket": { "name": "uploads" } } },
                { "eventName": "ObjectCreated:Put", "s3": { "bucket": { "name": "uploads" } } },
                { "eventName": "ObjectRemoved:Delete", "s3": { "bucket": { "name": "uploads" } } }
            ]
        });
        let env = ChangeNotificationSniffer.normalize(&raw).unwrap();
        assert_eq!(env.path(), "uploads");
        assert_eq!(env.metadata_value("record_count"), Some(&json!(3)));
        assert_eq!(
            env.metadata_value("event_names"),
            Some(&json!(["ObjectCreated:Put", "ObjectRemoved:Delete"]))
        );
    }

    #[test]
    fn test_scheduled_rule_name() {
        let raw = json!({
            "source": "aws.events",
            "detail-type": "Scheduled Event",
            "time": "2024-01-01T00:00:00Z",
            "resources": ["arn:aws:events:us-east-1:123:rule/nightly-report"],
            "detail": {}
        });
        let env = ScheduledTickSniffer.normalize(&raw).unwrap();
        assert_eq!(env.path(), "nightly-report");
        assert_eq!(
            env.metadata_value("scheduled_time"),
            Some(&json!("2024-01-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_scheduled_detail_becomes_body() {
        let raw = json!({
            "source": "aws.events",
            "detail-type": "Scheduled Event",
            "resources": ["arn:aws:events:us-east-1:123:rule/nightly-report"],
            "detail": { "report": "daily" }
        });
        let env = ScheduledTickSniffer.normalize(&raw).unwrap();
        assert_eq!(
            env.body_json::<Value>().unwrap(),
            json!({ "report": "daily" })
        );

        let bare = json!({ "source": "aws.events", "detail-type": "Scheduled Event", "detail": null });
        assert!(ScheduledTickSniffer.normalize(&bare).unwrap().body().is_empty());
    }

    #[test]
    fn test_bus_event_path_and_body() {
        let raw = json!({
            "source": "billing",
            "detail-type": "InvoicePaid",
            "detail": { "invoice": "inv-1" }
        });
        let env = BusEventSniffer.normalize(&raw).unwrap();
        assert_eq!(env.path(), "billing/InvoicePaid");
        assert_eq!(env.query_param("detail_type"), Some("InvoicePaid"));
        let detail: Value = env.body_json().unwrap();
        assert_eq!(detail["invoice"], "inv-1");
    }
}
