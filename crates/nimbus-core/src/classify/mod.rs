//! Event classification.
//!
//! A [`Classifier`] holds an ordered list of [`Sniffer`]s. The first sniffer
//! whose `matches` accepts the raw payload normalizes it; if none does, the
//! payload is rejected with [`NimbusError::UnclassifiedPayload`], which lists
//! only the payload's top-level keys.
//!
//! Order matters because payload shapes overlap. See
//! [`DEFAULT_SNIFFER_ORDER`].

mod sniffers;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::envelope::NormalizedEnvelope;
use crate::error::NimbusError;
use crate::trigger::TriggerKind;

pub use sniffers::{
    BatchMessageSniffer, BusEventSniffer, ChangeNotificationSniffer, RequestResponseSniffer,
    ScheduledTickSniffer, SocketFrameSniffer,
};

/// Built-in sniffer names in their default order.
///
/// - `socket_frame` before `request_response`: socket frames also carry a
///   `requestContext`.
/// - `change_notification` before `batch_message`: both use a `Records`
///   array.
/// - `scheduled_tick` before `bus_event`: a schedule firing is a bus event
///   with the `Scheduled Event` detail type.
pub const DEFAULT_SNIFFER_ORDER: [&str; 6] = [
    "socket_frame",
    "request_response",
    "change_notification",
    "batch_message",
    "scheduled_tick",
    "bus_event",
];

/// Longest sniffer error message kept in an unclassified payload error.
pub const MAX_REASON_LEN: usize = 160;

/// Recognizes one payload shape and reduces it to an envelope.
pub trait Sniffer: Send + Sync {
    /// Stable name used to reorder sniffers from configuration.
    fn name(&self) -> &'static str;

    /// Kind of envelope this sniffer produces.
    fn kind(&self) -> TriggerKind;

    /// Returns true if the payload has this sniffer's shape.
    fn matches(&self, raw: &Value) -> bool;

    /// Builds the envelope. Only called after `matches` returned true.
    ///
    /// The envelope must be of [`kind`](Self::kind); the classifier rejects
    /// any other.
    ///
    /// # Errors
    ///
    /// Returns an error if a field the envelope needs is missing or malformed.
    /// The message ends up in logs and error responses, so it should name
    /// fields and never quote payload values. The classifier truncates it to
    /// [`MAX_REASON_LEN`] characters and strips control characters.
    fn normalize(&self, raw: &Value) -> Result<NormalizedEnvelope, NimbusError>;
}

/// Errors raised while assembling a classifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifierError {
    /// An order entry names no registered sniffer.
    #[error("unknown sniffer '{0}'")]
    UnknownSniffer(String),
    /// Two sniffers share a name.
    #[error("duplicate sniffer '{0}'")]
    DuplicateSniffer(String),
}

fn builtin_sniffers() -> Vec<Arc<dyn Sniffer>> {
    vec![
        Arc::new(SocketFrameSniffer),
        Arc::new(RequestResponseSniffer),
        Arc::new(ChangeNotificationSniffer),
        Arc::new(BatchMessageSniffer),
        Arc::new(ScheduledTickSniffer),
        Arc::new(BusEventSniffer),
    ]
}

/// Ordered set of sniffers. Classification is pure.
///
/// # Example
///
/// ```
/// use nimbus_core::{Classifier, TriggerKind};
/// use serde_json::json;
///
/// let classifier = Classifier::new();
/// let envelope = classifier
///     .classify(&json!({ "httpMethod": "GET", "path": "/users/42" }))
///     .unwrap();
/// assert_eq!(envelope.kind(), TriggerKind::RequestResponse);
/// assert_eq!(envelope.path(), "/users/42");
/// ```
#[derive(Clone)]
pub struct Classifier {
    sniffers: Vec<Arc<dyn Sniffer>>,
}

impl Classifier {
    /// Creates a classifier with the built-in sniffers in default order.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sniffers: builtin_sniffers(),
        }
    }

    /// Starts an empty builder.
    #[must_use]
    pub fn builder() -> ClassifierBuilder {
        ClassifierBuilder::default()
    }

    /// Classifies a raw payload.
    ///
    /// # Errors
    ///
    /// Returns [`NimbusError::UnclassifiedPayload`] if no sniffer matches, or
    /// if the matching sniffer cannot normalize the payload.
    pub fn classify(&self, raw: &Value) -> Result<NormalizedEnvelope, NimbusError> {
        let Some(sniffer) = self.sniffers.iter().find(|s| s.matches(raw)) else {
            let error = unclassified(raw, None);
            tracing::debug!(error = %error, "no sniffer matched payload");
            return Err(error);
        };

        let envelope = sniffer.normalize(raw).map_err(|e| {
            let reason = clean_reason(&e.to_string());
            tracing::debug!(sniffer = sniffer.name(), reason = %reason, "sniffer failed to normalize payload");
            unclassified(raw, Some(reason))
        })?;

        if envelope.kind() != sniffer.kind() {
            tracing::warn!(
                sniffer = sniffer.name(),
                declared = %sniffer.kind(),
                produced = %envelope.kind(),
                "sniffer produced an envelope of the wrong kind"
            );
            return Err(unclassified(
                raw,
                Some(format!(
                    "{}: declared {} but produced {}",
                    sniffer.name(),
                    sniffer.kind(),
                    envelope.kind()
                )),
            ));
        }
        Ok(envelope)
    }

    /// Returns sniffer names in evaluation order.
    #[must_use]
    pub fn sniffer_names(&self) -> Vec<&'static str> {
        self.sniffers.iter().map(|s| s.name()).collect()
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("sniffers", &self.sniffer_names())
            .finish()
    }
}

fn clean_reason(message: &str) -> String {
    let mut reason: String = message
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .take(MAX_REASON_LEN)
        .collect();
    if message.chars().count() > MAX_REASON_LEN {
        reason.push_str("...");
    }
    reason
}

fn unclassified(raw: &Value, reason: Option<String>) -> NimbusError {
    let mut keys: Vec<String> = raw
        .as_object()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default();
    keys.sort();
    NimbusError::UnclassifiedPayload { keys, reason }
}

/// Builder for [`Classifier`].
#[derive(Default)]
#[must_use]
pub struct ClassifierBuilder {
    sniffers: Vec<Arc<dyn Sniffer>>,
}

impl ClassifierBuilder {
    /// Adds the built-in sniffers in default order.
    pub fn with_builtin(mut self) -> Self {
        self.sniffers.extend(builtin_sniffers());
        self
    }

    /// Appends a custom sniffer.
    pub fn sniffer(mut self, sniffer: impl Sniffer + 'static) -> Self {
        self.sniffers.push(Arc::new(sniffer));
        self
    }

    /// Reorders sniffers by name.
    ///
    /// Named sniffers come first in the given order; the rest keep their
    /// relative order after them.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::UnknownSniffer`] if a name is not registered.
    pub fn order<I, S>(mut self, names: I) -> Result<Self, ClassifierError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ordered = Vec::with_capacity(self.sniffers.len());
        for name in names {
            let name = name.as_ref();
            let index = self
                .sniffers
                .iter()
                .position(|s| s.name() == name)
                .ok_or_else(|| ClassifierError::UnknownSniffer(name.to_string()))?;
            ordered.push(self.sniffers.remove(index));
        }
        ordered.append(&mut self.sniffers);
        self.sniffers = ordered;
        Ok(self)
    }

    /// Builds the classifier.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::DuplicateSniffer`] if two sniffers share a
    /// name.
    pub fn build(self) -> Result<Classifier, ClassifierError> {
        for (i, sniffer) in self.sniffers.iter().enumerate() {
            if self.sniffers[..i].iter().any(|s| s.name() == sniffer.name()) {
                return Err(ClassifierError::DuplicateSniffer(sniffer.name().to_string()));
            }
        }
        Ok(Classifier {
            sniffers: self.sniffers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn socket_payload() -> Value {
        json!({
            "requestContext": {
                "connectionId": "c-1",
                "routeKey": "sendMessage",
                "eventType": "MESSAGE"
            },
            "body": "{\"text\":\"hi\"}"
        })
    }

    #[test]
    fn test_default_order_matches_constant() {
        assert_eq!(Classifier::new().sniffer_names(), DEFAULT_SNIFFER_ORDER.to_vec());
    }

    #[test]
    fn test_each_builtin_kind() {
        let classifier = Classifier::new();
        let cases = [
            (socket_payload(), TriggerKind::SocketFrame),
            (json!({ "httpMethod": "GET", "path": "/" }), TriggerKind::RequestResponse),
            (
                json!({ "Records": [{ "s3": { "bucket": { "name": "b" } } }] }),
                TriggerKind::ChangeNotification,
            ),
            (
                json!({ "Records": [{
                    "eventSource": "aws:sqs",
                    "eventSourceARN": "arn:aws:sqs:eu-west-1:1:jobs"
                }] }),
                TriggerKind::BatchMessage,
            ),
            (
                json!({ "source": "aws.events", "detail-type": "Scheduled Event", "detail": {} }),
                TriggerKind::ScheduledTick,
            ),
            (
                json!({ "source": "shop", "detail-type": "OrderPlaced", "detail": {} }),
                TriggerKind::BusEvent,
            ),
        ];
        for (raw, kind) in cases {
            assert_eq!(classifier.classify(&raw).unwrap().kind(), kind, "{raw}");
        }
    }

    #[test]
    fn test_unclassified_lists_sorted_keys_only() {
        let raw = json!({ "zeta": "secret-value", "alpha": 1 });
        let err = Classifier::new().classify(&raw).unwrap_err();
        match &err {
            NimbusError::UnclassifiedPayload { keys, reason } => {
                assert_eq!(keys, &vec!["alpha".to_string(), "zeta".to_string()]);
                assert!(reason.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.to_string().contains("secret-value"));
    }

    #[test]
    fn test_non_object_payload_is_unclassified() {
        let err = Classifier::new().classify(&json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, NimbusError::UnclassifiedPayload { ref keys, .. } if keys.is_empty()));
    }

    #[test]
    fn test_normalize_failure_reports_reason() {
        let raw = json!({ "Records": [{ "eventSource": "aws:sqs" }] });
        let err = Classifier::new().classify(&raw).unwrap_err();
        match err {
            NimbusError::UnclassifiedPayload { reason, .. } => {
                assert!(reason.unwrap().contains("eventSourceARN"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_order_changes_precedence() {
        // With request_response first, a socket frame carrying an HTTP
        // method is taken as a request.
        let mut raw = socket_payload();
        raw["httpMethod"] = json!("POST");
        raw["path"] = json!("/sendMessage");

        let default = Classifier::new().classify(&raw).unwrap();
        assert_eq!(default.kind(), TriggerKind::SocketFrame);

        let reordered = Classifier::builder()
            .with_builtin()
            .order(["request_response"])
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(reordered.sniffer_names()[..2], ["request_response", "socket_frame"]);
        assert_eq!(reordered.classify(&raw).unwrap().kind(), TriggerKind::RequestResponse);
    }

    #[test]
    fn test_unknown_sniffer_name_rejected() {
        let result = Classifier::builder().with_builtin().order(["webhook"]);
        assert_eq!(
            result.err(),
            Some(ClassifierError::UnknownSniffer("webhook".to_string()))
        );
    }

    struct PingSniffer;

    impl Sniffer for PingSniffer {
        fn name(&self) -> &'static str {
            "ping"
        }

        fn kind(&self) -> TriggerKind {
            TriggerKind::BusEvent
        }

        fn matches(&self, raw: &Value) -> bool {
            raw.get("ping").is_some()
        }

        fn normalize(&self, _raw: &Value) -> Result<NormalizedEnvelope, NimbusError> {
            NormalizedEnvelope::builder(TriggerKind::BusEvent)
                .path("ping")
                .build()
        }
    }

    struct MislabelledSniffer;

    impl Sniffer for MislabelledSniffer {
        fn name(&self) -> &'static str {
            "mislabelled"
        }

        fn kind(&self) -> TriggerKind {
            TriggerKind::ScheduledTick
        }

        fn matches(&self, raw: &Value) -> bool {
            raw.get("tick").is_some()
        }

        fn normalize(&self, _raw: &Value) -> Result<NormalizedEnvelope, NimbusError> {
            NormalizedEnvelope::builder(TriggerKind::RequestResponse)
                .method("GET")
                .path("/tick")
                .build()
        }
    }

    struct ChattySniffer;

    impl Sniffer for ChattySniffer {
        fn name(&self) -> &'static str {
            "chatty"
        }

        fn kind(&self) -> TriggerKind {
            TriggerKind::BusEvent
        }

        fn matches(&self, raw: &Value) -> bool {
            raw.get("chatty").is_some()
        }

        fn normalize(&self, raw: &Value) -> Result<NormalizedEnvelope, NimbusError> {
            Err(NimbusError::validation(format!("bad payload:\n{}", raw["chatty"])))
        }
    }

    #[test]
    fn test_kind_mismatch_is_unclassified() {
        let classifier = Classifier::builder()
            .sniffer(MislabelledSniffer)
            .build()
            .unwrap();
        let err = classifier.classify(&json!({ "tick": 1 })).unwrap_err();
        match err {
            NimbusError::UnclassifiedPayload { keys, reason } => {
                assert_eq!(keys, vec!["tick".to_string()]);
                let reason = reason.unwrap();
                assert!(reason.starts_with("mislabelled:"), "{reason}");
                assert!(reason.contains("scheduled_tick"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_reason_is_bounded_and_single_line() {
        let classifier = Classifier::builder().sniffer(ChattySniffer).build().unwrap();
        let raw = json!({ "chatty": "x".repeat(1000) });
        let err = classifier.classify(&raw).unwrap_err();
        let NimbusError::UnclassifiedPayload { reason: Some(reason), .. } = err else {
            panic!("expected a reason");
        };
        assert!(!reason.contains('\n'));
        assert_eq!(reason.chars().count(), MAX_REASON_LEN + 3);
        assert!(reason.ends_with("..."));
    }

    #[test]
    fn test_custom_sniffer_and_duplicates() {
        let classifier = Classifier::builder()
            .with_builtin()
            .sniffer(PingSniffer)
            .build()
            .unwrap();
        assert_eq!(classifier.classify(&json!({ "ping": true })).unwrap().path(), "ping");

        let err = Classifier::builder()
            .sniffer(PingSniffer)
            .sniffer(PingSniffer)
            .build()
            .unwrap_err();
        assert_eq!(err, ClassifierError::DuplicateSniffer("ping".to_string()));
    }
}
