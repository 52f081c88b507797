//! Trigger kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The category of source that produced an invocation.
///
/// The set is closed: every payload the classifier accepts maps to exactly
/// one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Synchronous request/response, addressed by path and method.
    RequestResponse,
    /// Queue or stream delivery carrying many records.
    BatchMessage,
    /// Storage object change events.
    ChangeNotification,
    /// Timer firing from a schedule rule.
    ScheduledTick,
    /// Custom event published on an event bus.
    BusEvent,
    /// Connect, disconnect or message on a persistent socket connection.
    SocketFrame,
}

impl TriggerKind {
    /// All kinds, in declaration order.
    pub const ALL: [TriggerKind; 6] = [
        Self::RequestResponse,
        Self::BatchMessage,
        Self::ChangeNotification,
        Self::ScheduledTick,
        Self::BusEvent,
        Self::SocketFrame,
    ];

    /// Returns the stable snake_case name used in configuration and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RequestResponse => "request_response",
            Self::BatchMessage => "batch_message",
            Self::ChangeNotification => "change_notification",
            Self::ScheduledTick => "scheduled_tick",
            Self::BusEvent => "bus_event",
            Self::SocketFrame => "socket_frame",
        }
    }

    /// Returns true if routes of this kind are addressed by path template.
    ///
    /// The remaining kinds are addressed by source identifier.
    #[must_use]
    pub const fn is_path_addressable(&self) -> bool {
        matches!(self, Self::RequestResponse | Self::SocketFrame)
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown trigger kind name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown trigger kind: {0}")]
pub struct ParseTriggerKindError(pub String);

impl FromStr for TriggerKind {
    type Err = ParseTriggerKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseTriggerKindError(s.to_string()))
    }
}
