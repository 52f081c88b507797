//! In-memory invocation sink.

use std::sync::Arc;

use nimbus_core::NimbusError;
use nimbus_telemetry::{InvocationRecord, InvocationSink};
use parking_lot::Mutex;

/// An error reported to the sink, reduced to comparable fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedError {
    /// Trace id the error was reported under.
    pub trace_id: String,
    /// Stable error code, e.g. `TIMEOUT`.
    pub code: &'static str,
    /// Display text of the error.
    pub message: String,
}

/// Sink that keeps every record in memory for assertions.
///
/// Clones share storage, so a test can hand one clone to the dispatcher and
/// inspect another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<InvocationRecord>>>,
    errors: Arc<Mutex<Vec<RecordedError>>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all invocation records in arrival order.
    #[must_use]
    pub fn records(&self) -> Vec<InvocationRecord> {
        self.records.lock().clone()
    }

    /// Returns the most recent invocation record.
    #[must_use]
    pub fn last(&self) -> Option<InvocationRecord> {
        self.records.lock().last().cloned()
    }

    /// Returns all reported errors in arrival order.
    #[must_use]
    pub fn errors(&self) -> Vec<RecordedError> {
        self.errors.lock().clone()
    }

    /// Drops everything recorded so far.
    pub fn clear(&self) {
        self.records.lock().clear();
        self.errors.lock().clear();
    }
}

impl InvocationSink for MemorySink {
    fn record_invocation(&self, record: &InvocationRecord) {
        self.records.lock().push(record.clone());
    }

    fn record_error(&self, trace_id: &str, error: &NimbusError) {
        self.errors.lock().push(RecordedError {
            trace_id: trace_id.to_string(),
            code: error.error_code(),
            message: error.to_string(),
        });
    }
}
