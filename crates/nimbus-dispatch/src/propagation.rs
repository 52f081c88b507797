//! Trace id propagation.

use nimbus_core::{generate_trace_id, NormalizedEnvelope};

use crate::host::HostInvocation;

/// Header names read when picking the trace id.
pub mod headers {
    /// Plain trace id header.
    pub const TRACE_ID: &str = "x-trace-id";
    /// W3C Trace Context header.
    pub const TRACEPARENT: &str = "traceparent";
}

/// Picks the invocation's trace id.
///
/// Precedence: the host's trace id, then `x-trace-id`, then the trace
/// segment of a W3C `traceparent`, then a fresh id.
pub(crate) fn trace_id_for(host: &HostInvocation, envelope: Option<&NormalizedEnvelope>) -> String {
    if let Some(trace_id) = host.trace_id() {
        return trace_id.to_string();
    }
    envelope
        .and_then(|env| {
            env.header(headers::TRACE_ID)
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .or_else(|| env.header(headers::TRACEPARENT).and_then(traceparent_trace_id))
        })
        .map_or_else(generate_trace_id, str::to_string)
}

/// Extracts the trace id from `version-trace_id-parent_id-flags`.
///
/// All-zero and malformed ids are rejected.
fn traceparent_trace_id(value: &str) -> Option<&str> {
    let mut parts = value.trim().split('-');
    let _version = parts.next()?;
    let trace_id = parts.next()?;
    let _parent = parts.next()?;
    let valid = trace_id.len() == 32
        && trace_id.bytes().all(|b| b.is_ascii_hexdigit())
        && trace_id.bytes().any(|b| b != b'0');
    valid.then_some(trace_id)
}
