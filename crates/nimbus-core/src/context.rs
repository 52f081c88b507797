//! Invocation context types.
//!
//! The [`InvocationContext`] carries all per-invocation state through the
//! middleware pipeline and into handlers. It is owned by the dispatcher's
//! call frame and only ever lent out as `&mut`, so it cannot outlive the
//! invocation.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use nimbus_router::Params;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::envelope::NormalizedEnvelope;
use crate::identity::Principal;

/// A unique identifier for each invocation, using UUID v7.
///
/// UUID v7 is time-ordered, which keeps log lines for a burst of
/// invocations sorted by arrival.
///
/// # Example
///
/// ```
/// use nimbus_core::InvocationId;
///
/// let id = InvocationId::new();
/// println!("Invocation ID: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(Uuid);

impl InvocationId {
    /// Creates a new unique invocation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates an `InvocationId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for InvocationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Generates a 32-hex-digit trace id.
#[must_use]
pub fn generate_trace_id() -> String {
    Uuid::now_v7().simple().to_string()
}

/// A detached view of an invocation's cancellation state.
///
/// Fires on explicit cancellation or when the deadline passes. Cheap to
/// clone; middleware hands it to work it races against.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    rx: watch::Receiver<bool>,
    deadline: Instant,
}

impl CancellationSignal {
    /// Returns true if the invocation was cancelled or its deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || Instant::now() >= self.deadline
    }

    /// Resolves once the invocation is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        tokio::select! {
            () = tokio::time::sleep_until(self.deadline) => {}
            () = async move {
                let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                if closed {
                    // Context dropped without cancelling; only the deadline remains.
                    std::future::pending::<()>().await;
                }
            } => {}
        }
    }
}

/// Per-invocation state that flows through the middleware pipeline.
///
/// Holds the envelope, the resolved route and its parameters, a scratch
/// store keyed by string, typed extensions, the absolute deadline with its
/// cancellation signal, correlation ids, the principal and the attempt
/// counter.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use nimbus_core::{InvocationContext, NormalizedEnvelope, TriggerKind};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let envelope = NormalizedEnvelope::builder(TriggerKind::RequestResponse)
///     .method("GET")
///     .path("/users/42")
///     .build()
///     .unwrap();
/// let mut ctx = InvocationContext::with_budget(envelope, Duration::from_secs(3));
/// ctx.set("tenant", String::from("acme"));
/// assert_eq!(ctx.get::<String>("tenant").map(String::as_str), Some("acme"));
/// assert_eq!(ctx.attempt(), 1);
/// # }
/// ```
pub struct InvocationContext {
    envelope: NormalizedEnvelope,
    route_id: Option<String>,
    params: Params,
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    deadline: Instant,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    trace_id: String,
    invocation_id: InvocationId,
    principal: Option<Principal>,
    attempt: u32,
    started_at: Instant,
}

impl InvocationContext {
    /// Creates a context with an absolute deadline and a generated trace id.
    #[must_use]
    pub fn new(envelope: NormalizedEnvelope, deadline: Instant) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            envelope,
            route_id: None,
            params: Params::new(),
            values: HashMap::new(),
            extensions: HashMap::new(),
            deadline,
            cancel_tx,
            cancel_rx,
            trace_id: generate_trace_id(),
            invocation_id: InvocationId::new(),
            principal: None,
            attempt: 1,
            started_at: Instant::now(),
        }
    }

    /// Creates a context whose deadline is `budget` from now.
    #[must_use]
    pub fn with_budget(envelope: NormalizedEnvelope, budget: Duration) -> Self {
        Self::new(envelope, Instant::now() + budget)
    }

    /// Sets the trace id.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// Sets the resolved route id and parameters.
    #[must_use]
    pub fn with_route(mut self, route_id: impl Into<String>, params: Params) -> Self {
        self.route_id = Some(route_id.into());
        self.params = params;
        self
    }

    /// Returns the envelope.
    #[must_use]
    pub const fn envelope(&self) -> &NormalizedEnvelope {
        &self.envelope
    }

    /// Returns the resolved route id.
    #[must_use]
    pub fn route_id(&self) -> Option<&str> {
        self.route_id.as_deref()
    }

    /// Returns a route parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Returns all route parameters.
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// Returns a scratch value if present and of type `T`.
    #[must_use]
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Stores a scratch value, replacing any previous value under `key`.
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Removes a scratch value, returning it if it was of type `T`.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        self.values
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|b| *b)
    }

    /// Returns the extension of type `T`.
    #[must_use]
    pub fn extension<T: Any>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns a mutable reference to the extension of type `T`.
    pub fn extension_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// Inserts an extension, replacing any previous value of type `T`.
    pub fn insert_extension<T: Any + Send + Sync>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Returns the absolute deadline.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Moves the deadline earlier. Later deadlines are ignored.
    pub fn tighten_deadline(&mut self, deadline: Instant) {
        if deadline < self.deadline {
            self.deadline = deadline;
        }
    }

    /// Returns the time left before the deadline, zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Returns true once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Cancels the invocation. Idempotent.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Returns true if the invocation was cancelled or its deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow() || self.is_expired()
    }

    /// Returns a detached cancellation signal.
    #[must_use]
    pub fn cancellation(&self) -> CancellationSignal {
        CancellationSignal {
            rx: self.cancel_rx.clone(),
            deadline: self.deadline,
        }
    }

    /// Resolves once the invocation is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        self.cancellation().cancelled().await;
    }

    /// Returns the trace id.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Returns the invocation id.
    #[must_use]
    pub const fn invocation_id(&self) -> InvocationId {
        self.invocation_id
    }

    /// Returns the authenticated principal.
    #[must_use]
    pub const fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Sets the authenticated principal.
    pub fn set_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    /// Returns the 1-based attempt number.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Sets the attempt number.
    pub fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt.max(1);
    }

    /// Returns when the context was created.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the time since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("invocation_id", &self.invocation_id)
            .field("trace_id", &self.trace_id)
            .field("kind", &self.envelope.kind())
            .field("path", &self.envelope.path())
            .field("route_id", &self.route_id)
            .field("params", &self.params)
            .field("attempt", &self.attempt)
            .field("principal", &self.principal.as_ref().map(Principal::log_id))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::TriggerKind;

    fn envelope() -> NormalizedEnvelope {
        NormalizedEnvelope::builder(TriggerKind::RequestResponse)
            .method("GET")
            .path("/users/42")
            .build()
            .unwrap()
    }

    #[test]
    fn test_invocation_ids_are_unique() {
        assert_ne!(InvocationId::new(), InvocationId::new());
        assert_eq!(generate_trace_id().len(), 32);
    }

    #[tokio::test]
    async fn test_scratch_store_is_typed() {
        let mut ctx = InvocationContext::with_budget(envelope(), Duration::from_secs(1));
        ctx.set("count", 3_u32);
        assert_eq!(ctx.get::<u32>("count"), Some(&3));
        assert_eq!(ctx.get::<String>("count"), None);
        assert_eq!(ctx.remove::<u32>("count"), Some(3));
        assert!(ctx.get::<u32>("count").is_none());
    }

    #[tokio::test]
    async fn test_extensions_by_type() {
        #[derive(Debug, PartialEq)]
        struct Tenant(&'static str);

        let mut ctx = InvocationContext::with_budget(envelope(), Duration::from_secs(1));
        ctx.insert_extension(Tenant("acme"));
        assert_eq!(ctx.extension::<Tenant>(), Some(&Tenant("acme")));
        if let Some(t) = ctx.extension_mut::<Tenant>() {
            t.0 = "globex";
        }
        assert_eq!(ctx.extension::<Tenant>(), Some(&Tenant("globex")));
    }

    #[tokio::test]
    async fn test_route_params() {
        let params = [("id", "42")].into_iter().collect();
        let ctx = InvocationContext::with_budget(envelope(), Duration::from_secs(1))
            .with_route("getUser", params)
            .with_trace_id("trace-abc");
        assert_eq!(ctx.param("id"), Some("42"));
        assert_eq!(ctx.route_id(), Some("getUser"));
        assert_eq!(ctx.trace_id(), "trace-abc");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry() {
        let ctx = InvocationContext::with_budget(envelope(), Duration::from_millis(100));
        assert!(!ctx.is_expired());
        assert_eq!(ctx.remaining(), Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(ctx.is_expired());
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_resolves_on_deadline() {
        let ctx = InvocationContext::with_budget(envelope(), Duration::from_millis(50));
        let start = Instant::now();
        ctx.cancelled().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_resolves_on_explicit_cancel() {
        let ctx = InvocationContext::with_budget(envelope(), Duration::from_secs(60));
        let signal = ctx.cancellation();
        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
            Instant::now()
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();
        let fired_at = waiter.await.unwrap();
        assert!(fired_at.duration_since(ctx.started_at()) < Duration::from_secs(1));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_tighten_deadline_only_moves_earlier() {
        let mut ctx = InvocationContext::with_budget(envelope(), Duration::from_secs(10));
        let original = ctx.deadline();
        ctx.tighten_deadline(original + Duration::from_secs(5));
        assert_eq!(ctx.deadline(), original);
        ctx.tighten_deadline(original - Duration::from_secs(5));
        assert!(ctx.deadline() < original);
    }

    #[tokio::test]
    async fn test_attempt_is_one_based() {
        let mut ctx = InvocationContext::with_budget(envelope(), Duration::from_secs(1));
        assert_eq!(ctx.attempt(), 1);
        ctx.set_attempt(3);
        assert_eq!(ctx.attempt(), 3);
        ctx.set_attempt(0);
        assert_eq!(ctx.attempt(), 1);
    }
}
