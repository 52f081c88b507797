//! Load shedding.
//!
//! Two modes:
//!
//! - **Percentage**: sheds a fixed fraction of traffic. A shared counter
//!   makes it deterministic: of the first `n` calls exactly
//!   `floor(n * fraction)` are shed, spread evenly.
//! - **Priority**: while a [`LoadSignal`] reads at or above a trigger, sheds
//!   calls whose priority is below a threshold.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use nimbus_core::{InvocationContext, NimbusError};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Header read by the default priority extractor.
pub const PRIORITY_HEADER: &str = "x-priority";

const PPM: u64 = 1_000_000;

/// Calls shed among the first `n` at `fraction_ppm`. Widened so long-lived
/// counters cannot overflow.
const fn shed_total(n: u64, fraction_ppm: u64) -> u128 {
    n as u128 * fraction_ppm as u128 / PPM as u128
}

/// A current load reading, conventionally in `0.0..=1.0`.
pub trait LoadSignal: Send + Sync {
    /// Returns the current load.
    fn load(&self) -> f64;
}

/// A load gauge set by hand, e.g. from an external health probe.
#[derive(Debug, Default)]
pub struct ManualLoad {
    bits: AtomicU64,
}

impl ManualLoad {
    /// Creates a gauge reading `load`.
    #[must_use]
    pub fn new(load: f64) -> Self {
        Self {
            bits: AtomicU64::new(load.to_bits()),
        }
    }

    /// Sets the reading.
    pub fn set(&self, load: f64) {
        self.bits.store(load.to_bits(), Ordering::Release);
    }
}

impl LoadSignal for ManualLoad {
    fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

/// Counts in-flight calls against a nominal capacity.
#[derive(Debug)]
pub struct InFlightGauge {
    current: AtomicUsize,
    capacity: usize,
}

impl InFlightGauge {
    /// Creates a gauge for `capacity` concurrent calls.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Marks a call in flight until the guard drops.
    pub fn enter(&self) -> InFlightGuard<'_> {
        self.current.fetch_add(1, Ordering::AcqRel);
        InFlightGuard(&self.current)
    }

    /// Returns the number of calls in flight.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }
}

impl LoadSignal for InFlightGauge {
    fn load(&self) -> f64 {
        self.current() as f64 / self.capacity as f64
    }
}

/// Decrements an [`InFlightGauge`] on drop.
#[derive(Debug)]
pub struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Extracts a call's priority. Higher is more important.
pub trait PriorityExtractor: Send + Sync {
    /// Returns the priority of the invocation.
    fn priority(&self, ctx: &InvocationContext) -> i64;
}

impl<F> PriorityExtractor for F
where
    F: Fn(&InvocationContext) -> i64 + Send + Sync,
{
    fn priority(&self, ctx: &InvocationContext) -> i64 {
        self(ctx)
    }
}

/// Reads priority from a header, defaulting to 0.
#[derive(Debug, Clone)]
pub struct HeaderPriority {
    header: String,
}

impl HeaderPriority {
    /// Reads priority from `header`.
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl Default for HeaderPriority {
    fn default() -> Self {
        Self::new(PRIORITY_HEADER)
    }
}

impl PriorityExtractor for HeaderPriority {
    fn priority(&self, ctx: &InvocationContext) -> i64 {
        ctx.envelope()
            .header(&self.header)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// How the shedder decides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ShedMode {
    /// Shed this fraction (`0.0..=1.0`) of all calls.
    Percentage {
        /// Fraction to shed.
        fraction: f64,
    },
    /// Shed low-priority calls while load is high.
    Priority {
        /// Calls with priority below this are shed.
        threshold: i64,
        /// Load at or above which shedding starts.
        trigger: f64,
    },
}

/// Rejects calls before they consume resources.
pub struct LoadShedder {
    mode: ShedMode,
    fraction_ppm: u64,
    signal: Option<Arc<dyn LoadSignal>>,
    extractor: Arc<dyn PriorityExtractor>,
    seen: AtomicU64,
}

impl std::fmt::Debug for LoadShedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadShedder")
            .field("mode", &self.mode)
            .field("has_signal", &self.signal.is_some())
            .field("seen", &self.seen.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl LoadShedder {
    /// Creates a percentage shedder.
    #[must_use]
    pub fn percentage(fraction: f64) -> Self {
        Self::new(ShedMode::Percentage { fraction })
    }

    /// Creates a priority shedder reading `signal`.
    #[must_use]
    pub fn priority(threshold: i64, trigger: f64, signal: Arc<dyn LoadSignal>) -> Self {
        Self::new(ShedMode::Priority { threshold, trigger }).with_signal(signal)
    }

    /// Creates a shedder in `mode` with the default priority extractor and
    /// no load signal.
    #[must_use]
    pub fn new(mode: ShedMode) -> Self {
        let fraction_ppm = match mode {
            ShedMode::Percentage { fraction } => {
                (fraction.clamp(0.0, 1.0) * PPM as f64).round() as u64
            }
            ShedMode::Priority { .. } => 0,
        };
        Self {
            mode,
            fraction_ppm,
            signal: None,
            extractor: Arc::new(HeaderPriority::default()),
            seen: AtomicU64::new(0),
        }
    }

    /// Sets the load signal.
    #[must_use]
    pub fn with_signal(mut self, signal: Arc<dyn LoadSignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Sets the priority extractor.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn PriorityExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Returns the mode.
    #[must_use]
    pub const fn mode(&self) -> ShedMode {
        self.mode
    }

    /// Admits or sheds one call.
    ///
    /// # Errors
    ///
    /// Returns [`NimbusError::LoadShed`] if the call is shed.
    pub fn check(&self, ctx: &InvocationContext) -> Result<(), NimbusError> {
        match self.mode {
            ShedMode::Percentage { fraction } => {
                let n = self.seen.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
                if shed_total(n, self.fraction_ppm) > shed_total(n.wrapping_sub(1), self.fraction_ppm) {
                    warn!(trace_id = ctx.trace_id(), fraction, "load shed by percentage");
                    return Err(NimbusError::LoadShed {
                        reason: format!("shedding {:.0}% of traffic", fraction * 100.0),
                    });
                }
                Ok(())
            }
            ShedMode::Priority { threshold, trigger } => {
                let Some(signal) = &self.signal else {
                    return Ok(());
                };
                let load = signal.load();
                if load < trigger {
                    return Ok(());
                }
                let priority = self.extractor.priority(ctx);
                if priority < threshold {
                    warn!(trace_id = ctx.trace_id(), load, priority, threshold, "load shed by priority");
                    return Err(NimbusError::LoadShed {
                        reason: format!("load {load:.2} at or above {trigger:.2}, priority {priority} below {threshold}"),
                    });
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::{NormalizedEnvelope, TriggerKind};
    use std::time::Duration;

    fn ctx_with_priority(priority: Option<&str>) -> InvocationContext {
        let mut builder = NormalizedEnvelope::builder(TriggerKind::RequestResponse)
            .method("GET")
            .path("/");
        if let Some(p) = priority {
            builder = builder.header(PRIORITY_HEADER, p);
        }
        InvocationContext::with_budget(builder.build().unwrap(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_percentage_is_exact_and_even() {
        let shedder = LoadShedder::percentage(0.25);
        let ctx = ctx_with_priority(None);
        let outcomes: Vec<bool> = (0..100).map(|_| shedder.check(&ctx).is_err()).collect();

        assert_eq!(outcomes.iter().filter(|shed| **shed).count(), 25);
        // Every 4th call is shed.
        for (i, shed) in outcomes.iter().enumerate() {
            assert_eq!(*shed, (i + 1) % 4 == 0, "call {}", i + 1);
        }
    }

    #[tokio::test]
    async fn test_percentage_prefix_counts() {
        let shedder = LoadShedder::percentage(0.3);
        let ctx = ctx_with_priority(None);
        let mut shed = 0;
        for n in 1..=50_u64 {
            if shedder.check(&ctx).is_err() {
                shed += 1;
            }
            assert_eq!(shed, n * 3 / 10);
        }
    }

    #[test]
    fn test_shed_total_at_counter_limit() {
        assert_eq!(shed_total(u64::MAX, PPM), u128::from(u64::MAX));
        assert!(shed_total(u64::MAX, PPM) > shed_total(u64::MAX - 1, PPM));
        assert_eq!(shed_total(u64::MAX, 0), 0);
        assert_eq!(shed_total(4, PPM / 4), 1);
    }

    #[tokio::test]
    async fn test_percentage_bounds() {
        let ctx = ctx_with_priority(None);
        let none = LoadShedder::percentage(0.0);
        assert!((0..10).all(|_| none.check(&ctx).is_ok()));
        let all = LoadShedder::percentage(1.0);
        assert!((0..10).all(|_| all.check(&ctx).is_err()));
    }

    #[tokio::test]
    async fn test_priority_sheds_only_under_load() {
        let gauge = Arc::new(ManualLoad::new(0.5));
        let shedder = LoadShedder::priority(5, 0.8, gauge.clone());

        let low = ctx_with_priority(Some("1"));
        let high = ctx_with_priority(Some("9"));
        let missing = ctx_with_priority(None);

        assert!(shedder.check(&low).is_ok());

        gauge.set(0.9);
        assert!(matches!(shedder.check(&low), Err(NimbusError::LoadShed { .. })));
        assert!(shedder.check(&missing).is_err());
        assert!(shedder.check(&high).is_ok());
    }

    #[tokio::test]
    async fn test_custom_extractor_and_in_flight_gauge() {
        let gauge = Arc::new(InFlightGauge::new(2));
        let shedder = LoadShedder::new(ShedMode::Priority {
            threshold: 1,
            trigger: 1.0,
        })
        .with_signal(gauge.clone())
        .with_extractor(Arc::new(|ctx: &InvocationContext| {
            i64::from(ctx.envelope().path() == "/vip")
        }));

        let ctx = ctx_with_priority(None);
        let _a = gauge.enter();
        assert!(shedder.check(&ctx).is_ok());
        let _b = gauge.enter();
        assert_eq!(gauge.current(), 2);
        assert!(shedder.check(&ctx).is_err());
    }
}
