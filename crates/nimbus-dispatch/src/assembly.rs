//! Builds the global pipeline from configuration.

use std::sync::Arc;

use nimbus_config::{LoadShedModeKind, NimbusConfig};
use nimbus_middleware::stages::{
    BulkheadMiddleware, CircuitBreakerMiddleware, LoadShedMiddleware, RateLimitMiddleware,
    RetryMiddleware, TimeoutMiddleware,
};
use nimbus_middleware::{Pipeline, StageKind};
use nimbus_resilience::{BulkheadRegistry, InFlightGauge, LoadShedder, LoadSignal};

/// Builds the stages listed in `middleware_order`, outermost first.
///
/// In priority mode the load shedder reads the bulkhead registry's
/// saturation when a bulkhead stage is configured, and otherwise an
/// in-flight gauge sized to `bulkhead.max_concurrent`.
///
/// # Example
///
/// ```
/// use nimbus_config::NimbusConfig;
/// use nimbus_dispatch::pipeline_from_config;
///
/// let pipeline = pipeline_from_config(&NimbusConfig::development());
/// assert_eq!(pipeline.stage_names(), vec!["timeout", "retry", "circuit_breaker", "bulkhead"]);
/// ```
#[must_use]
pub fn pipeline_from_config(config: &NimbusConfig) -> Pipeline {
    let bulkheads = Arc::new(BulkheadRegistry::new(config.bulkhead.to_config()));

    let mut builder = Pipeline::builder();
    for kind in &config.middleware_order {
        builder = match kind {
            StageKind::Timeout => {
                builder.use_middleware(TimeoutMiddleware::from_config(config.timeout.to_config()))
            }
            StageKind::LoadShed => builder.use_middleware(load_shed_stage(config, &bulkheads)),
            StageKind::RateLimit => builder.use_middleware(
                RateLimitMiddleware::builder()
                    .config(config.rate_limit.to_config())
                    .key_func(Arc::new(config.rate_limit.key()))
                    .build(),
            ),
            StageKind::Retry => {
                builder.use_middleware(RetryMiddleware::new(config.retry.to_policy()))
            }
            StageKind::CircuitBreaker => builder.use_middleware(
                CircuitBreakerMiddleware::from_config(config.circuit_breaker.to_config())
                    .with_classifier(Arc::new(config.circuit_breaker.classifier())),
            ),
            StageKind::Bulkhead => {
                builder.use_middleware(BulkheadMiddleware::new(Arc::clone(&bulkheads)))
            }
        };
    }
    builder.build()
}

fn load_shed_stage(config: &NimbusConfig, bulkheads: &Arc<BulkheadRegistry>) -> LoadShedMiddleware {
    let shedder = LoadShedder::new(config.load_shed.to_mode());
    if config.load_shed.mode == LoadShedModeKind::Percentage {
        return LoadShedMiddleware::new(shedder);
    }

    if config.has_stage(StageKind::Bulkhead) {
        let signal: Arc<dyn LoadSignal> = Arc::clone(bulkheads) as Arc<dyn LoadSignal>;
        return LoadShedMiddleware::new(shedder.with_signal(signal));
    }
    let gauge = Arc::new(InFlightGauge::new(config.bulkhead.max_concurrent));
    let signal: Arc<dyn LoadSignal> = Arc::clone(&gauge) as Arc<dyn LoadSignal>;
    LoadShedMiddleware::new(shedder.with_signal(signal)).with_gauge(gauge)
}
