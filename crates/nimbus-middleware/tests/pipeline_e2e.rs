//! End-to-end pipeline tests.
//!
//! These run the built-in stages together in their default order:
//!
//! 1. Timeout
//! 2. Load shedding
//! 3. Rate limiting
//! 4. Retry
//! 5. Circuit breaker
//! 6. Bulkhead

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nimbus_core::{
    handler_fn, Handler, InvocationContext, NimbusError, NormalizedEnvelope, Params, Response,
    TriggerKind,
};
use nimbus_middleware::stages::{
    BulkheadMiddleware, CircuitBreakerMiddleware, LoadShedMiddleware, RateLimitMiddleware,
    RetryMiddleware, TimeoutMiddleware,
};
use nimbus_middleware::{OverrideMode, Pipeline, StageKind};
use nimbus_resilience::{
    BulkheadConfig, CircuitBreakerConfig, Clock, LoadShedder, ManualClock, RetryPolicy,
};

fn full_pipeline(rate_limit: u64) -> Pipeline {
    Pipeline::builder()
        .use_middleware(TimeoutMiddleware::with_max_duration(Duration::from_secs(2)))
        .use_middleware(LoadShedMiddleware::new(LoadShedder::percentage(0.0)))
        .use_middleware(
            RateLimitMiddleware::builder()
                .limit(rate_limit)
                .window(Duration::from_secs(60))
                .clock(Arc::new(ManualClock::new(0)) as Arc<dyn Clock>)
                .build(),
        )
        .use_middleware(RetryMiddleware::new(
            RetryPolicy::new(3).with_base_delay(Duration::from_millis(20)),
        ))
        .use_middleware(CircuitBreakerMiddleware::from_config(CircuitBreakerConfig {
            failure_threshold: 10,
            ..CircuitBreakerConfig::default()
        }))
        .use_middleware(BulkheadMiddleware::from_config(BulkheadConfig {
            max_concurrent: 4,
            ..BulkheadConfig::default()
        }))
        .build()
}

fn get_user_ctx() -> InvocationContext {
    let envelope = NormalizedEnvelope::builder(TriggerKind::RequestResponse)
        .method("GET")
        .path("/users/42")
        .header("x-forwarded-for", "203.0.113.9")
        .build()
        .unwrap();
    InvocationContext::with_budget(envelope, Duration::from_secs(10))
        .with_route("getUser", [("id", "42")].into_iter().collect::<Params>())
}

#[test]
fn test_default_order_matches_stage_names() {
    let names: Vec<&str> = StageKind::DEFAULT_ORDER.iter().map(|k| k.name()).collect();
    assert_eq!(full_pipeline(10).stage_names(), names);
}

#[tokio::test(start_paused = true)]
async fn test_response_passes_through_unchanged() {
    let pipeline = full_pipeline(10);
    let handler = handler_fn(|ctx| {
        Box::pin(async move {
            let id = ctx.param("id").unwrap_or_default().to_string();
            Response::json(&serde_json::json!({ "id": id }))
        })
    });

    let mut ctx = get_user_ctx();
    let response = pipeline.run(&mut ctx, &handler).await.unwrap();
    assert_eq!(response.body(), &serde_json::json!({ "id": "42" }));
    assert_eq!(response.headers().get("x-ratelimit-limit"), Some("10"));
    assert_eq!(ctx.attempt(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recovered_inside_budget() {
    let calls = Arc::new(AtomicU32::new(0));
    let counted = Arc::clone(&calls);
    let handler = handler_fn(move |_ctx| {
        let n = counted.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if n < 2 {
                Err(NimbusError::external("upstream 503", Some("users-db")))
            } else {
                Ok(Response::ok())
            }
        })
    });

    let mut ctx = get_user_ctx();
    let response = full_pipeline(10).run(&mut ctx, &handler).await.unwrap();
    assert!(response.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(ctx.attempt(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_rejects_before_handler() {
    let pipeline = full_pipeline(1);
    let calls = Arc::new(AtomicU32::new(0));
    let counted = Arc::clone(&calls);
    let handler = handler_fn(move |_ctx| {
        counted.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(Response::ok()) })
    });

    let mut first = get_user_ctx();
    assert!(pipeline.run(&mut first, &handler).await.is_ok());
    let mut second = get_user_ctx();
    let err = pipeline.run(&mut second, &handler).await.unwrap_err();
    assert!(matches!(err, NimbusError::RateLimitExceeded { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_bounds_slow_handler() {
    let handler = handler_fn(|_ctx| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Response::ok())
        })
    });
    let start = tokio::time::Instant::now();
    let mut ctx = get_user_ctx();
    let err = full_pipeline(10).run(&mut ctx, &handler).await.unwrap_err();
    assert!(matches!(err, NimbusError::Timeout { .. }));
    assert!(start.elapsed() <= Duration::from_millis(2_050));
}

#[tokio::test]
async fn test_route_override_replace_drops_global_stages() {
    let global = full_pipeline(1);
    let route_only: Vec<nimbus_middleware::BoxedMiddleware> =
        vec![Arc::new(TimeoutMiddleware::new())];
    let replaced = global.with_overrides(&route_only, OverrideMode::Replace);
    let handler: Arc<dyn Handler> = Arc::new(handler_fn(|_ctx| Box::pin(async { Ok(Response::ok()) })));

    // No rate limit stage any more, so repeated calls all succeed.
    for _ in 0..3 {
        let mut ctx = get_user_ctx();
        assert!(replaced.run(&mut ctx, handler.as_ref()).await.is_ok());
    }
    assert_eq!(replaced.stage_names(), vec!["timeout"]);
}
