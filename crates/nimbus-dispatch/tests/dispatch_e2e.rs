//! End-to-end dispatch tests.
//!
//! Raw payloads go in, responses come out, with the pipeline assembled
//! from configuration the way a deployed function would run.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nimbus_config::NimbusConfig;
use nimbus_core::{handler_fn, NimbusError, Response, TriggerKind};
use nimbus_dispatch::{Dispatcher, DispatcherBuilder, HostInvocation, Route};
use nimbus_middleware::StageKind;
use nimbus_router::SourcePattern;
use serde_json::{json, Value};

fn config() -> NimbusConfig {
    let mut config = NimbusConfig::default();
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 50;
    config
}

fn get_user_route() -> Route {
    Route::http(
        "getUser",
        "GET",
        "/users/{id}",
        handler_fn(|ctx| {
            let id = ctx.param("id").unwrap_or_default().to_string();
            Box::pin(async move { Response::json(&json!({ "id": id, "name": "Ada" })) })
        }),
    )
}

fn dispatcher(config: &NimbusConfig, routes: Vec<Route>) -> Dispatcher {
    routes
        .into_iter()
        .fold(DispatcherBuilder::from_config(config).unwrap(), DispatcherBuilder::route)
        .build()
        .unwrap()
}

fn http_v2(method: &str, path: &str) -> Value {
    json!({
        "version": "2.0",
        "rawPath": path,
        "rawQueryString": "",
        "headers": { "x-forwarded-for": "203.0.113.9" },
        "requestContext": {
            "http": { "method": method, "path": path, "sourceIp": "203.0.113.9" },
            "requestId": "req-1",
            "stage": "$default"
        },
        "isBase64Encoded": false
    })
}

fn host() -> HostInvocation {
    HostInvocation::new().with_remaining(Duration::from_secs(3))
}

#[tokio::test(start_paused = true)]
async fn test_get_user_through_full_pipeline() {
    let dispatcher = dispatcher(&config(), vec![get_user_route()]);
    let response = dispatcher
        .dispatch(&http_v2("GET", "/users/42"), &host())
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.body(), &json!({ "id": "42", "name": "Ada" }));
}

#[tokio::test(start_paused = true)]
async fn test_slow_handler_times_out_at_host_deadline() {
    let slow = Route::http(
        "slow",
        "GET",
        "/slow",
        handler_fn(|_ctx| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Response::ok())
            })
        }),
    );
    let dispatcher = dispatcher(&config(), vec![slow]);

    let start = tokio::time::Instant::now();
    let response = dispatcher
        .handle(&http_v2("GET", "/slow"), &HostInvocation::new().with_remaining(Duration::from_secs(1)))
        .await;

    assert_eq!(response.status().as_u16(), 504);
    assert_eq!(response.body()["error"]["code"], json!("TIMEOUT"));
    assert!(start.elapsed() <= Duration::from_millis(950));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retried_inside_budget() {
    let calls = Arc::new(AtomicU32::new(0));
    let counted = Arc::clone(&calls);
    let flaky = Route::http(
        "flaky",
        "POST",
        "/orders",
        handler_fn(move |ctx| {
            let n = counted.fetch_add(1, Ordering::SeqCst);
            let attempt = ctx.attempt();
            Box::pin(async move {
                if n < 2 {
                    Err(NimbusError::external("inventory unavailable", Some("inventory")))
                } else {
                    Response::json(&json!({ "attempt": attempt }))
                }
            })
        }),
    );
    let dispatcher = dispatcher(&config(), vec![flaky]);

    let response = dispatcher
        .dispatch(&http_v2("POST", "/orders"), &host())
        .await
        .unwrap();
    assert_eq!(response.body(), &json!({ "attempt": 3 }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_response_has_retry_after() {
    let mut config = config();
    config.rate_limit.limit = 1;
    let dispatcher = dispatcher(&config, vec![get_user_route()]);

    let first = dispatcher.handle(&http_v2("GET", "/users/1"), &host()).await;
    assert_eq!(first.status().as_u16(), 200);
    assert_eq!(first.headers().get("x-ratelimit-limit"), Some("1"));

    let second = dispatcher.handle(&http_v2("GET", "/users/1"), &host()).await;
    assert_eq!(second.status().as_u16(), 429);
    assert!(second.headers().contains("retry-after"));
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_for_failing_route() {
    let mut config = config();
    config.circuit_breaker.failure_threshold = 2;
    config.middleware_order = vec![StageKind::CircuitBreaker];
    let calls = Arc::new(AtomicU32::new(0));
    let counted = Arc::clone(&calls);
    let failing = Route::http(
        "report",
        "GET",
        "/report",
        handler_fn(move |_ctx| {
            counted.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(NimbusError::internal("database unreachable")) })
        }),
    );
    let dispatcher = dispatcher(&config, vec![failing]);

    for _ in 0..2 {
        let response = dispatcher.handle(&http_v2("GET", "/report"), &host()).await;
        assert_eq!(response.status().as_u16(), 500);
    }
    let response = dispatcher.handle(&http_v2("GET", "/report"), &host()).await;
    assert_eq!(response.status().as_u16(), 503);
    assert!(response.headers().contains("retry-after"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_method_not_allowed_and_not_found() {
    let dispatcher = dispatcher(&config(), vec![get_user_route()]);

    let response = dispatcher.handle(&http_v2("DELETE", "/users/42"), &host()).await;
    assert_eq!(response.status().as_u16(), 405);
    assert_eq!(response.headers().get("allow"), Some("GET"));

    let response = dispatcher.handle(&http_v2("GET", "/teams/7"), &host()).await;
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(response.body()["error"]["code"], json!("ROUTE_NOT_FOUND"));
}

#[tokio::test(start_paused = true)]
async fn test_event_triggers_route_by_source() {
    let nightly = Route::source(
        "nightly",
        TriggerKind::ScheduledTick,
        SourcePattern::exact("nightly-report"),
        handler_fn(|ctx| {
            let at = ctx.envelope().metadata_value("scheduled_time").cloned();
            Box::pin(async move { Response::json(&json!({ "at": at })) })
        }),
    );
    let orders = Route::source(
        "orders",
        TriggerKind::BatchMessage,
        SourcePattern::glob("orders-*").unwrap(),
        handler_fn(|ctx| {
            let count = ctx.envelope().metadata_value("record_count").cloned();
            Box::pin(async move { Response::json(&json!({ "count": count })) })
        }),
    );
    let dispatcher = dispatcher(&config(), vec![nightly, orders]);

    let tick = json!({
        "source": "aws.events",
        "detail-type": "Scheduled Event",
        "time": "2024-05-01T02:00:00Z",
        "resources": ["arn:aws:events:us-east-1:123456789012:rule/nightly-report"],
        "detail": {}
    });
    let response = dispatcher.dispatch(&tick, &host()).await.unwrap();
    assert_eq!(response.body(), &json!({ "at": "2024-05-01T02:00:00Z" }));

    let batch = json!({
        "Records": [
            { "eventSource": "aws:sqs", "eventSourceARN": "arn:aws:sqs:us-east-1:123456789012:orders-eu", "body": "{}" },
            { "eventSource": "aws:sqs", "eventSourceARN": "arn:aws:sqs:us-east-1:123456789012:orders-eu", "body": "{}" }
        ]
    });
    let response = dispatcher.dispatch(&batch, &host()).await.unwrap();
    assert_eq!(response.body(), &json!({ "count": 2 }));
}

#[tokio::test(start_paused = true)]
async fn test_socket_frames_route_by_key() {
    let connect = Route::socket(
        "connect",
        "$connect",
        handler_fn(|ctx| {
            let method = ctx.envelope().method().to_string();
            Box::pin(async move { Response::json(&json!({ "event": method })) })
        }),
    );
    let dispatcher = dispatcher(&config(), vec![connect]);

    let frame = json!({
        "requestContext": {
            "routeKey": "$connect",
            "eventType": "CONNECT",
            "connectionId": "abc123=",
            "stage": "prod"
        }
    });
    let response = dispatcher.dispatch(&frame, &host()).await.unwrap();
    assert_eq!(response.body(), &json!({ "event": "CONNECT" }));
}

#[tokio::test(start_paused = true)]
async fn test_unclassified_payload_is_rejected() {
    let dispatcher = dispatcher(&config(), vec![get_user_route()]);
    let err = dispatcher
        .dispatch(&json!({ "foo": 1, "bar": 2 }), &host())
        .await
        .unwrap_err();
    match err {
        NimbusError::UnclassifiedPayload { keys, .. } => assert_eq!(keys, vec!["bar", "foo"]),
        other => panic!("expected UnclassifiedPayload, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_invocations_share_dispatcher() {
    let dispatcher = Arc::new(dispatcher(&config(), vec![get_user_route()]));
    let mut tasks = Vec::new();
    for id in 0..8 {
        let dispatcher = Arc::clone(&dispatcher);
        tasks.push(tokio::spawn(async move {
            let mut raw = http_v2("GET", &format!("/users/{id}"));
            raw["headers"]["x-forwarded-for"] = json!(format!("198.51.100.{id}"));
            dispatcher.dispatch(&raw, &host()).await
        }));
    }
    for (id, task) in tasks.into_iter().enumerate() {
        let response = task.await.unwrap().unwrap();
        assert_eq!(response.body()["id"], json!(id.to_string()));
    }
}
