//! HTTP surface tests: probes, ledger summary, and the admin clock.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use deposit_service::clock::ControllableClock;
use deposit_service::config::{AccrualConfig, CorrelatorConfig, DepositConfig, TreasuryConfig};
use deposit_service::handlers::admin::ADMIN_TOKEN_HEADER;
use deposit_service::services::{init_metrics, CorrelatedLookups, InMemoryStore};
use deposit_service::startup::{router, AppState, StoreHandle};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use service_core::config::Config as CommonConfig;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const ADMIN_TOKEN: &str = "test-admin-token";

fn test_config() -> DepositConfig {
    DepositConfig {
        common: CommonConfig::default(),
        service_name: "deposit-service-test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: None,
        accrual: AccrualConfig::default(),
        correlator: CorrelatorConfig {
            timeout: Duration::from_millis(50),
        },
        treasury: TreasuryConfig::default(),
        admin_token: Some(ADMIN_TOKEN.to_string()),
    }
}

fn test_state() -> AppState {
    common::init_tracing();
    init_metrics();
    let lookups = CorrelatedLookups::over_channels(Duration::from_millis(50), 16);
    AppState::assemble(
        test_config(),
        StoreHandle::Memory(Arc::new(InMemoryStore::new())),
        Arc::new(ControllableClock::new()),
        &lookups,
    )
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("Failed to send request");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn admin_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header(ADMIN_TOKEN_HEADER, ADMIN_TOKEN)
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

fn parse_time(value: &Value) -> DateTime<Utc> {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .expect("timestamp in response")
}

#[tokio::test]
async fn health_reports_memory_store() {
    let app = router(test_state());

    let (status, body) = send(
        &app,
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "memory");

    let (ready, _) = send(&app, Request::get("/ready").body(Body::empty()).unwrap()).await;
    assert_eq!(ready, StatusCode::OK);
}

#[tokio::test]
async fn ledger_summary_reflects_wallet_activity() {
    let state = test_state();
    state
        .wallet
        .issue("alice", dec!(1000), None)
        .await
        .expect("Failed to issue");
    state
        .wallet
        .transfer("alice", "bob", dec!(300), Some("t1"))
        .await
        .expect("Failed to transfer");
    let app = router(state);

    let (status, body) = send(
        &app,
        Request::get("/ledger/summary").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ledger_total"], "1000");
    assert_eq!(body["wallet_supply"], "1000");
    assert_eq!(body["variance"], "0");
    assert_eq!(body["entry_count"], 3);
}

#[tokio::test]
async fn admin_clock_requires_token() {
    let app = router(test_state());

    let (status, _) = send(
        &app,
        Request::get("/admin/clock").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/admin/clock/reset")
            .header(ADMIN_TOKEN_HEADER, "wrong")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_clock_set_advance_reset() {
    let state = test_state();
    let clock = state.clock.clone();
    let app = router(state);

    let (status, body) = send(
        &app,
        admin_post("/admin/clock/set", json!({ "at": "2025-01-01T00:00:00Z" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overridden"], true);
    assert_eq!(
        parse_time(&body["now"]),
        "2025-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
    );

    let (status, body) = send(
        &app,
        admin_post("/admin/clock/advance", json!({ "days": 2, "hours": 6 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        parse_time(&body["now"]),
        "2025-01-03T06:00:00Z".parse::<DateTime<Utc>>().unwrap()
    );
    assert!(clock.is_overridden());

    let (status, _) = send(&app, admin_post("/admin/clock/advance", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, admin_post("/admin/clock/reset", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overridden"], false);
    assert!(!clock.is_overridden());
}

#[tokio::test]
async fn metrics_endpoint_serves_text() {
    let app = router(test_state());

    let response = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("deposit_ledger_variance"));
}
