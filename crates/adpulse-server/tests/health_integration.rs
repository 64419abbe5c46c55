use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use adpulse_core::config::Config;
use adpulse_duckdb::DuckDbBackend;
use adpulse_server::app::build_app;
use adpulse_server::source::UnconfiguredSource;
use adpulse_server::state::AppState;

fn test_config() -> Config {
    let mut config = Config::from_lookup(|_| None).expect("default config");
    config.port = 0;
    config.data_dir = "/tmp/adpulse-test".to_string();
    config
}

async fn json_body(response: axum::http::Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON")
}

#[tokio::test]
async fn health_returns_200_when_db_reachable() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let state = Arc::new(AppState::new(db, test_config(), Arc::new(UnconfiguredSource)));
    let app = build_app(state);

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build request");

    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let state = Arc::new(AppState::new(db, test_config(), Arc::new(UnconfiguredSource)));
    let app = build_app(state);

    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/nothing-here")
        .body(Body::empty())
        .expect("build request");

    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sync_without_source_is_recorded_as_failed() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let state = Arc::new(AppState::new(db, test_config(), Arc::new(UnconfiguredSource)));

    let day = chrono::NaiveDate::from_ymd_opt(2026, 3, 2).expect("date");
    let outcome = state
        .ingestion
        .ingest_day(
            "act_1",
            day,
            adpulse_core::sync_log::SyncType::Daily,
            &Default::default(),
        )
        .await
        .expect("ingest");
    assert_eq!(outcome.status, adpulse_core::sync_log::SyncStatus::Failed);
    assert!(outcome
        .error
        .as_deref()
        .expect("error")
        .contains("no metrics source configured"));
}
