use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::NaiveDate;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use adpulse_core::config::Config;
use adpulse_core::metrics::{EntityKind, RawRecord};
use adpulse_core::period::Period;
use adpulse_core::source::{FetchFilters, FetchGranularity, MetricsSource, SourceError};
use adpulse_core::sync_log::{SyncStatus, SyncType};
use adpulse_duckdb::DuckDbBackend;
use adpulse_server::app::build_app;
use adpulse_server::state::AppState;

const CLIENT: &str = "act_1";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn test_config() -> Config {
    let mut config = Config::from_lookup(|_| None).expect("default config");
    config.port = 0;
    config.data_dir = "/tmp/adpulse-test".to_string();
    config.backfill_delay_ms = 0;
    config
}

fn raw(entity_id: &str, kind: EntityKind, day: NaiveDate, impressions: i64, clicks: i64) -> RawRecord {
    RawRecord {
        entity_id: entity_id.to_string(),
        entity_kind: kind,
        entity_name: Some(format!("{entity_id} name")),
        parent_id: None,
        date: day,
        attribution: "default".to_string(),
        currency: None,
        impressions: Some(impressions),
        clicks: Some(clicks),
        spend: Some("10.00".parse().expect("decimal")),
        conversions: 1,
        conversion_value: "50.00".parse().expect("decimal"),
        frequency: 1.5,
        ctr: None,
        cpc: None,
        cpm: None,
        roas: None,
    }
}

/// Serves scripted records per requested day; listed days fail upstream.
#[derive(Default)]
struct ScriptedSource {
    records: HashMap<NaiveDate, Vec<RawRecord>>,
    failing: HashSet<NaiveDate>,
}

impl ScriptedSource {
    fn with_day(mut self, day: NaiveDate, records: Vec<RawRecord>) -> Self {
        self.records.insert(day, records);
        self
    }

    fn failing_on(mut self, day: NaiveDate) -> Self {
        self.failing.insert(day);
        self
    }

    fn with_week(mut self, monday: NaiveDate) -> Self {
        for offset in 0..7 {
            let day = monday + chrono::Duration::days(offset);
            self.records.insert(
                day,
                vec![
                    raw("ad_1", EntityKind::Ad, day, 100, 10),
                    raw("cmp_1", EntityKind::Campaign, day, 100, 10),
                ],
            );
        }
        self
    }
}

#[async_trait]
impl MetricsSource for ScriptedSource {
    async fn fetch_metrics(
        &self,
        _account: &str,
        start: NaiveDate,
        _end: NaiveDate,
        granularity: FetchGranularity,
        _filters: &FetchFilters,
    ) -> Result<Vec<RawRecord>, SourceError> {
        assert_eq!(granularity, FetchGranularity::Daily);
        if self.failing.contains(&start) {
            return Err(SourceError::Status {
                status: 500,
                body: "upstream unavailable".to_string(),
            });
        }
        Ok(self.records.get(&start).cloned().unwrap_or_default())
    }
}

fn state_with(source: ScriptedSource, config: Config) -> Arc<AppState> {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    Arc::new(AppState::new(db, config, Arc::new(source)))
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

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

async fn wait_for_terminal(state: &AppState, sync_log_id: &str) -> SyncStatus {
    for _ in 0..200 {
        let log = state
            .db
            .get_sync_log(sync_log_id)
            .await
            .expect("get log")
            .expect("log exists");
        if log.status.is_terminal() {
            return log.status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("sync log {sync_log_id} never finished");
}

#[tokio::test]
async fn non_monday_week_is_rejected_before_any_storage_access() {
    let state = state_with(ScriptedSource::default(), test_config());
    let app = build_app(Arc::clone(&state));

    let response = app
        .oneshot(request(
            "POST",
            "/api/v1/sync/aggregate/weekly?client_id=act_1&week_start=2026-03-03",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "validation_error");
    assert!(json["error"]["message"]
        .as_str()
        .expect("message")
        .contains("Monday"));

    let logs = state.db.recent_sync_logs(CLIENT, 10).await.expect("logs");
    assert!(logs.is_empty());
}

#[tokio::test]
async fn month_outside_calendar_is_rejected() {
    let state = state_with(ScriptedSource::default(), test_config());
    let app = build_app(state);

    let response = app
        .oneshot(request(
            "POST",
            "/api/v1/sync/aggregate/monthly?client_id=act_1&year=2026&month=13",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn historical_range_is_bounded_and_ordered() {
    let state = state_with(ScriptedSource::default(), test_config());
    let app = build_app(state);

    let too_long = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/sync/historical?client_id=act_1&start_date=2026-01-01&end_date=2026-04-30",
        ))
        .await
        .expect("request");
    assert_eq!(too_long.status(), StatusCode::BAD_REQUEST);
    let json = json_body(too_long).await;
    assert!(json["error"]["message"]
        .as_str()
        .expect("message")
        .contains("too large"));

    let reversed = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/sync/historical?client_id=act_1&start_date=2026-03-05&end_date=2026-03-01",
        ))
        .await
        .expect("request");
    assert_eq!(reversed.status(), StatusCode::BAD_REQUEST);

    let just_over = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/sync/historical?client_id=act_1&start_date=2026-01-01&end_date=2026-04-02",
        ))
        .await
        .expect("request");
    assert_eq!(just_over.status(), StatusCode::BAD_REQUEST);

    let at_limit = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/sync/historical?client_id=act_1&start_date=2026-01-01&end_date=2026-04-01",
        ))
        .await
        .expect("request");
    assert_eq!(at_limit.status(), StatusCode::ACCEPTED);
    let json = json_body(at_limit).await;
    assert_eq!(json["data"]["days"], 91);

    let missing_client = app
        .oneshot(request(
            "POST",
            "/api/v1/sync/historical?start_date=2026-03-01&end_date=2026-03-02",
        ))
        .await
        .expect("request");
    assert_eq!(missing_client.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn daily_sync_is_accepted_and_completes_in_background() {
    let day = date(2026, 3, 2);
    let source = ScriptedSource::default().with_day(
        day,
        vec![
            raw("ad_1", EntityKind::Ad, day, 1000, 40),
            raw("cmp_1", EntityKind::Campaign, day, 1000, 40),
        ],
    );
    let state = state_with(source, test_config());
    let app = build_app(Arc::clone(&state));

    let response = app
        .oneshot(request(
            "POST",
            "/api/v1/sync/daily?client_id=act_1&sync_date=2026-03-02",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = json_body(response).await;
    let sync_log_id = json["data"]["sync_log_id"].as_str().expect("id").to_string();

    assert_eq!(wait_for_terminal(&state, &sync_log_id).await, SyncStatus::Completed);
    let log = state
        .db
        .get_sync_log(&sync_log_id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(log.records_processed, 2);
    assert_eq!(log.sync_type, SyncType::Daily);

    let ads = state
        .db
        .daily_records(CLIENT, EntityKind::Ad, day, day)
        .await
        .expect("daily");
    assert_eq!(ads.len(), 1);
    assert_eq!(ads[0].currency, "USD");
    assert!((ads[0].ratios().ctr - 4.0).abs() < 1e-9);
}

#[tokio::test]
async fn range_sync_continues_past_a_failing_day() {
    let first = date(2026, 3, 2);
    let second = date(2026, 3, 3);
    let third = date(2026, 3, 4);
    let source = ScriptedSource::default()
        .with_day(first, vec![raw("ad_1", EntityKind::Ad, first, 100, 10)])
        .failing_on(second)
        .with_day(third, vec![raw("ad_1", EntityKind::Ad, third, 100, 10)]);
    let state = state_with(source, test_config());

    let report = state
        .ingestion
        .ingest_range(CLIENT, first, third, SyncType::Daily, &FetchFilters::default())
        .await;
    assert_eq!(report.total_days, 3);
    assert_eq!(report.successful_days, 2);
    assert_eq!(report.failed_days, 1);
    assert_eq!(report.failed_dates, vec![second]);
    assert!((report.success_rate - 200.0 / 3.0).abs() < 1e-9);
    assert_eq!(report.records_stored, 2);

    let logs = state.db.recent_sync_logs(CLIENT, 10).await.expect("logs");
    let failed: Vec<_> = logs
        .iter()
        .filter(|l| l.status == SyncStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].period_date, second);
    assert!(failed[0]
        .error_message
        .as_deref()
        .expect("error message")
        .contains("500"));
}

#[tokio::test]
async fn invalid_and_misdated_records_are_rejected() {
    let day = date(2026, 3, 2);
    let source = ScriptedSource::default().with_day(
        day,
        vec![
            raw("ad_ok", EntityKind::Ad, day, 100, 10),
            raw("ad_bad", EntityKind::Ad, day, 10, 50),
            raw("ad_late", EntityKind::Ad, date(2026, 3, 1), 100, 10),
        ],
    );
    let state = state_with(source, test_config());

    let outcome = state
        .ingestion
        .ingest_day(CLIENT, day, SyncType::Daily, &FetchFilters::default())
        .await
        .expect("ingest");
    assert_eq!(outcome.status, SyncStatus::Completed);
    assert_eq!(outcome.records_fetched, 3);
    assert_eq!(outcome.records_stored, 1);
    assert_eq!(outcome.records_rejected, 2);

    let stored = state
        .db
        .daily_records(CLIENT, EntityKind::Ad, date(2026, 3, 1), day)
        .await
        .expect("daily");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].key.entity_id, "ad_ok");
}

#[tokio::test]
async fn flagged_records_are_kept_when_rejection_is_disabled() {
    let day = date(2026, 3, 2);
    let mut missing_spend = raw("ad_partial", EntityKind::Ad, day, 100, 10);
    missing_spend.spend = None;
    let source = ScriptedSource::default().with_day(
        day,
        vec![
            raw("ad_ok", EntityKind::Ad, day, 100, 10),
            raw("ad_bad", EntityKind::Ad, day, 10, 50),
            missing_spend,
        ],
    );
    let mut config = test_config();
    config.reject_invalid_records = false;
    let state = state_with(source, config);

    let outcome = state
        .ingestion
        .ingest_day(CLIENT, day, SyncType::Daily, &FetchFilters::default())
        .await
        .expect("ingest");
    assert_eq!(outcome.records_stored, 2);
    assert_eq!(outcome.records_flagged, 1);
    // A record without its required totals cannot be stored at all.
    assert_eq!(outcome.records_rejected, 1);
}

#[tokio::test]
async fn concurrent_aggregation_of_same_period_conflicts() {
    let state = state_with(ScriptedSource::default(), test_config());
    let period = Period::week(date(2026, 3, 2)).expect("monday");
    let _claim = state.aggregation.claim(CLIENT, &period).expect("first claim");
    let app = build_app(Arc::clone(&state));

    let response = app
        .oneshot(request(
            "POST",
            "/api/v1/sync/aggregate/weekly?client_id=act_1&week_start=2026-03-02",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "conflict");
}

#[tokio::test]
async fn weekly_aggregation_is_accepted_and_recorded() {
    let monday = date(2026, 3, 2);
    let state = state_with(ScriptedSource::default().with_week(monday), test_config());
    state
        .ingestion
        .ingest_range(
            CLIENT,
            monday,
            date(2026, 3, 8),
            SyncType::Daily,
            &FetchFilters::default(),
        )
        .await;
    let app = build_app(Arc::clone(&state));

    let response = app
        .oneshot(request(
            "POST",
            "/api/v1/sync/aggregate/weekly?client_id=act_1&week_start=2026-03-02",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = json_body(response).await;
    assert_eq!(json["data"]["period_end"], "2026-03-08");
    let sync_log_id = json["data"]["sync_log_id"].as_str().expect("id").to_string();

    assert_eq!(wait_for_terminal(&state, &sync_log_id).await, SyncStatus::Completed);
    let log = state
        .db
        .get_sync_log(&sync_log_id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(log.sync_type, SyncType::Weekly);
    assert_eq!(log.records_processed, 2);
}

#[tokio::test]
async fn validated_weekly_aggregation_reports_quality() {
    let monday = date(2026, 3, 2);
    let state = state_with(ScriptedSource::default().with_week(monday), test_config());
    state
        .ingestion
        .ingest_range(
            CLIENT,
            monday,
            date(2026, 3, 8),
            SyncType::Daily,
            &FetchFilters::default(),
        )
        .await;
    let app = build_app(Arc::clone(&state));

    let response = app
        .oneshot(request(
            "POST",
            "/api/v1/sync/aggregate/weekly/validated?client_id=act_1&week_start=2026-03-02",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["aggregation"]["ads_aggregated"], 1);
    assert_eq!(json["data"]["aggregation"]["campaigns_aggregated"], 1);
    assert_eq!(json["data"]["data_quality_passed"], true);
    assert_eq!(json["data"]["validation"]["ad"]["daily_count"], 7);

    let status = build_app(Arc::clone(&state))
        .oneshot(request(
            "GET",
            "/api/v1/sync/aggregation-status?client_id=act_1&days_back=365",
        ))
        .await
        .expect("request");
    assert_eq!(status.status(), StatusCode::OK);
}

#[tokio::test]
async fn sync_status_summarizes_recent_runs() {
    let day = date(2026, 3, 2);
    let source = ScriptedSource::default()
        .with_day(day, vec![raw("ad_1", EntityKind::Ad, day, 100, 10)])
        .failing_on(date(2026, 3, 3));
    let state = state_with(source, test_config());
    state
        .ingestion
        .ingest_range(CLIENT, day, date(2026, 3, 3), SyncType::Daily, &FetchFilters::default())
        .await;
    let app = build_app(state);

    let response = app
        .oneshot(request("GET", "/api/v1/sync/status?client_id=act_1&limit=1"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["summary"]["total_syncs"], 2);
    assert_eq!(json["data"]["summary"]["successful_syncs"], 1);
    assert_eq!(json["data"]["summary"]["failed_syncs"], 1);
    assert_eq!(json["data"]["recent_syncs"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn negative_days_to_keep_is_rejected() {
    let state = state_with(ScriptedSource::default(), test_config());
    let app = build_app(state);

    let response = app
        .oneshot(request(
            "DELETE",
            "/api/v1/sync/logs?client_id=act_1&days_to_keep=-1",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

async fn wait_for_backfill(app: &axum::Router, job_id: &str) -> Value {
    for _ in 0..200 {
        let response = app
            .clone()
            .oneshot(request("GET", &format!("/api/v1/sync/backfill/{job_id}")))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        if json["data"]["status"] == "completed" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("backfill {job_id} never finished");
}

#[tokio::test]
async fn backfill_skips_days_with_data_and_tracks_progress() {
    let first = date(2026, 3, 2);
    let second = date(2026, 3, 3);
    let third = date(2026, 3, 4);
    let source = ScriptedSource::default()
        .with_day(first, vec![raw("ad_1", EntityKind::Ad, first, 100, 10)])
        .with_day(second, vec![raw("ad_1", EntityKind::Ad, second, 100, 10)])
        .failing_on(third);
    let state = state_with(source, test_config());
    state
        .ingestion
        .ingest_day(CLIENT, first, SyncType::Daily, &FetchFilters::default())
        .await
        .expect("seed first day");
    let app = build_app(Arc::clone(&state));

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/sync/backfill?client_id=act_1&start_date=2026-03-02&end_date=2026-03-04",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = json_body(response).await;
    let job_id = json["data"]["job_id"].as_str().expect("job id").to_string();

    let progress = wait_for_backfill(&app, &job_id).await;
    let data = &progress["data"];
    assert_eq!(data["total_days"], 3);
    assert_eq!(data["completed_days"], 3);
    assert_eq!(data["skipped_days"], 1);
    assert_eq!(data["percentage"], 100.0);
    assert_eq!(data["records_stored"], 1);
    assert_eq!(data["error_count"], 1);
    assert_eq!(data["errors"][0]["date"], "2026-03-04");

    let logs = state.db.recent_sync_logs(CLIENT, 10).await.expect("logs");
    let backfill_runs = logs
        .iter()
        .filter(|l| l.sync_type == SyncType::Backfill)
        .count();
    assert_eq!(backfill_runs, 2);
}

#[tokio::test]
async fn backfill_range_is_validated_and_unknown_jobs_are_404() {
    let state = state_with(ScriptedSource::default(), test_config());
    let app = build_app(state);

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/sync/backfill?client_id=act_1&start_date=2026-03-04&end_date=2026-03-02",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(request("GET", "/api/v1/sync/backfill/no-such-job"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "not_found");
}
