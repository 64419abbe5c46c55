use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Duration;
use serde::Deserialize;
use serde_json::json;

use adpulse_core::period::{validate_date_range, Period};
use adpulse_core::source::FetchFilters;
use adpulse_core::sync_log::SyncType;

use crate::routes::{days_back, parse_date, parse_min_spend, required, required_date, today};
use crate::sync::ingestion::now;
use crate::{error::AppError, state::AppState};

const DEFAULT_STATUS_LIMIT: usize = 10;
const MAX_STATUS_LIMIT: usize = 100;
const DEFAULT_DAYS_TO_KEEP: i64 = 30;
const MAX_DAYS_TO_KEEP: i64 = 36_500;

#[derive(Debug, Deserialize)]
pub struct DailySyncParams {
    pub client_id: Option<String>,
    pub sync_date: Option<String>,
}

/// `POST /api/v1/sync/daily`: sync one day (yesterday by default) in the
/// background and return its sync log id.
#[tracing::instrument(skip(state))]
pub async fn sync_daily(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DailySyncParams>,
) -> Result<impl IntoResponse, AppError> {
    let client_id = required(params.client_id.as_deref(), "client_id")?.to_string();
    let date = match params.sync_date.as_deref() {
        Some(raw) => parse_date(raw, "sync_date")?,
        None => today() - Duration::days(1),
    };

    let log = state
        .db
        .create_sync_log(&client_id, SyncType::Daily, date, now())
        .await?;
    let ingestion = state.ingestion.clone();
    let log_id = log.id.clone();
    let task_client = client_id.clone();
    tokio::spawn(async move {
        ingestion
            .run_day(&task_client, date, &log_id, &FetchFilters::default())
            .await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "data": {
                "status": "accepted",
                "sync_log_id": log.id,
                "client_id": client_id,
                "sync_date": date,
            }
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct HistoricalSyncParams {
    pub client_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub min_spend: Option<String>,
}

/// `POST /api/v1/sync/historical`: sync a bounded range day by day in the
/// background.
#[tracing::instrument(skip(state))]
pub async fn sync_historical(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoricalSyncParams>,
) -> Result<impl IntoResponse, AppError> {
    let client_id = required(params.client_id.as_deref(), "client_id")?.to_string();
    let start = required_date(params.start_date.as_deref(), "start_date")?;
    let end = required_date(params.end_date.as_deref(), "end_date")?;
    let days = validate_date_range(start, end, Some(state.config.max_sync_range_days))?;
    let filters = FetchFilters {
        min_spend: parse_min_spend(params.min_spend.as_deref())?,
    };

    let ingestion = state.ingestion.clone();
    let task_client = client_id.clone();
    tokio::spawn(async move {
        ingestion
            .ingest_range(&task_client, start, end, SyncType::Daily, &filters)
            .await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "data": {
                "status": "accepted",
                "client_id": client_id,
                "start_date": start,
                "end_date": end,
                "days": days,
            }
        })),
    ))
}

/// Claim `period`, record its sync log and run the aggregation on a task.
async fn spawn_aggregation(
    state: &AppState,
    client_id: &str,
    period: Period,
) -> Result<impl IntoResponse, AppError> {
    let (claim, log) = state.aggregation.begin(client_id, &period).await?;
    let sync_log_id = log.id.clone();
    let aggregation = state.aggregation.clone();
    tokio::spawn(async move {
        // Failures are logged and recorded on the sync log by `run`.
        let _ = aggregation.run(claim, log, period).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "data": {
                "status": "accepted",
                "sync_log_id": sync_log_id,
                "client_id": client_id,
                "granularity": period.granularity,
                "period_start": period.start,
                "period_end": period.end,
            }
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct WeeklyParams {
    pub client_id: Option<String>,
    pub week_start: Option<String>,
}

/// `POST /api/v1/sync/aggregate/weekly`
#[tracing::instrument(skip(state))]
pub async fn aggregate_weekly(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WeeklyParams>,
) -> Result<impl IntoResponse, AppError> {
    let client_id = required(params.client_id.as_deref(), "client_id")?;
    let week_start = required_date(params.week_start.as_deref(), "week_start")?;
    let period = Period::week(week_start)?;
    spawn_aggregation(&state, client_id, period).await
}

/// `POST /api/v1/sync/aggregate/weekly/validated`: reconcile then aggregate,
/// waiting for the result.
#[tracing::instrument(skip(state))]
pub async fn aggregate_weekly_validated(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WeeklyParams>,
) -> Result<impl IntoResponse, AppError> {
    let client_id = required(params.client_id.as_deref(), "client_id")?;
    let week_start = required_date(params.week_start.as_deref(), "week_start")?;
    let result = state
        .aggregation
        .validate_and_aggregate_weekly(client_id, week_start)
        .await?;
    Ok(Json(json!({ "data": result })))
}

#[derive(Debug, Deserialize)]
pub struct MonthlyParams {
    pub client_id: Option<String>,
    pub year: Option<i32>,
    pub month: Option<u32>,
}

/// `POST /api/v1/sync/aggregate/monthly`
#[tracing::instrument(skip(state))]
pub async fn aggregate_monthly(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MonthlyParams>,
) -> Result<impl IntoResponse, AppError> {
    let client_id = required(params.client_id.as_deref(), "client_id")?;
    let year = params
        .year
        .ok_or_else(|| AppError::BadRequest("year is required".to_string()))?;
    let month = params
        .month
        .ok_or_else(|| AppError::BadRequest("month is required".to_string()))?;
    let period = Period::month(year, month)?;
    spawn_aggregation(&state, client_id, period).await
}

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    pub client_id: Option<String>,
    pub limit: Option<usize>,
}

/// `GET /api/v1/sync/status`: success summary plus the most recent runs.
pub async fn sync_status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatusParams>,
) -> Result<impl IntoResponse, AppError> {
    let client_id = required(params.client_id.as_deref(), "client_id")?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_STATUS_LIMIT)
        .clamp(1, MAX_STATUS_LIMIT);

    let summary = state.db.sync_summary(client_id).await?;
    let recent = state.db.recent_sync_logs(client_id, limit).await?;
    Ok(Json(json!({
        "data": {
            "client_id": client_id,
            "summary": summary,
            "recent_syncs": recent,
        }
    })))
}

#[derive(Debug, Deserialize)]
pub struct AggregationStatusParams {
    pub client_id: Option<String>,
    pub days_back: Option<i64>,
}

/// `GET /api/v1/sync/aggregation-status`
pub async fn aggregation_status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AggregationStatusParams>,
) -> Result<impl IntoResponse, AppError> {
    let client_id = required(params.client_id.as_deref(), "client_id")?;
    let days = days_back(params.days_back, 30)?;
    let status = state.db.aggregation_status(client_id, days, today()).await?;
    Ok(Json(json!({ "data": status })))
}

#[derive(Debug, Deserialize)]
pub struct CleanupLogsParams {
    pub client_id: Option<String>,
    pub days_to_keep: Option<i64>,
}

/// `DELETE /api/v1/sync/logs`: drop one client's sync logs older than
/// `days_to_keep`.
#[tracing::instrument(skip(state))]
pub async fn cleanup_logs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CleanupLogsParams>,
) -> Result<impl IntoResponse, AppError> {
    let client_id = required(params.client_id.as_deref(), "client_id")?;
    let days_to_keep = params.days_to_keep.unwrap_or(DEFAULT_DAYS_TO_KEEP);
    if !(0..=MAX_DAYS_TO_KEEP).contains(&days_to_keep) {
        return Err(AppError::BadRequest(format!(
            "days_to_keep must be between 0 and {MAX_DAYS_TO_KEEP}"
        )));
    }

    let cutoff = now() - Duration::days(days_to_keep);
    let deleted = state.db.cleanup_sync_logs(client_id, cutoff).await?;
    Ok(Json(json!({
        "data": {
            "client_id": client_id,
            "days_to_keep": days_to_keep,
            "cutoff": cutoff,
            "deleted": deleted,
        }
    })))
}
