use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use adpulse_core::source::FetchFilters;

use crate::routes::{parse_min_spend, required, required_date};
use crate::sync::backfill::BackfillRequest;
use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct BackfillParams {
    pub client_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub force_refresh: Option<bool>,
    pub min_spend: Option<String>,
}

/// `POST /api/v1/sync/backfill`: start a backfill job and return its id.
#[tracing::instrument(skip(state))]
pub async fn start_backfill(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BackfillParams>,
) -> Result<impl IntoResponse, AppError> {
    let request = BackfillRequest {
        client_id: required(params.client_id.as_deref(), "client_id")?.to_string(),
        start: required_date(params.start_date.as_deref(), "start_date")?,
        end: required_date(params.end_date.as_deref(), "end_date")?,
        force_refresh: params.force_refresh.unwrap_or(false),
        filters: FetchFilters {
            min_spend: parse_min_spend(params.min_spend.as_deref())?,
        },
    };
    let job_id = state.backfill.start(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "data": {
                "job_id": job_id,
                "status": "running",
            }
        })),
    ))
}

/// `GET /api/v1/sync/backfill/{job_id}`
pub async fn backfill_progress(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let progress = state
        .backfill
        .progress(&job_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("backfill job {job_id} not found")))?;
    Ok(Json(json!({ "data": progress })))
}
