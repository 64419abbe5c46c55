use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use adpulse_core::retention::DataCategory;

use crate::routes::{required, today};
use crate::sync::ingestion::now;
use crate::{error::AppError, state::AppState};

/// `GET /api/v1/analytics/retention-policy`
pub async fn retention_policy(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "data": state.config.retention.to_json() }))
}

/// `GET /api/v1/analytics/archival-candidates`: rows past each category's
/// archive cutoff. Read-only.
pub async fn archival_candidates(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let candidates = state
        .db
        .archival_candidates(&state.config.retention, today())
        .await?;
    let total: i64 = candidates.iter().map(|c| c.records_to_archive).sum();
    Ok(Json(json!({
        "data": {
            "candidates": candidates,
            "total_records_to_archive": total,
        }
    })))
}

/// `GET /api/v1/analytics/data-usage`
pub async fn data_usage(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let usage = state.db.data_usage().await?;
    let total: i64 = usage.iter().map(|u| u.total_records).sum();
    Ok(Json(json!({
        "data": {
            "categories": usage,
            "total_records": total,
        }
    })))
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceParams {
    pub data_type: Option<String>,
    pub dry_run: Option<bool>,
}

impl MaintenanceParams {
    fn category(&self) -> Result<DataCategory, AppError> {
        Ok(required(self.data_type.as_deref(), "data_type")?.parse::<DataCategory>()?)
    }

    /// Destructive maintenance only runs when explicitly asked to.
    fn dry_run(&self) -> bool {
        self.dry_run.unwrap_or(true)
    }
}

/// `POST /api/v1/analytics/archive-data`
#[tracing::instrument(skip(state))]
pub async fn archive_data(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MaintenanceParams>,
) -> Result<impl IntoResponse, AppError> {
    let category = params.category()?;
    let outcome = state
        .db
        .archive_category(
            &state.config.retention,
            category,
            &state.config.archive_dir,
            params.dry_run(),
            now(),
        )
        .await?;
    Ok(Json(json!({ "data": outcome })))
}

/// `DELETE /api/v1/analytics/cleanup-old-data`
#[tracing::instrument(skip(state))]
pub async fn cleanup_old_data(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MaintenanceParams>,
) -> Result<impl IntoResponse, AppError> {
    let category = params.category()?;
    let outcome = state
        .db
        .cleanup_category(&state.config.retention, category, params.dry_run(), today())
        .await?;
    Ok(Json(json!({ "data": outcome })))
}
