use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use adpulse_core::metrics::EntityKind;
use adpulse_core::period::Period;
use adpulse_core::validation::QualityScore;

use crate::routes::{days_back, required, required_date, today};
use crate::{error::AppError, state::AppState};

const DEFAULT_DAYS_BACK: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct ValidationParams {
    pub client_id: Option<String>,
    pub week_start: Option<String>,
    pub entity_kind: Option<String>,
}

/// `GET /api/v1/analytics/aggregation-validation`: reconcile one week's
/// rollups against their daily records. Read-only.
#[tracing::instrument(skip(state))]
pub async fn aggregation_validation(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ValidationParams>,
) -> Result<impl IntoResponse, AppError> {
    let client_id = required(params.client_id.as_deref(), "client_id")?;
    let week_start = required_date(params.week_start.as_deref(), "week_start")?;
    let kind = EntityKind::parse_or_default(params.entity_kind.as_deref())?;
    let period = Period::week(week_start)?;

    let report = state.db.reconcile_period(client_id, kind, &period).await?;
    if !report.is_consistent {
        tracing::warn!(
            client_id,
            entity_kind = %kind,
            week_start = %week_start,
            discrepancies = report.discrepancies.len(),
            "rollups disagree with daily data"
        );
    }
    Ok(Json(json!({
        "data": {
            "client_id": client_id,
            "entity_kind": kind,
            "report": report,
        }
    })))
}

#[derive(Debug, Deserialize)]
pub struct ScanParams {
    pub client_id: Option<String>,
    pub days_back: Option<i64>,
    pub entity_kind: Option<String>,
}

/// `GET /api/v1/analytics/anomalies`
pub async fn anomalies(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ScanParams>,
) -> Result<impl IntoResponse, AppError> {
    let client_id = required(params.client_id.as_deref(), "client_id")?;
    let days = days_back(params.days_back, DEFAULT_DAYS_BACK)?;
    let kind = EntityKind::parse_or_default(params.entity_kind.as_deref())?;

    let report = state.db.detect_anomalies(client_id, kind, days, today()).await?;
    Ok(Json(json!({
        "data": {
            "client_id": client_id,
            "entity_kind": kind,
            "days_back": days,
            "anomalies": report,
        }
    })))
}

/// `GET /api/v1/analytics/data-quality`: anomaly scan condensed into a score.
pub async fn data_quality(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ScanParams>,
) -> Result<impl IntoResponse, AppError> {
    let client_id = required(params.client_id.as_deref(), "client_id")?;
    let days = days_back(params.days_back, DEFAULT_DAYS_BACK)?;
    let kind = EntityKind::parse_or_default(params.entity_kind.as_deref())?;

    let report = state.db.detect_anomalies(client_id, kind, days, today()).await?;
    let quality = QualityScore::from_report(&report);
    Ok(Json(json!({
        "data": {
            "client_id": client_id,
            "entity_kind": kind,
            "days_back": days,
            "quality": quality,
        }
    })))
}
