use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// `TraceLayer` logs every request through `tracing`; `CorsLayer` allows
/// the configured frontend origins, or any origin when none are configured.
pub fn build_app(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/sync/daily", post(routes::sync::sync_daily))
        .route("/sync/historical", post(routes::sync::sync_historical))
        .route("/sync/aggregate/weekly", post(routes::sync::aggregate_weekly))
        .route(
            "/sync/aggregate/weekly/validated",
            post(routes::sync::aggregate_weekly_validated),
        )
        .route("/sync/aggregate/monthly", post(routes::sync::aggregate_monthly))
        .route("/sync/status", get(routes::sync::sync_status))
        .route("/sync/aggregation-status", get(routes::sync::aggregation_status))
        .route("/sync/logs", delete(routes::sync::cleanup_logs))
        .route("/sync/backfill", post(routes::backfill::start_backfill))
        .route("/sync/backfill/{job_id}", get(routes::backfill::backfill_progress))
        .route(
            "/analytics/aggregation-validation",
            get(routes::analytics::aggregation_validation),
        )
        .route("/analytics/anomalies", get(routes::analytics::anomalies))
        .route("/analytics/data-quality", get(routes::analytics::data_quality))
        .route(
            "/analytics/retention-policy",
            get(routes::retention::retention_policy),
        )
        .route(
            "/analytics/archival-candidates",
            get(routes::retention::archival_candidates),
        )
        .route("/analytics/data-usage", get(routes::retention::data_usage))
        .route("/analytics/archive-data", post(routes::retention::archive_data))
        .route(
            "/analytics/cleanup-old-data",
            delete(routes::retention::cleanup_old_data),
        );

    let cors = cors_layer(&state.config.cors_origins);
    Router::new()
        .route("/health", get(routes::health::health))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(allowed)
    }
}
