use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use adpulse_core::source::MetricsSource;
use adpulse_server::source::{HttpMetricsSource, UnconfiguredSource};
use adpulse_server::state::AppState;

/// `adpulse health`: liveness probe for container health checks.
///
/// Calls `GET http://localhost:$ADPULSE_PORT/health` and exits 0 on HTTP 200,
/// 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("ADPULSE_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }

    // Structured JSON logging; level controlled via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("adpulse=info".parse()?),
        )
        .json()
        .init();

    let cfg = adpulse_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/adpulse.db", cfg.data_dir);
    let db = adpulse_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    let source: Arc<dyn MetricsSource> = match &cfg.source {
        Some(source_cfg) => {
            info!(base_url = %source_cfg.base_url, "ads platform source configured");
            Arc::new(HttpMetricsSource::new(source_cfg)?)
        }
        None => {
            warn!("ADPULSE_SOURCE_URL not set; sync runs will fail until a source is configured");
            Arc::new(UnconfiguredSource)
        }
    };

    info!(
        archive_dir = %cfg.archive_dir.display(),
        max_sync_range_days = cfg.max_sync_range_days,
        reject_invalid_records = cfg.reject_invalid_records,
        "configuration loaded"
    );

    let addr = format!("0.0.0.0:{}", cfg.port);
    let state = Arc::new(AppState::new(db, cfg.clone(), source));
    let app = adpulse_server::app::build_app(state);

    info!(port = cfg.port, "adpulse listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
