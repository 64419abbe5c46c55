use std::sync::Arc;

use adpulse_core::config::Config;
use adpulse_core::source::MetricsSource;
use adpulse_duckdb::DuckDbBackend;

use crate::sync::{AggregationService, BackfillRegistry, IngestionService};

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
///
/// The services share the same backend handle; each is cheap to clone.
pub struct AppState {
    /// The DuckDB backend. Internally uses `Arc<tokio::sync::Mutex<Connection>>`
    /// so every write is serialized.
    pub db: Arc<DuckDbBackend>,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    pub ingestion: IngestionService,

    /// Holds the per-period single-flight guard for aggregation runs.
    pub aggregation: AggregationService,

    /// Backfill jobs started since this process came up.
    pub backfill: BackfillRegistry,
}

impl AppState {
    /// Wire the services around `db`, pulling records from `source`.
    pub fn new(db: DuckDbBackend, config: Config, source: Arc<dyn MetricsSource>) -> Self {
        let db = Arc::new(db);
        let ingestion = IngestionService::new(Arc::clone(&db), source, &config);
        let aggregation = AggregationService::new(Arc::clone(&db));
        let backfill = BackfillRegistry::new(
            Arc::clone(&db),
            ingestion.clone(),
            config.backfill_delay(),
            config.max_backfill_days,
        );
        Self {
            db,
            config: Arc::new(config),
            ingestion,
            aggregation,
            backfill,
        }
    }
}
