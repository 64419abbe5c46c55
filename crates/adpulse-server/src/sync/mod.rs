pub mod aggregation;
pub mod backfill;
pub mod ingestion;

pub use aggregation::AggregationService;
pub use backfill::BackfillRegistry;
pub use ingestion::IngestionService;
