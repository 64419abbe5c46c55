pub mod aggregation;
pub mod backend;
pub mod metrics;
pub mod retention;
pub mod schema;
pub mod sync_log;

pub use aggregation::AggregationRun;
pub use backend::DuckDbBackend;

/// Re-export the `duckdb` crate so consumers (especially tests) can use
/// `adpulse_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
