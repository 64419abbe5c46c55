pub mod anomaly;
pub mod config;
pub mod error;
pub mod metrics;
pub mod period;
pub mod reconcile;
pub mod retention;
pub mod rollup;
pub mod source;
pub mod sync_log;
pub mod validation;
