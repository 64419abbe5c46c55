pub mod http;

use async_trait::async_trait;
use chrono::NaiveDate;

use adpulse_core::metrics::RawRecord;
use adpulse_core::source::{FetchFilters, FetchGranularity, MetricsSource, SourceError};

pub use http::HttpMetricsSource;

/// Stand-in used when no ads platform credentials are configured. Every
/// fetch fails, so sync runs are recorded as failed instead of silently
/// storing nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredSource;

#[async_trait]
impl MetricsSource for UnconfiguredSource {
    async fn fetch_metrics(
        &self,
        _account: &str,
        _start: NaiveDate,
        _end: NaiveDate,
        _granularity: FetchGranularity,
        _filters: &FetchFilters,
    ) -> Result<Vec<RawRecord>, SourceError> {
        Err(SourceError::NotConfigured)
    }
}
