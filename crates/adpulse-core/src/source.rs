use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::metrics::RawRecord;

/// Time bucketing requested from the ads platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchGranularity {
    Daily,
}

impl FetchGranularity {
    /// Value of the platform's `time_increment` parameter.
    pub fn time_increment(self) -> &'static str {
        match self {
            FetchGranularity::Daily => "1",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchFilters {
    pub min_spend: Option<Decimal>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source request failed: {0}")]
    Transport(String),

    #[error("source returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("source response could not be decoded: {0}")]
    Decode(String),

    #[error("no metrics source configured")]
    NotConfigured,
}

/// An ads platform that can report per-entity performance records.
#[async_trait]
pub trait MetricsSource: Send + Sync + 'static {
    async fn fetch_metrics(
        &self,
        account: &str,
        start: NaiveDate,
        end: NaiveDate,
        granularity: FetchGranularity,
        filters: &FetchFilters,
    ) -> Result<Vec<RawRecord>, SourceError>;
}
