use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;

use adpulse_core::config::SourceConfig;
use adpulse_core::metrics::RawRecord;
use adpulse_core::source::{FetchFilters, FetchGranularity, MetricsSource, SourceError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct InsightsResponse {
    #[serde(default)]
    data: Vec<RawRecord>,
}

/// Ads platform insights client.
///
/// Calls `GET {base}/accounts/{account}/insights` with a bearer token and
/// decodes the `{"data": [...]}` envelope into typed records.
#[derive(Debug, Clone)]
pub struct HttpMetricsSource {
    http: Client,
    base_url: String,
    token: String,
}

impl HttpMetricsSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn insights_url(&self, account: &str) -> String {
        format!("{}/accounts/{}/insights", self.base_url, account)
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn fetch_metrics(
        &self,
        account: &str,
        start: NaiveDate,
        end: NaiveDate,
        granularity: FetchGranularity,
        filters: &FetchFilters,
    ) -> Result<Vec<RawRecord>, SourceError> {
        let mut query = vec![
            ("since", start.format("%Y-%m-%d").to_string()),
            ("until", end.format("%Y-%m-%d").to_string()),
            ("time_increment", granularity.time_increment().to_string()),
        ];
        if let Some(min_spend) = filters.min_spend {
            query.push(("min_spend", min_spend.to_string()));
        }

        let url = self.insights_url(account);
        tracing::debug!(%url, %start, %end, "fetching insights");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .query(&query)
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .json::<InsightsResponse>()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        Ok(body.data)
    }
}
