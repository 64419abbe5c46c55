use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use adpulse_core::config::Config;
use adpulse_core::period::days_in_range;
use adpulse_core::source::{FetchFilters, FetchGranularity, MetricsSource};
use adpulse_core::sync_log::{SyncStatus, SyncType};
use adpulse_core::validation::validate_record;
use adpulse_duckdb::DuckDbBackend;

pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Result of syncing one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayOutcome {
    pub sync_log_id: String,
    pub date: NaiveDate,
    pub status: SyncStatus,
    pub records_fetched: usize,
    pub records_stored: usize,
    pub records_rejected: usize,
    /// Invalid records stored anyway because rejection is disabled.
    pub records_flagged: usize,
    pub error: Option<String>,
}

impl DayOutcome {
    fn pending(sync_log_id: &str, date: NaiveDate) -> Self {
        Self {
            sync_log_id: sync_log_id.to_string(),
            date,
            status: SyncStatus::Pending,
            records_fetched: 0,
            records_stored: 0,
            records_rejected: 0,
            records_flagged: 0,
            error: None,
        }
    }

    fn failed(mut self, message: String) -> Self {
        self.status = SyncStatus::Failed;
        self.error = Some(message);
        self
    }
}

/// Summary of a multi-day sync. Failed days do not stop the range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeReport {
    pub client_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_days: usize,
    pub successful_days: usize,
    pub failed_days: usize,
    pub failed_dates: Vec<NaiveDate>,
    pub success_rate: f64,
    pub records_stored: usize,
    pub records_rejected: usize,
}

/// Pulls daily records from the ads platform into the daily tables.
///
/// Every day is one sync log and one storage transaction. The source is
/// always asked for a single day at daily granularity; records it returns for
/// any other date are rejected rather than re-dated.
#[derive(Clone)]
pub struct IngestionService {
    db: Arc<DuckDbBackend>,
    source: Arc<dyn MetricsSource>,
    default_currency: String,
    reject_invalid: bool,
}

impl IngestionService {
    pub fn new(db: Arc<DuckDbBackend>, source: Arc<dyn MetricsSource>, config: &Config) -> Self {
        Self {
            db,
            source,
            default_currency: config.default_currency.clone(),
            reject_invalid: config.reject_invalid_records,
        }
    }

    /// Create the pending sync log for `date` and run it to completion.
    pub async fn ingest_day(
        &self,
        client_id: &str,
        date: NaiveDate,
        sync_type: SyncType,
        filters: &FetchFilters,
    ) -> Result<DayOutcome> {
        let log = self.db.create_sync_log(client_id, sync_type, date, now()).await?;
        Ok(self.run_day(client_id, date, &log.id, filters).await)
    }

    /// Run an already created pending sync log for `date`.
    ///
    /// Never returns an error: failures end up on the sync log and in the
    /// returned outcome.
    pub async fn run_day(
        &self,
        client_id: &str,
        date: NaiveDate,
        sync_log_id: &str,
        filters: &FetchFilters,
    ) -> DayOutcome {
        let mut outcome = DayOutcome::pending(sync_log_id, date);
        if let Err(err) = self.db.mark_sync_running(sync_log_id, now()).await {
            error!(client_id, %date, sync_log_id, error = %err, "could not start sync");
            return outcome.failed(format!("{err:#}"));
        }

        outcome.status = SyncStatus::Running;
        match self.fetch_and_store(client_id, date, filters, &mut outcome).await {
            Ok(()) => {
                let stored = outcome.records_stored as i64;
                if let Err(err) = self.db.complete_sync_log(sync_log_id, stored, now()).await {
                    error!(sync_log_id, error = %err, "could not complete sync log");
                    return outcome.failed(format!("{err:#}"));
                }
                outcome.status = SyncStatus::Completed;
                info!(
                    client_id,
                    %date,
                    fetched = outcome.records_fetched,
                    stored = outcome.records_stored,
                    rejected = outcome.records_rejected,
                    "daily sync completed"
                );
                outcome
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(client_id, %date, sync_log_id, error = %message, "daily sync failed");
                if let Err(log_err) = self.db.fail_sync_log(sync_log_id, &message, 0, now()).await {
                    error!(sync_log_id, error = %log_err, "could not record sync failure");
                }
                outcome.records_stored = 0;
                outcome.failed(message)
            }
        }
    }

    async fn fetch_and_store(
        &self,
        client_id: &str,
        date: NaiveDate,
        filters: &FetchFilters,
        outcome: &mut DayOutcome,
    ) -> Result<()> {
        let raw = self
            .source
            .fetch_metrics(client_id, date, date, FetchGranularity::Daily, filters)
            .await?;
        outcome.records_fetched = raw.len();

        let mut entities = Vec::with_capacity(raw.len());
        let mut records = Vec::with_capacity(raw.len());
        for record in raw {
            if record.date != date {
                warn!(
                    client_id,
                    entity_id = %record.entity_id,
                    requested = %date,
                    returned = %record.date,
                    "record outside requested day rejected"
                );
                outcome.records_rejected += 1;
                continue;
            }
            let check = validate_record(&record);
            if !check.is_valid {
                if self.reject_invalid || record.totals().is_none() {
                    warn!(
                        client_id,
                        entity_id = %record.entity_id,
                        %date,
                        errors = ?check.errors,
                        "invalid record rejected"
                    );
                    outcome.records_rejected += 1;
                    continue;
                }
                outcome.records_flagged += 1;
            }
            entities.push(record.entity(client_id));
            if let Some(metric) = record.into_metric_record(client_id, &self.default_currency) {
                records.push(metric);
            }
        }

        outcome.records_stored = self.db.store_daily_batch(&entities, &records).await?;
        Ok(())
    }

    /// Sync every day of `[start, end]` in order, continuing past failures.
    pub async fn ingest_range(
        &self,
        client_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        sync_type: SyncType,
        filters: &FetchFilters,
    ) -> RangeReport {
        let mut report = RangeReport {
            client_id: client_id.to_string(),
            start_date: start,
            end_date: end,
            total_days: 0,
            successful_days: 0,
            failed_days: 0,
            failed_dates: Vec::new(),
            success_rate: 0.0,
            records_stored: 0,
            records_rejected: 0,
        };

        for day in days_in_range(start, end) {
            report.total_days += 1;
            let outcome = match self.ingest_day(client_id, day, sync_type, filters).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(client_id, date = %day, error = %err, "could not create sync log");
                    report.failed_days += 1;
                    report.failed_dates.push(day);
                    continue;
                }
            };
            report.records_rejected += outcome.records_rejected;
            if outcome.status == SyncStatus::Completed {
                report.successful_days += 1;
                report.records_stored += outcome.records_stored;
            } else {
                report.failed_days += 1;
                report.failed_dates.push(day);
            }
        }

        if report.total_days > 0 {
            report.success_rate = report.successful_days as f64 / report.total_days as f64 * 100.0;
        }
        info!(
            client_id,
            %start,
            %end,
            successful_days = report.successful_days,
            failed_days = report.failed_days,
            "range sync finished"
        );
        report
    }
}
