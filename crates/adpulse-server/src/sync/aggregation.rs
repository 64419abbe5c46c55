use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info};

use adpulse_core::metrics::EntityKind;
use adpulse_core::period::{Granularity, Period};
use adpulse_core::reconcile::ReconciliationReport;
use adpulse_core::sync_log::SyncLogEntry;
use adpulse_duckdb::{AggregationRun, DuckDbBackend};

use crate::error::AppError;
use crate::sync::ingestion::now;

type PeriodKey = (String, Granularity, NaiveDate);
type InFlight = Arc<Mutex<HashSet<PeriodKey>>>;

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashSet<PeriodKey>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive claim on one `(client, granularity, period_start)`. Released on drop.
#[derive(Debug)]
pub struct PeriodClaim {
    key: PeriodKey,
    in_flight: InFlight,
}

impl Drop for PeriodClaim {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.key);
    }
}

/// Output of a validate-then-aggregate weekly run.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedAggregation {
    pub aggregation: AggregationRun,
    /// Reconciliation of the rollups as they stood before this run.
    pub validation: BTreeMap<EntityKind, ReconciliationReport>,
    pub data_quality_passed: bool,
}

/// Runs period aggregation under a sync log, allowing at most one run per
/// period at a time within this process.
#[derive(Clone)]
pub struct AggregationService {
    db: Arc<DuckDbBackend>,
    in_flight: InFlight,
}

impl AggregationService {
    pub fn new(db: Arc<DuckDbBackend>) -> Self {
        Self {
            db,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Claim `period` for `client_id`, or fail with a conflict if a run for
    /// the same period is still in flight.
    pub fn claim(&self, client_id: &str, period: &Period) -> Result<PeriodClaim, AppError> {
        let key = (client_id.to_string(), period.granularity, period.start);
        if !lock(&self.in_flight).insert(key.clone()) {
            return Err(AppError::Conflict(format!(
                "{} aggregation for {} starting {} is already running",
                period.granularity, client_id, period.start
            )));
        }
        Ok(PeriodClaim {
            key,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Claim the period and record a pending sync log for it.
    pub async fn begin(
        &self,
        client_id: &str,
        period: &Period,
    ) -> Result<(PeriodClaim, SyncLogEntry), AppError> {
        let claim = self.claim(client_id, period)?;
        let log = self
            .db
            .create_sync_log(client_id, period.granularity.sync_type(), period.start, now())
            .await?;
        Ok((claim, log))
    }

    /// Drive a pending sync log through aggregation. The claim is held until
    /// the run has finished and the log is final. Any failure, including one
    /// to start the log, ends with the log marked failed.
    pub async fn run(
        &self,
        claim: PeriodClaim,
        log: SyncLogEntry,
        period: Period,
    ) -> anyhow::Result<AggregationRun> {
        let _claim = claim;
        let client_id = log.client_id.as_str();

        let result = async {
            self.db.mark_sync_running(&log.id, now()).await?;
            let run = self.db.aggregate_period(client_id, &period).await?;
            self.db
                .complete_sync_log(&log.id, run.records_processed(), now())
                .await?;
            anyhow::Ok(run)
        }
        .await;

        if let Err(err) = &result {
            error!(
                client_id,
                granularity = %period.granularity,
                period_start = %period.start,
                error = %err,
                "aggregation failed"
            );
            if let Err(log_err) = self
                .db
                .fail_sync_log(&log.id, &format!("{err:#}"), 0, now())
                .await
            {
                error!(sync_log_id = %log.id, error = %log_err, "could not record aggregation failure");
            }
        }
        result
    }

    /// Aggregate `period` and wait for the result.
    pub async fn aggregate(&self, client_id: &str, period: Period) -> Result<AggregationRun, AppError> {
        let (claim, log) = self.begin(client_id, &period).await?;
        Ok(self.run(claim, log, period).await?)
    }

    /// Reconcile the week's existing rollups, then aggregate it.
    ///
    /// The reconciliation only reports; it never prevents the run.
    pub async fn validate_and_aggregate_weekly(
        &self,
        client_id: &str,
        week_start: NaiveDate,
    ) -> Result<ValidatedAggregation, AppError> {
        let period = Period::week(week_start)?;
        let claim = self.claim(client_id, &period)?;

        let mut validation = BTreeMap::new();
        for kind in EntityKind::ALL {
            let report = self.db.reconcile_period(client_id, kind, &period).await?;
            validation.insert(kind, report);
        }
        let data_quality_passed = validation.values().all(|r| r.is_consistent);

        let log = self
            .db
            .create_sync_log(client_id, period.granularity.sync_type(), period.start, now())
            .await?;
        let aggregation = self.run(claim, log, period).await?;
        info!(client_id, %week_start, data_quality_passed, "validated weekly aggregation finished");

        Ok(ValidatedAggregation {
            aggregation,
            validation,
            data_quality_passed,
        })
    }
}
