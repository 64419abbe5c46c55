use anyhow::Result;
use chrono::{Duration, NaiveDate};
use serde::Serialize;

use adpulse_core::anomaly::{detect_anomalies, AnomalyReport};
use adpulse_core::metrics::EntityKind;
use adpulse_core::period::{Granularity, Period};
use adpulse_core::reconcile::{reconcile, ReconciliationReport};
use adpulse_core::rollup::summarize;

use crate::backend::format_date;
use crate::metrics::{load_daily_range, query_rollups, upsert_rollups};
use crate::DuckDbBackend;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationRun {
    pub granularity: Granularity,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub ads_aggregated: usize,
    pub campaigns_aggregated: usize,
}

impl AggregationRun {
    pub fn records_processed(&self) -> i64 {
        (self.ads_aggregated + self.campaigns_aggregated) as i64
    }
}

impl DuckDbBackend {
    /// Roll the client's daily ads and campaigns for `period` into rollups.
    ///
    /// Both kinds are written in one transaction; if either fails (for
    /// example a currency conflict) nothing is committed. Re-running over
    /// unchanged daily data rewrites identical rows.
    pub async fn aggregate_period(&self, client_id: &str, period: &Period) -> Result<AggregationRun> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let mut counts = [0usize; 2];
        for (slot, kind) in EntityKind::ALL.into_iter().enumerate() {
            let daily = load_daily_range(&tx, client_id, kind, period.start, period.end)?;
            let rollups = summarize(period, &daily)?;
            upsert_rollups(&tx, &rollups)?;
            counts[slot] = rollups.len();
        }
        tx.commit()?;

        let run = AggregationRun {
            granularity: period.granularity,
            period_start: period.start,
            period_end: period.end,
            ads_aggregated: counts[0],
            campaigns_aggregated: counts[1],
        };
        tracing::info!(
            client_id,
            granularity = %period.granularity,
            period_start = %period.start,
            ads = run.ads_aggregated,
            campaigns = run.campaigns_aggregated,
            "aggregation committed"
        );
        Ok(run)
    }

    /// Compare the stored rollups of one kind for `period` with their daily sources.
    pub async fn reconcile_period(
        &self,
        client_id: &str,
        kind: EntityKind,
        period: &Period,
    ) -> Result<ReconciliationReport> {
        let conn = self.conn.lock().await;
        let daily = load_daily_range(&conn, client_id, kind, period.start, period.end)?;
        let rollups = query_rollups(
            &conn,
            kind,
            period.granularity,
            "client_id = ?1 AND period_start = CAST(?2 AS DATE)",
            duckdb::params![client_id, format_date(period.start)],
        )?;
        Ok(reconcile(period, &daily, &rollups))
    }

    /// Scan the trailing `days_back` days of one kind for anomalies.
    pub async fn detect_anomalies(
        &self,
        client_id: &str,
        kind: EntityKind,
        days_back: i64,
        today: NaiveDate,
    ) -> Result<AnomalyReport> {
        let start = today - Duration::days(days_back.max(0));
        let conn = self.conn.lock().await;
        let records = load_daily_range(&conn, client_id, kind, start, today)?;
        Ok(detect_anomalies(&records, today, days_back))
    }
}
