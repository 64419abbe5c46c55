use anyhow::{anyhow, bail, Result};
use chrono::{NaiveDate, NaiveDateTime};
use duckdb::types::ToSql;
use duckdb::Connection;

use adpulse_core::sync_log::{
    AggregationStatus, RunCounts, SyncLogEntry, SyncStatus, SyncSummary, SyncType,
};

use crate::backend::{format_date, format_timestamp, parse_date, parse_opt_timestamp, parse_timestamp};
use crate::DuckDbBackend;

const SYNC_LOG_COLUMNS: &str = "id, client_id, sync_type, CAST(period_date AS VARCHAR), status, \
     records_processed, error_message, CAST(started_at AS VARCHAR), \
     CAST(completed_at AS VARCHAR), retry_count, CAST(created_at AS VARCHAR)";

/// Runs listed in an aggregation status report.
const RECENT_AGGREGATION_RUNS: usize = 5;

struct SyncLogRow {
    id: String,
    client_id: String,
    sync_type: String,
    period_date: String,
    status: String,
    records_processed: i64,
    error_message: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    retry_count: i32,
    created_at: String,
}

impl SyncLogRow {
    fn into_entry(self) -> Result<SyncLogEntry> {
        Ok(SyncLogEntry {
            sync_type: self.sync_type.parse().map_err(|e: String| anyhow!(e))?,
            status: self.status.parse().map_err(|e: String| anyhow!(e))?,
            period_date: parse_date(&self.period_date)?,
            started_at: parse_opt_timestamp(self.started_at)?,
            completed_at: parse_opt_timestamp(self.completed_at)?,
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            client_id: self.client_id,
            records_processed: self.records_processed,
            error_message: self.error_message,
            retry_count: self.retry_count,
        })
    }
}

/// Load sync logs matching `filter`, newest first.
/// Sync logs matching `filter`, newest first, at most `limit` rows when given.
pub(crate) fn query_sync_logs(
    conn: &Connection,
    filter: &str,
    params: &[&dyn ToSql],
    limit: Option<usize>,
) -> Result<Vec<SyncLogEntry>> {
    let mut sql = format!(
        "SELECT {SYNC_LOG_COLUMNS} FROM sync_logs WHERE {filter} ORDER BY created_at DESC, id"
    );
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok(SyncLogRow {
            id: row.get(0)?,
            client_id: row.get(1)?,
            sync_type: row.get(2)?,
            period_date: row.get(3)?,
            status: row.get(4)?,
            records_processed: row.get(5)?,
            error_message: row.get(6)?,
            started_at: row.get(7)?,
            completed_at: row.get(8)?,
            retry_count: row.get(9)?,
            created_at: row.get(10)?,
        })
    })?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?.into_entry()?);
    }
    Ok(entries)
}

fn run_counts(conn: &Connection, client_id: &str, sync_type: SyncType, since: NaiveDate) -> Result<RunCounts> {
    let (total, completed, failed): (i64, i64, i64) = conn
        .prepare(
            "SELECT COUNT(*), \
                    COUNT(*) FILTER (WHERE status = 'completed'), \
                    COUNT(*) FILTER (WHERE status = 'failed') \
             FROM sync_logs \
             WHERE client_id = ?1 AND sync_type = ?2 AND created_at >= CAST(?3 AS TIMESTAMP)",
        )?
        .query_row(
            duckdb::params![client_id, sync_type.as_str(), format_date(since)],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
    Ok(RunCounts {
        total,
        completed,
        failed,
    })
}

impl DuckDbBackend {
    /// Record a new `pending` run for `(client_id, sync_type, period_date)`.
    ///
    /// `retry_count` is the number of earlier failed runs for the same key.
    pub async fn create_sync_log(
        &self,
        client_id: &str,
        sync_type: SyncType,
        period_date: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<SyncLogEntry> {
        let conn = self.conn.lock().await;
        let retry_count: i32 = conn
            .prepare(
                "SELECT CAST(COUNT(*) AS INTEGER) FROM sync_logs \
                 WHERE client_id = ?1 AND sync_type = ?2 \
                   AND period_date = CAST(?3 AS DATE) AND status = 'failed'",
            )?
            .query_row(
                duckdb::params![client_id, sync_type.as_str(), format_date(period_date)],
                |row| row.get(0),
            )?;

        let entry = SyncLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            sync_type,
            period_date,
            status: SyncStatus::Pending,
            records_processed: 0,
            error_message: None,
            started_at: None,
            completed_at: None,
            retry_count,
            created_at: now,
        };
        conn.execute(
            r#"INSERT INTO sync_logs (
                id, client_id, sync_type, period_date, status,
                records_processed, retry_count, created_at
            ) VALUES (?1, ?2, ?3, CAST(?4 AS DATE), ?5, 0, ?6, CAST(?7 AS TIMESTAMP))"#,
            duckdb::params![
                entry.id,
                entry.client_id,
                sync_type.as_str(),
                format_date(period_date),
                SyncStatus::Pending.as_str(),
                retry_count,
                format_timestamp(now),
            ],
        )?;
        tracing::debug!(
            sync_log_id = %entry.id,
            client_id,
            sync_type = %sync_type,
            %period_date,
            retry_count,
            "sync log created"
        );
        Ok(entry)
    }

    /// `pending -> running`.
    pub async fn mark_sync_running(&self, id: &str, now: NaiveDateTime) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE sync_logs SET status = 'running', started_at = CAST(?2 AS TIMESTAMP) \
             WHERE id = ?1 AND status = 'pending'",
            duckdb::params![id, format_timestamp(now)],
        )?;
        if changed == 0 {
            bail!("sync log {id} is not pending");
        }
        Ok(())
    }

    /// `running -> completed`.
    pub async fn complete_sync_log(
        &self,
        id: &str,
        records_processed: i64,
        now: NaiveDateTime,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE sync_logs SET status = 'completed', records_processed = ?2, \
                 completed_at = CAST(?3 AS TIMESTAMP) \
             WHERE id = ?1 AND status = 'running'",
            duckdb::params![id, records_processed, format_timestamp(now)],
        )?;
        if changed == 0 {
            bail!("sync log {id} is not running");
        }
        Ok(())
    }

    /// `pending | running -> failed`. A run may fail before it starts, e.g.
    /// when a concurrent run already holds its period.
    pub async fn fail_sync_log(
        &self,
        id: &str,
        error: &str,
        records_processed: i64,
        now: NaiveDateTime,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE sync_logs SET status = 'failed', error_message = ?2, records_processed = ?3, \
                 started_at = COALESCE(started_at, CAST(?4 AS TIMESTAMP)), \
                 completed_at = CAST(?4 AS TIMESTAMP) \
             WHERE id = ?1 AND status IN ('pending', 'running')",
            duckdb::params![id, error, records_processed, format_timestamp(now)],
        )?;
        if changed == 0 {
            bail!("sync log {id} has already finished");
        }
        Ok(())
    }

    pub async fn get_sync_log(&self, id: &str) -> Result<Option<SyncLogEntry>> {
        let conn = self.conn.lock().await;
        Ok(query_sync_logs(&conn, "id = ?1", duckdb::params![id], Some(1))?
            .into_iter()
            .next())
    }

    /// Most recent runs for a client, newest first.
    pub async fn recent_sync_logs(&self, client_id: &str, limit: usize) -> Result<Vec<SyncLogEntry>> {
        let conn = self.conn.lock().await;
        query_sync_logs(&conn, "client_id = ?1", duckdb::params![client_id], Some(limit))
    }

    /// Totals over every run for a client. Success rate counts finished and
    /// unfinished runs alike.
    pub async fn sync_summary(&self, client_id: &str) -> Result<SyncSummary> {
        let conn = self.conn.lock().await;
        let (total, completed, failed): (i64, i64, i64) = conn
            .prepare(
                "SELECT COUNT(*), \
                        COUNT(*) FILTER (WHERE status = 'completed'), \
                        COUNT(*) FILTER (WHERE status = 'failed') \
                 FROM sync_logs WHERE client_id = ?1",
            )?
            .query_row(duckdb::params![client_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
        Ok(SyncSummary::new(total, completed, failed))
    }

    /// Weekly and monthly aggregation runs created on or after `today - days_back`.
    pub async fn aggregation_status(
        &self,
        client_id: &str,
        days_back: i64,
        today: NaiveDate,
    ) -> Result<AggregationStatus> {
        let since = today - chrono::Duration::days(days_back);
        let conn = self.conn.lock().await;
        let weekly = run_counts(&conn, client_id, SyncType::Weekly, since)?;
        let monthly = run_counts(&conn, client_id, SyncType::Monthly, since)?;
        let recent_runs = query_sync_logs(
            &conn,
            "client_id = ?1 AND sync_type IN ('weekly', 'monthly') \
             AND created_at >= CAST(?2 AS TIMESTAMP)",
            duckdb::params![client_id, format_date(since)],
            Some(RECENT_AGGREGATION_RUNS),
        )?;
        Ok(AggregationStatus {
            days_back,
            weekly,
            monthly,
            recent_runs,
        })
    }

    /// Delete one client's sync logs created before `cutoff`. Returns the
    /// number of rows removed.
    pub async fn cleanup_sync_logs(&self, client_id: &str, cutoff: NaiveDateTime) -> Result<usize> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM sync_logs WHERE client_id = ?1 AND created_at < CAST(?2 AS TIMESTAMP)",
            duckdb::params![client_id, format_timestamp(cutoff)],
        )?;
        tracing::info!(client_id, deleted, %cutoff, "sync logs cleaned up");
        Ok(deleted)
    }
}
