use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use duckdb::Connection;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::info;

use crate::schema::{init_sql, BASELINE_MIGRATION, MIGRATIONS_TABLE_SQL};

const TIMESTAMP_WRITE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const TIMESTAMP_READ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A DuckDB backend for adpulse.
///
/// DuckDB is single-writer: concurrent reads are fine, but concurrent writes
/// cause contention. The connection sits behind `Arc<Mutex<_>>` so every
/// unit of work (one day's ingestion, one period's aggregation, one
/// retention sweep) runs alone, while the struct stays cheap to clone and
/// share across Axum handlers and background tasks.
///
/// Memory and thread limits are enforced by [`init_sql`] at open time.
#[derive(Clone)]
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"1GB"` or `"512MB"`.
    /// Runs [`MIGRATIONS_TABLE_SQL`] then the schema init SQL so all tables
    /// and indexes exist before the first request.
    pub fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("opening DuckDB at {path}"))?;
        Self::init(&conn, memory_limit)?;
        info!(
            "DuckDB opened at {} with memory_limit={}, threads=2",
            path, memory_limit
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an **in-memory** DuckDB database.
    ///
    /// Intended for tests: data is discarded when the last clone is dropped.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn, "1GB")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection, memory_limit: &str) -> Result<()> {
        conn.execute_batch(MIGRATIONS_TABLE_SQL)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        conn.execute(
            "INSERT OR IGNORE INTO _migrations (id) VALUES (?1)",
            duckdb::params![BASELINE_MIGRATION],
        )?;
        Ok(())
    }

    /// Execute `SELECT 1` as a lightweight liveness check.
    ///
    /// Called by the `/health` endpoint.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    /// Acquire the DuckDB connection lock for direct queries.
    ///
    /// Intended for integration tests that need to inspect or tamper with
    /// stored rows. Production code should use the typed methods.
    pub async fn conn_for_test(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_WRITE_FORMAT).to_string()
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("invalid stored date {raw:?}"))
}

pub(crate) fn parse_opt_date(raw: Option<String>) -> Result<Option<NaiveDate>> {
    raw.as_deref().map(parse_date).transpose()
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_READ_FORMAT)
        .with_context(|| format!("invalid stored timestamp {raw:?}"))
}

pub(crate) fn parse_opt_timestamp(raw: Option<String>) -> Result<Option<NaiveDateTime>> {
    raw.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("invalid stored decimal {raw:?}"))
}
