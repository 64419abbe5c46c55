use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Daily,
    Weekly,
    Monthly,
    Backfill,
}

impl SyncType {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncType::Daily => "daily",
            SyncType::Weekly => "weekly",
            SyncType::Monthly => "monthly",
            SyncType::Backfill => "backfill",
        }
    }
}

impl FromStr for SyncType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(SyncType::Daily),
            "weekly" => Ok(SyncType::Weekly),
            "monthly" => Ok(SyncType::Monthly),
            "backfill" => Ok(SyncType::Backfill),
            other => Err(format!("unknown sync type: {other}")),
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `pending -> running -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Failed)
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "running" => Ok(SyncStatus::Running),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// Audit record for one sync or aggregation run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncLogEntry {
    pub id: String,
    pub client_id: String,
    pub sync_type: SyncType,
    pub period_date: NaiveDate,
    pub status: SyncStatus,
    pub records_processed: i64,
    pub error_message: Option<String>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub retry_count: i32,
    pub created_at: NaiveDateTime,
}

impl SyncLogEntry {
    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

impl Serialize for SyncLogEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("SyncLogEntry", 12)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("client_id", &self.client_id)?;
        s.serialize_field("sync_type", &self.sync_type)?;
        s.serialize_field("period_date", &self.period_date)?;
        s.serialize_field("status", &self.status)?;
        s.serialize_field("records_processed", &self.records_processed)?;
        s.serialize_field("error_message", &self.error_message)?;
        s.serialize_field("started_at", &self.started_at)?;
        s.serialize_field("completed_at", &self.completed_at)?;
        s.serialize_field("duration_seconds", &self.duration_seconds())?;
        s.serialize_field("retry_count", &self.retry_count)?;
        s.serialize_field("created_at", &self.created_at)?;
        s.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SyncSummary {
    pub total_syncs: i64,
    pub successful_syncs: i64,
    pub failed_syncs: i64,
    pub success_rate: f64,
}

impl SyncSummary {
    pub fn new(total_syncs: i64, successful_syncs: i64, failed_syncs: i64) -> Self {
        let success_rate = if total_syncs > 0 {
            successful_syncs as f64 / total_syncs as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total_syncs,
            successful_syncs,
            failed_syncs,
            success_rate,
        }
    }
}

/// Run counts for one aggregation granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunCounts {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationStatus {
    pub days_back: i64,
    pub weekly: RunCounts,
    pub monthly: RunCounts,
    pub recent_runs: Vec<SyncLogEntry>,
}
