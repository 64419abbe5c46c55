use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::CoreError;

/// `retention_days` value meaning "keep forever".
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    DailyMetrics,
    WeeklyRollups,
    MonthlyRollups,
    SyncLogs,
}

impl DataCategory {
    pub const ALL: [DataCategory; 4] = [
        DataCategory::DailyMetrics,
        DataCategory::WeeklyRollups,
        DataCategory::MonthlyRollups,
        DataCategory::SyncLogs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataCategory::DailyMetrics => "daily_metrics",
            DataCategory::WeeklyRollups => "weekly_rollups",
            DataCategory::MonthlyRollups => "monthly_rollups",
            DataCategory::SyncLogs => "sync_logs",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            DataCategory::DailyMetrics => "Daily ad and campaign metrics",
            DataCategory::WeeklyRollups => "Weekly aggregated metrics",
            DataCategory::MonthlyRollups => "Monthly aggregated metrics",
            DataCategory::SyncLogs => "Data synchronization logs",
        }
    }

    /// Suffix used by the `ADPULSE_RETENTION_<X>_DAYS` and
    /// `ADPULSE_ARCHIVE_<X>_AFTER_DAYS` overrides.
    pub fn env_suffix(self) -> &'static str {
        match self {
            DataCategory::DailyMetrics => "DAILY_METRICS",
            DataCategory::WeeklyRollups => "WEEKLY_ROLLUPS",
            DataCategory::MonthlyRollups => "MONTHLY_ROLLUPS",
            DataCategory::SyncLogs => "SYNC_LOGS",
        }
    }
}

impl FromStr for DataCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "daily_metrics" => Ok(DataCategory::DailyMetrics),
            "weekly_rollups" | "weekly_aggregates" => Ok(DataCategory::WeeklyRollups),
            "monthly_rollups" | "monthly_aggregates" => Ok(DataCategory::MonthlyRollups),
            "sync_logs" => Ok(DataCategory::SyncLogs),
            other => Err(CoreError::UnknownCategory(other.to_string())),
        }
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategoryPolicy {
    /// Days before rows are hard-deleted; [`UNLIMITED`] keeps them forever.
    pub retention_days: i64,
    /// Days before rows become archive candidates.
    pub archive_after_days: i64,
}

impl CategoryPolicy {
    pub fn is_unlimited(&self) -> bool {
        self.retention_days < 0
    }
}

/// Per-category retention and archive ages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub daily_metrics: CategoryPolicy,
    pub weekly_rollups: CategoryPolicy,
    pub monthly_rollups: CategoryPolicy,
    pub sync_logs: CategoryPolicy,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily_metrics: CategoryPolicy {
                retention_days: 365,
                archive_after_days: 90,
            },
            weekly_rollups: CategoryPolicy {
                retention_days: 730,
                archive_after_days: 365,
            },
            monthly_rollups: CategoryPolicy {
                retention_days: UNLIMITED,
                archive_after_days: 1095,
            },
            sync_logs: CategoryPolicy {
                retention_days: 90,
                archive_after_days: 30,
            },
        }
    }
}

impl RetentionPolicy {
    /// Apply overrides from `lookup` (normally the process environment) on
    /// top of the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut policy = Self::default();
        for category in DataCategory::ALL {
            let entry = policy.get_mut(category);
            let retention_key = format!("ADPULSE_RETENTION_{}_DAYS", category.env_suffix());
            if let Some(raw) = lookup(&retention_key) {
                let days: i64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| format!("{retention_key} must be an integer, got {raw:?}"))?;
                if days < UNLIMITED {
                    return Err(format!("{retention_key} must be -1 or a non-negative integer"));
                }
                entry.retention_days = days;
            }
            let archive_key = format!("ADPULSE_ARCHIVE_{}_AFTER_DAYS", category.env_suffix());
            if let Some(raw) = lookup(&archive_key) {
                let days: i64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| format!("{archive_key} must be an integer, got {raw:?}"))?;
                if days < 0 {
                    return Err(format!("{archive_key} must be non-negative"));
                }
                entry.archive_after_days = days;
            }
        }
        Ok(policy)
    }

    pub fn get(&self, category: DataCategory) -> CategoryPolicy {
        match category {
            DataCategory::DailyMetrics => self.daily_metrics,
            DataCategory::WeeklyRollups => self.weekly_rollups,
            DataCategory::MonthlyRollups => self.monthly_rollups,
            DataCategory::SyncLogs => self.sync_logs,
        }
    }

    fn get_mut(&mut self, category: DataCategory) -> &mut CategoryPolicy {
        match category {
            DataCategory::DailyMetrics => &mut self.daily_metrics,
            DataCategory::WeeklyRollups => &mut self.weekly_rollups,
            DataCategory::MonthlyRollups => &mut self.monthly_rollups,
            DataCategory::SyncLogs => &mut self.sync_logs,
        }
    }

    /// Rows dated strictly before this day are archive candidates.
    pub fn archive_cutoff(&self, category: DataCategory, today: NaiveDate) -> NaiveDate {
        today - Duration::days(self.get(category).archive_after_days)
    }

    /// Rows dated strictly before this day are past retention. `None` when
    /// the category is kept forever.
    pub fn delete_cutoff(&self, category: DataCategory, today: NaiveDate) -> Option<NaiveDate> {
        let policy = self.get(category);
        (!policy.is_unlimited()).then(|| today - Duration::days(policy.retention_days))
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for category in DataCategory::ALL {
            let policy = self.get(category);
            map.insert(
                category.as_str().to_string(),
                serde_json::json!({
                    "retention_days": policy.retention_days,
                    "archive_after_days": policy.archive_after_days,
                    "description": category.description(),
                }),
            );
        }
        serde_json::Value::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivalCandidate {
    pub data_type: DataCategory,
    pub archive_cutoff_date: NaiveDate,
    pub records_to_archive: i64,
    pub oldest_date: Option<NaiveDate>,
    pub newest_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryUsage {
    pub data_type: DataCategory,
    pub total_records: i64,
    pub oldest_date: Option<NaiveDate>,
    pub newest_date: Option<NaiveDate>,
    pub date_range_days: i64,
}

impl CategoryUsage {
    pub fn new(
        data_type: DataCategory,
        total_records: i64,
        oldest_date: Option<NaiveDate>,
        newest_date: Option<NaiveDate>,
    ) -> Self {
        let date_range_days = match (oldest_date, newest_date) {
            (Some(oldest), Some(newest)) => (newest - oldest).num_days(),
            _ => 0,
        };
        Self {
            data_type,
            total_records,
            oldest_date,
            newest_date,
            date_range_days,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveOutcome {
    pub data_type: DataCategory,
    pub cutoff_date: NaiveDate,
    pub records_archived: i64,
    pub archive_file: Option<String>,
    pub checksum: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupOutcome {
    pub data_type: DataCategory,
    pub retention_days: i64,
    pub cutoff_date: Option<NaiveDate>,
    pub records_deleted: i64,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body of an archive file. Written once, never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveManifest {
    pub archive_date: NaiveDateTime,
    pub data_type: DataCategory,
    pub cutoff_date: NaiveDate,
    pub record_count: usize,
    pub records: Vec<serde_json::Value>,
}
