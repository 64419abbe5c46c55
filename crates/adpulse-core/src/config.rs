use std::path::PathBuf;
use std::time::Duration;

use crate::retention::RetentionPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub archive_dir: PathBuf,
    pub duckdb_memory_limit: String,
    pub max_sync_range_days: i64,
    pub max_backfill_days: i64,
    pub backfill_delay_ms: u64,
    pub default_currency: String,
    /// When false, records failing validation are stored anyway and only counted.
    pub reject_invalid_records: bool,
    pub source: Option<SourceConfig>,
    pub cors_origins: Vec<String>,
    pub retention: RetentionPolicy,
}

/// Connection details for the ads platform API.
#[derive(Clone)]
pub struct SourceConfig {
    pub base_url: String,
    pub token: String,
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup("ADPULSE_DATA_DIR").unwrap_or_else(|| "./data".to_string());
        let archive_dir = lookup("ADPULSE_ARCHIVE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&data_dir).join("archives"));

        let source = match (lookup("ADPULSE_SOURCE_URL"), lookup("ADPULSE_SOURCE_TOKEN")) {
            (Some(base_url), Some(token)) if !base_url.trim().is_empty() => Some(SourceConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                token,
            }),
            (Some(_), None) => {
                return Err("ADPULSE_SOURCE_TOKEN required when ADPULSE_SOURCE_URL is set".to_string())
            }
            _ => None,
        };

        let max_sync_range_days = parse_or(&lookup, "ADPULSE_MAX_SYNC_RANGE_DAYS", 90i64)?;
        if max_sync_range_days < 1 {
            return Err("ADPULSE_MAX_SYNC_RANGE_DAYS must be at least 1".to_string());
        }

        Ok(Self {
            port: parse_or(&lookup, "ADPULSE_PORT", 3000u16)?,
            archive_dir,
            data_dir,
            duckdb_memory_limit: lookup("ADPULSE_DUCKDB_MEMORY").unwrap_or_else(|| "1GB".to_string()),
            max_sync_range_days,
            max_backfill_days: parse_or(&lookup, "ADPULSE_MAX_BACKFILL_DAYS", 730i64)?,
            backfill_delay_ms: parse_or(&lookup, "ADPULSE_BACKFILL_DELAY_MS", 1000u64)?,
            default_currency: lookup("ADPULSE_DEFAULT_CURRENCY")
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "USD".to_string()),
            reject_invalid_records: lookup("ADPULSE_REJECT_INVALID_RECORDS")
                .map(|v| v != "false")
                .unwrap_or(true),
            source,
            cors_origins: lookup("ADPULSE_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            retention: RetentionPolicy::from_lookup(&lookup)?,
        })
    }

    pub fn backfill_delay(&self) -> Duration {
        Duration::from_millis(self.backfill_delay_ms)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, String>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("invalid {key}: {e}")),
        None => Ok(default),
    }
}
