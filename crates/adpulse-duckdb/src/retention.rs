use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use duckdb::Connection;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

use adpulse_core::metrics::EntityKind;
use adpulse_core::period::Granularity;
use adpulse_core::retention::{
    ArchivalCandidate, ArchiveManifest, ArchiveOutcome, CategoryUsage, CleanupOutcome,
    DataCategory, RetentionPolicy,
};

use crate::backend::{format_date, parse_opt_date};
use crate::metrics::{query_daily, query_rollups};
use crate::schema::category_tables;
use crate::sync_log::query_sync_logs;
use crate::DuckDbBackend;

/// Count, oldest and newest date over every table of `category`, optionally
/// restricted to rows dated before `before`.
fn category_span(
    conn: &Connection,
    category: DataCategory,
    before: Option<NaiveDate>,
) -> Result<(i64, Option<NaiveDate>, Option<NaiveDate>)> {
    let mut count = 0i64;
    let mut oldest: Option<NaiveDate> = None;
    let mut newest: Option<NaiveDate> = None;
    for (table, column) in category_tables(category) {
        let (n, min, max): (i64, Option<String>, Option<String>) = match before {
            Some(cutoff) => conn
                .prepare(&format!(
                    "SELECT COUNT(*), CAST(MIN({column}) AS VARCHAR), CAST(MAX({column}) AS VARCHAR) \
                     FROM {table} WHERE {column} < CAST(?1 AS DATE)"
                ))?
                .query_row(duckdb::params![format_date(cutoff)], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?,
            None => conn
                .prepare(&format!(
                    "SELECT COUNT(*), CAST(MIN({column}) AS VARCHAR), CAST(MAX({column}) AS VARCHAR) \
                     FROM {table}"
                ))?
                .query_row([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?,
        };
        count += n;
        if let Some(min) = parse_opt_date(min)? {
            oldest = Some(oldest.map_or(min, |o| o.min(min)));
        }
        if let Some(max) = parse_opt_date(max)? {
            newest = Some(newest.map_or(max, |n| n.max(max)));
        }
    }
    Ok((count, oldest, newest))
}

/// Serialize every row of `category` dated before `cutoff`.
fn collect_rows(conn: &Connection, category: DataCategory, cutoff: NaiveDate) -> Result<Vec<serde_json::Value>> {
    let cutoff = format_date(cutoff);
    let mut rows = Vec::new();
    match category {
        DataCategory::DailyMetrics => {
            for kind in EntityKind::ALL {
                for record in query_daily(conn, kind, "date < CAST(?1 AS DATE)", duckdb::params![cutoff])? {
                    rows.push(serde_json::to_value(&record)?);
                }
            }
        }
        DataCategory::WeeklyRollups | DataCategory::MonthlyRollups => {
            let granularity = if category == DataCategory::WeeklyRollups {
                Granularity::Week
            } else {
                Granularity::Month
            };
            for kind in EntityKind::ALL {
                let stored = query_rollups(
                    conn,
                    kind,
                    granularity,
                    "period_start < CAST(?1 AS DATE)",
                    duckdb::params![cutoff],
                )?;
                for rollup in stored {
                    rows.push(serde_json::to_value(&rollup.record)?);
                }
            }
        }
        DataCategory::SyncLogs => {
            for entry in query_sync_logs(
                conn,
                "CAST(created_at AS DATE) < CAST(?1 AS DATE)",
                duckdb::params![cutoff],
                None,
            )? {
                rows.push(serde_json::to_value(&entry)?);
            }
        }
    }
    Ok(rows)
}

fn delete_before(conn: &Connection, category: DataCategory, cutoff: NaiveDate) -> Result<i64> {
    let cutoff = format_date(cutoff);
    let mut deleted = 0i64;
    for (table, column) in category_tables(category) {
        deleted += conn.execute(
            &format!("DELETE FROM {table} WHERE {column} < CAST(?1 AS DATE)"),
            duckdb::params![cutoff],
        )? as i64;
    }
    Ok(deleted)
}

/// Write `bytes` to `dir/name` through a temp file, fsync, then rename.
/// Refuses to overwrite an existing archive.
fn write_once(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating archive dir {}", dir.display()))?;
    let target = dir.join(name);
    if target.exists() {
        bail!("archive {} already exists", target.display());
    }
    let tmp = dir.join(format!(".{name}.tmp"));
    {
        let mut file = fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, &target).with_context(|| format!("renaming into {}", target.display()))?;
    Ok(())
}

impl DuckDbBackend {
    /// Per-category rows older than the policy's archive cutoff. Read-only.
    pub async fn archival_candidates(
        &self,
        policy: &RetentionPolicy,
        today: NaiveDate,
    ) -> Result<Vec<ArchivalCandidate>> {
        let conn = self.conn.lock().await;
        let mut candidates = Vec::with_capacity(DataCategory::ALL.len());
        for category in DataCategory::ALL {
            let cutoff = policy.archive_cutoff(category, today);
            let (records_to_archive, oldest_date, newest_date) =
                category_span(&conn, category, Some(cutoff))?;
            candidates.push(ArchivalCandidate {
                data_type: category,
                archive_cutoff_date: cutoff,
                records_to_archive,
                oldest_date,
                newest_date,
            });
        }
        Ok(candidates)
    }

    /// Row totals and date span per category.
    pub async fn data_usage(&self) -> Result<Vec<CategoryUsage>> {
        let conn = self.conn.lock().await;
        let mut usage = Vec::with_capacity(DataCategory::ALL.len());
        for category in DataCategory::ALL {
            let (total, oldest, newest) = category_span(&conn, category, None)?;
            usage.push(CategoryUsage::new(category, total, oldest, newest));
        }
        Ok(usage)
    }

    /// Export rows past the archive cutoff to a gzip JSON file under
    /// `archive_dir`, then delete exactly those rows.
    ///
    /// The connection lock is held from the read through the delete, so no
    /// writer can add or change candidate rows in between. A dry run counts
    /// the same rows and touches neither the tables nor the directory.
    pub async fn archive_category(
        &self,
        policy: &RetentionPolicy,
        category: DataCategory,
        archive_dir: &Path,
        dry_run: bool,
        now: NaiveDateTime,
    ) -> Result<ArchiveOutcome> {
        let cutoff = policy.archive_cutoff(category, now.date());
        let mut conn = self.conn.lock().await;

        if dry_run {
            let (count, _, _) = category_span(&conn, category, Some(cutoff))?;
            return Ok(ArchiveOutcome {
                data_type: category,
                cutoff_date: cutoff,
                records_archived: count,
                archive_file: None,
                checksum: None,
                dry_run: true,
            });
        }

        let tx = conn.transaction()?;
        let records = collect_rows(&tx, category, cutoff)?;
        if records.is_empty() {
            return Ok(ArchiveOutcome {
                data_type: category,
                cutoff_date: cutoff,
                records_archived: 0,
                archive_file: None,
                checksum: None,
                dry_run: false,
            });
        }

        let manifest = ArchiveManifest {
            archive_date: now,
            data_type: category,
            cutoff_date: cutoff,
            record_count: records.len(),
            records,
        };
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, &manifest)?;
        let bytes = encoder.finish()?;
        let checksum = hex::encode(Sha256::digest(&bytes));

        let file_name = format!(
            "{}_{}_{}.json.gz",
            category.as_str(),
            format_date(cutoff),
            now.format("%Y%m%dT%H%M%S")
        );
        write_once(archive_dir, &file_name, &bytes)?;

        let deleted = delete_before(&tx, category, cutoff)?;
        if deleted != manifest.record_count as i64 {
            bail!(
                "archive {file_name} holds {} rows but {deleted} matched for deletion",
                manifest.record_count
            );
        }
        tx.commit()?;

        tracing::info!(
            data_type = %category,
            records = deleted,
            archive_file = %file_name,
            cutoff = %cutoff,
            "archived old data"
        );
        Ok(ArchiveOutcome {
            data_type: category,
            cutoff_date: cutoff,
            records_archived: deleted,
            archive_file: Some(file_name),
            checksum: Some(checksum),
            dry_run: false,
        })
    }

    /// Hard-delete rows past the retention horizon. A category kept forever
    /// is left untouched.
    pub async fn cleanup_category(
        &self,
        policy: &RetentionPolicy,
        category: DataCategory,
        dry_run: bool,
        today: NaiveDate,
    ) -> Result<CleanupOutcome> {
        let retention_days = policy.get(category).retention_days;
        let Some(cutoff) = policy.delete_cutoff(category, today) else {
            return Ok(CleanupOutcome {
                data_type: category,
                retention_days,
                cutoff_date: None,
                records_deleted: 0,
                dry_run,
                message: Some("Data type has unlimited retention".to_string()),
            });
        };

        let mut conn = self.conn.lock().await;
        let records_deleted = if dry_run {
            category_span(&conn, category, Some(cutoff))?.0
        } else {
            let tx = conn.transaction()?;
            let deleted = delete_before(&tx, category, cutoff)?;
            tx.commit()?;
            tracing::info!(
                data_type = %category,
                records_deleted = deleted,
                retention_days,
                "old data cleaned up"
            );
            deleted
        };

        Ok(CleanupOutcome {
            data_type: category,
            retention_days,
            cutoff_date: Some(cutoff),
            records_deleted,
            dry_run,
            message: None,
        })
    }
}
