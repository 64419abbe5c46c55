use std::io::Read;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use flate2::read::GzDecoder;

use adpulse_core::metrics::{DailyKey, EntityKind, MetricRecord, MetricTotals};
use adpulse_core::period::Period;
use adpulse_core::retention::{DataCategory, RetentionPolicy};
use adpulse_core::sync_log::SyncType;
use adpulse_duckdb::DuckDbBackend;

const CLIENT: &str = "act_200";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).expect("valid date")
}

fn now() -> NaiveDateTime {
    today().and_hms_opt(12, 0, 0).expect("valid time")
}

fn record(day: NaiveDate) -> MetricRecord {
    MetricRecord::new(
        DailyKey {
            entity_id: "ad_1".to_string(),
            entity_kind: EntityKind::Ad,
            client_id: CLIENT.to_string(),
            date: day,
            attribution: "default".to_string(),
        },
        "USD".to_string(),
        MetricTotals {
            impressions: 1000,
            clicks: 20,
            conversions: 2,
            spend: "12.50".parse().expect("decimal"),
            conversion_value: "40.00".parse().expect("decimal"),
        },
        1.1,
    )
}

/// Two rows past the 90-day archive cutoff and one recent row.
async fn seed(db: &DuckDbBackend) {
    let records = vec![
        record(today() - Duration::days(200)),
        record(today() - Duration::days(120)),
        record(today() - Duration::days(5)),
    ];
    db.store_daily_batch(&[], &records).await.expect("store");
}

async fn count(db: &DuckDbBackend, table: &str) -> i64 {
    let conn = db.conn_for_test().await;
    conn.prepare(&format!("SELECT COUNT(*) FROM {table}"))
        .expect("prepare")
        .query_row([], |row| row.get(0))
        .expect("count")
}

#[tokio::test]
async fn candidates_report_rows_past_the_archive_cutoff() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    seed(&db).await;
    let candidates = db
        .archival_candidates(&RetentionPolicy::default(), today())
        .await
        .expect("candidates");
    let daily = candidates
        .iter()
        .find(|c| c.data_type == DataCategory::DailyMetrics)
        .expect("daily entry");
    assert_eq!(daily.records_to_archive, 2);
    assert_eq!(daily.oldest_date, Some(today() - Duration::days(200)));
    assert_eq!(daily.newest_date, Some(today() - Duration::days(120)));
    assert_eq!(daily.archive_cutoff_date, today() - Duration::days(90));
    assert_eq!(candidates.len(), 4);
}

#[tokio::test]
async fn dry_run_matches_real_archive_and_touches_nothing() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    seed(&db).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let archive_dir = dir.path().join("archives");
    let policy = RetentionPolicy::default();

    let dry = db
        .archive_category(&policy, DataCategory::DailyMetrics, &archive_dir, true, now())
        .await
        .expect("dry run");
    assert_eq!(dry.records_archived, 2);
    assert!(dry.archive_file.is_none());
    assert!(!archive_dir.exists());
    assert_eq!(count(&db, "ad_metrics").await, 3);

    let real = db
        .archive_category(&policy, DataCategory::DailyMetrics, &archive_dir, false, now())
        .await
        .expect("archive");
    assert_eq!(real.records_archived, dry.records_archived);
    assert_eq!(count(&db, "ad_metrics").await, 1);

    let file_name = real.archive_file.expect("file name");
    assert!(file_name.starts_with("daily_metrics_2026-07-21_"));
    assert!(file_name.ends_with(".json.gz"));

    let bytes = std::fs::read(archive_dir.join(&file_name)).expect("read archive");
    let mut json = String::new();
    GzDecoder::new(bytes.as_slice())
        .read_to_string(&mut json)
        .expect("gunzip");
    let manifest: serde_json::Value = serde_json::from_str(&json).expect("json");
    assert_eq!(manifest["data_type"], "daily_metrics");
    assert_eq!(manifest["record_count"], 2);
    assert_eq!(manifest["records"].as_array().map(Vec::len), Some(2));
    assert_eq!(manifest["records"][0]["spend"], "12.50");

    let leftovers: Vec<_> = std::fs::read_dir(&archive_dir)
        .expect("list")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn archiving_nothing_writes_no_file() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    let dir = tempfile::tempdir().expect("tempdir");
    let outcome = db
        .archive_category(
            &RetentionPolicy::default(),
            DataCategory::WeeklyRollups,
            dir.path(),
            false,
            now(),
        )
        .await
        .expect("archive");
    assert_eq!(outcome.records_archived, 0);
    assert!(outcome.archive_file.is_none());
    assert_eq!(std::fs::read_dir(dir.path()).expect("list").count(), 0);
}

#[tokio::test]
async fn unlimited_retention_never_deletes() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    db.store_daily_batch(&[], &[record(NaiveDate::from_ymd_opt(2019, 1, 7).expect("date"))])
        .await
        .expect("store");
    let period = Period::month(2019, 1).expect("month");
    db.aggregate_period(CLIENT, &period).await.expect("aggregate");

    let outcome = db
        .cleanup_category(&RetentionPolicy::default(), DataCategory::MonthlyRollups, false, today())
        .await
        .expect("cleanup");
    assert_eq!(outcome.records_deleted, 0);
    assert!(outcome.message.is_some());
    assert_eq!(count(&db, "monthly_ad_metrics").await, 1);
}

#[tokio::test]
async fn cleanup_deletes_rows_past_retention() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    db.store_daily_batch(
        &[],
        &[
            record(today() - Duration::days(400)),
            record(today() - Duration::days(300)),
        ],
    )
    .await
    .expect("store");
    let policy = RetentionPolicy::default();

    let dry = db
        .cleanup_category(&policy, DataCategory::DailyMetrics, true, today())
        .await
        .expect("dry run");
    assert_eq!(dry.records_deleted, 1);
    assert_eq!(count(&db, "ad_metrics").await, 2);

    let real = db
        .cleanup_category(&policy, DataCategory::DailyMetrics, false, today())
        .await
        .expect("cleanup");
    assert_eq!(real.records_deleted, 1);
    assert_eq!(count(&db, "ad_metrics").await, 1);
}

#[tokio::test]
async fn sync_logs_archive_by_creation_date() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    let old = now() - Duration::days(45);
    db.create_sync_log(CLIENT, SyncType::Daily, old.date(), old)
        .await
        .expect("old log");
    db.create_sync_log(CLIENT, SyncType::Daily, today(), now())
        .await
        .expect("new log");

    let dir = tempfile::tempdir().expect("tempdir");
    let outcome = db
        .archive_category(&RetentionPolicy::default(), DataCategory::SyncLogs, dir.path(), false, now())
        .await
        .expect("archive");
    assert_eq!(outcome.records_archived, 1);
    assert!(outcome.checksum.is_some());
    assert_eq!(count(&db, "sync_logs").await, 1);
}

#[tokio::test]
async fn usage_spans_every_category() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    seed(&db).await;
    let usage = db.data_usage().await.expect("usage");
    let daily = usage
        .iter()
        .find(|u| u.data_type == DataCategory::DailyMetrics)
        .expect("daily");
    assert_eq!(daily.total_records, 3);
    assert_eq!(daily.date_range_days, 195);
    let monthly = usage
        .iter()
        .find(|u| u.data_type == DataCategory::MonthlyRollups)
        .expect("monthly");
    assert_eq!(monthly.total_records, 0);
    assert_eq!(monthly.oldest_date, None);
}
