use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use adpulse_core::error::CoreError;
use adpulse_core::period::{days_in_range, validate_date_range};
use adpulse_core::source::FetchFilters;
use adpulse_core::sync_log::{SyncStatus, SyncType};
use adpulse_duckdb::DuckDbBackend;

use crate::sync::ingestion::IngestionService;

/// Most recent errors kept per job.
const MAX_RECENT_ERRORS: usize = 10;
/// Finished jobs stay readable for this long before being dropped.
const FINISHED_JOB_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillStatus {
    Running,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackfillError {
    pub date: NaiveDate,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct BackfillRequest {
    pub client_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub force_refresh: bool,
    pub filters: FetchFilters,
}

/// Point-in-time view of a backfill job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackfillProgress {
    pub job_id: String,
    pub client_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: BackfillStatus,
    pub total_days: i64,
    pub completed_days: i64,
    pub skipped_days: i64,
    pub current_date: Option<NaiveDate>,
    pub percentage: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: f64,
    pub estimated_remaining_seconds: Option<f64>,
    pub records_stored: usize,
    pub error_count: usize,
    pub errors: VecDeque<BackfillError>,
}

impl BackfillProgress {
    fn new(job_id: String, request: &BackfillRequest, total_days: i64, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            client_id: request.client_id.clone(),
            start_date: request.start,
            end_date: request.end,
            status: BackfillStatus::Running,
            total_days,
            completed_days: 0,
            skipped_days: 0,
            current_date: None,
            percentage: 0.0,
            started_at,
            finished_at: None,
            elapsed_seconds: 0.0,
            estimated_remaining_seconds: None,
            records_stored: 0,
            error_count: 0,
            errors: VecDeque::new(),
        }
    }

    fn push_error(&mut self, date: NaiveDate, error: String) {
        self.error_count += 1;
        if self.errors.len() == MAX_RECENT_ERRORS {
            self.errors.pop_front();
        }
        self.errors.push_back(BackfillError { date, error });
    }

    /// Recompute the timing fields as of `now`.
    fn refresh(&mut self, now: DateTime<Utc>) {
        let until = self.finished_at.unwrap_or(now);
        self.elapsed_seconds = (until - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.percentage = if self.total_days > 0 {
            (self.completed_days as f64 / self.total_days as f64 * 1000.0).round() / 10.0
        } else {
            100.0
        };
        self.estimated_remaining_seconds = match self.status {
            BackfillStatus::Completed => Some(0.0),
            BackfillStatus::Running if self.completed_days > 0 => {
                let per_day = self.elapsed_seconds / self.completed_days as f64;
                Some(per_day * (self.total_days - self.completed_days) as f64)
            }
            BackfillStatus::Running => None,
        };
    }
}

/// Drop jobs that finished more than [`FINISHED_JOB_TTL_HOURS`] before `now`.
fn prune_finished(jobs: &mut HashMap<String, BackfillProgress>, now: DateTime<Utc>) -> usize {
    let cutoff = now - chrono::Duration::hours(FINISHED_JOB_TTL_HOURS);
    let before = jobs.len();
    jobs.retain(|_, job| job.finished_at.map_or(true, |finished| finished > cutoff));
    before - jobs.len()
}

/// Tracks backfill jobs by id and runs each on its own task.
///
/// Finished jobs are evicted lazily when a new job starts.
#[derive(Clone)]
pub struct BackfillRegistry {
    jobs: Arc<RwLock<HashMap<String, BackfillProgress>>>,
    ingestion: IngestionService,
    db: Arc<DuckDbBackend>,
    delay: Duration,
    max_days: i64,
}

impl BackfillRegistry {
    pub fn new(
        db: Arc<DuckDbBackend>,
        ingestion: IngestionService,
        delay: Duration,
        max_days: i64,
    ) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            ingestion,
            db,
            delay,
            max_days,
        }
    }

    /// Validate the range, register the job and spawn it. Returns the job id.
    pub async fn start(&self, request: BackfillRequest) -> Result<String, CoreError> {
        let total_days = validate_date_range(request.start, request.end, Some(self.max_days))?;
        let job_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let progress = BackfillProgress::new(job_id.clone(), &request, total_days, now);
        {
            let mut jobs = self.jobs.write().await;
            let pruned = prune_finished(&mut jobs, now);
            if pruned > 0 {
                info!(pruned, "dropped finished backfill jobs");
            }
            jobs.insert(job_id.clone(), progress);
        }

        info!(
            job_id = %job_id,
            client_id = %request.client_id,
            start = %request.start,
            end = %request.end,
            force_refresh = request.force_refresh,
            "backfill started"
        );
        let registry = self.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            registry.run(&id, request).await;
        });
        Ok(job_id)
    }

    pub async fn progress(&self, job_id: &str) -> Option<BackfillProgress> {
        let jobs = self.jobs.read().await;
        let mut progress = jobs.get(job_id)?.clone();
        progress.refresh(Utc::now());
        Some(progress)
    }

    async fn update<F>(&self, job_id: &str, apply: F)
    where
        F: FnOnce(&mut BackfillProgress),
    {
        if let Some(progress) = self.jobs.write().await.get_mut(job_id) {
            apply(progress);
            progress.refresh(Utc::now());
        }
    }

    async fn run(&self, job_id: &str, request: BackfillRequest) {
        let client_id = request.client_id.as_str();
        for day in days_in_range(request.start, request.end) {
            self.update(job_id, |p| p.current_date = Some(day)).await;

            let existing = if request.force_refresh {
                false
            } else {
                match self.db.has_daily_data(client_id, day).await {
                    Ok(existing) => existing,
                    Err(err) => {
                        warn!(job_id, date = %day, error = %err, "existing data check failed");
                        false
                    }
                }
            };
            if existing {
                self.update(job_id, |p| {
                    p.skipped_days += 1;
                    p.completed_days += 1;
                })
                .await;
                continue;
            }

            let result = self
                .ingestion
                .ingest_day(client_id, day, SyncType::Backfill, &request.filters)
                .await;
            self.update(job_id, |p| {
                p.completed_days += 1;
                match result {
                    Ok(outcome) if outcome.status == SyncStatus::Completed => {
                        p.records_stored += outcome.records_stored;
                    }
                    Ok(outcome) => {
                        let error = outcome.error.unwrap_or_else(|| "sync failed".to_string());
                        p.push_error(day, error);
                    }
                    Err(err) => p.push_error(day, format!("{err:#}")),
                }
            })
            .await;

            if day < request.end && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        self.update(job_id, |p| {
            p.status = BackfillStatus::Completed;
            p.current_date = None;
            p.finished_at = Some(Utc::now());
        })
        .await;
        info!(job_id, client_id, "backfill finished");
    }
}
