//! Cron execution monitoring
//!
//! Records one [`CronJobExecution`](crate::models::cron_job_execution::Model)
//! per scheduled batch, aggregates recent executions for the monitoring
//! dashboard and prunes old history.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::SyncCoreError;
use crate::models::cron_job_execution::{CronJobStatus, Model as CronExecution};
use crate::providers::SyncInterval;
use crate::repositories::cron_execution::ExecutionCounts;
use crate::repositories::{CronExecutionRepository, SyncRunRepository};
use crate::sync::{BatchRunner, BatchSummary};

pub const MIN_TIME_RANGE_HOURS: u32 = 1;
pub const MAX_TIME_RANGE_HOURS: u32 = 168;
pub const MIN_RETENTION_DAYS: u32 = 1;
pub const MAX_RETENTION_DAYS: u32 = 365;

const RECENT_FAILURES_LIMIT: usize = 10;
const RECENT_EXECUTIONS_LIMIT: usize = 20;

/// One execution as shown on the dashboard
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExecutionView {
    pub id: Uuid,
    pub job_name: String,
    pub status: CronJobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub users_processed: i32,
    pub providers_synced: i32,
    pub success_count: i32,
    pub failure_count: i32,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
}

impl From<CronExecution> for ExecutionView {
    fn from(model: CronExecution) -> Self {
        Self {
            id: model.id,
            job_name: model.job_name,
            status: model.status,
            started_at: model.started_at,
            completed_at: model.completed_at,
            users_processed: model.users_processed,
            providers_synced: model.providers_synced,
            success_count: model.success_count,
            failure_count: model.failure_count,
            error_message: model.error_message,
            duration_ms: model.duration_ms,
        }
    }
}

/// Aggregated view over a lookback window
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DashboardData {
    pub time_range_hours: u32,
    pub total_executions: u32,
    pub successful_executions: u32,
    pub failed_executions: u32,
    pub running_executions: u32,
    /// Percentage of finished executions that succeeded; 100 when none finished
    pub success_rate: f64,
    /// Mean duration of finished executions
    pub average_duration_ms: Option<f64>,
    pub pairs_succeeded: i64,
    pub pairs_failed: i64,
    pub recent_failures: Vec<ExecutionView>,
    pub recent_executions: Vec<ExecutionView>,
}

/// Result of one scheduled batch
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CronSyncReport {
    pub execution_id: Uuid,
    pub job_name: String,
    pub status: CronJobStatus,
    pub summary: BatchSummary,
    pub duration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct CronExecutionMonitor {
    executions: CronExecutionRepository,
    runs: SyncRunRepository,
    batch: BatchRunner,
}

impl CronExecutionMonitor {
    pub fn new(db: Arc<DatabaseConnection>, batch: BatchRunner) -> Self {
        Self {
            executions: CronExecutionRepository::new(db.clone()),
            runs: SyncRunRepository::new(db),
            batch,
        }
    }

    pub async fn log_job_start(
        &self,
        job_name: &str,
        metadata: Option<JsonValue>,
    ) -> Result<Uuid, SyncCoreError> {
        let id = self.executions.insert_start(job_name, metadata).await?;
        tracing::info!(execution_id = %id, job_name, "Cron job started");
        Ok(id)
    }

    pub async fn log_job_complete(
        &self,
        id: Uuid,
        status: CronJobStatus,
        counts: ExecutionCounts,
        error_message: Option<String>,
        duration_ms: i64,
    ) -> Result<(), SyncCoreError> {
        let updated = self
            .executions
            .complete(id, status, counts, error_message, duration_ms)
            .await?;
        if updated.is_none() {
            tracing::warn!(execution_id = %id, "Completed an unknown cron execution");
        }
        metrics::counter!("cron_executions_total", "status" => status_label(status)).increment(1);
        Ok(())
    }

    /// Record a batch that failed before an execution id was produced
    pub async fn log_job_failure(
        &self,
        job_name: &str,
        error: &str,
        duration_ms: i64,
    ) -> Result<Uuid, SyncCoreError> {
        let id = self
            .executions
            .insert_failure(job_name, error, duration_ms)
            .await?;
        tracing::error!(execution_id = %id, job_name, error, "Cron job failed before start");
        metrics::counter!("cron_executions_total", "status" => "failed").increment(1);
        Ok(id)
    }

    /// Run the batch for `interval` and record it as one execution
    #[instrument(skip(self, cancel), fields(interval = ?interval))]
    pub async fn run_scheduled_sync(
        &self,
        interval: Option<SyncInterval>,
        cancel: &CancellationToken,
    ) -> Result<CronSyncReport, SyncCoreError> {
        let job_name = SyncInterval::job_name(interval);
        let started = Instant::now();
        let metadata = json!({
            "interval": interval,
            "trigger": "cron",
        });

        let execution_id = match self.log_job_start(job_name, Some(metadata)).await {
            Ok(id) => id,
            Err(err) => {
                let duration_ms = elapsed_ms(started);
                if let Err(log_err) = self
                    .log_job_failure(job_name, &err.to_string(), duration_ms)
                    .await
                {
                    tracing::error!(error = %log_err, "Failed to record cron job failure");
                }
                return Err(err);
            }
        };

        match self.batch.run(interval, Some(execution_id), cancel).await {
            Ok(summary) => {
                let duration_ms = elapsed_ms(started);
                let (status, error_message) = if summary.cancelled {
                    (
                        CronJobStatus::Failed,
                        Some("cancelled by shutdown before all pairs were dispatched".to_string()),
                    )
                } else {
                    (CronJobStatus::Success, None)
                };
                let counts = ExecutionCounts {
                    users_processed: to_i32(summary.users_processed),
                    providers_synced: to_i32(summary.providers_synced),
                    success_count: to_i32(summary.success_count),
                    failure_count: to_i32(summary.failure_count),
                };
                self.log_job_complete(execution_id, status, counts, error_message, duration_ms)
                    .await?;

                Ok(CronSyncReport {
                    execution_id,
                    job_name: job_name.to_string(),
                    status,
                    summary,
                    duration_ms,
                })
            }
            Err(err) => {
                let duration_ms = elapsed_ms(started);
                if let Err(log_err) = self
                    .log_job_complete(
                        execution_id,
                        CronJobStatus::Failed,
                        ExecutionCounts::default(),
                        Some(err.to_string()),
                        duration_ms,
                    )
                    .await
                {
                    tracing::error!(error = %log_err, "Failed to record cron job failure");
                }
                Err(err)
            }
        }
    }

    /// Aggregate executions started within the last `time_range_hours`
    pub async fn get_dashboard_data(
        &self,
        time_range_hours: u32,
    ) -> Result<DashboardData, SyncCoreError> {
        if !(MIN_TIME_RANGE_HOURS..=MAX_TIME_RANGE_HOURS).contains(&time_range_hours) {
            return Err(SyncCoreError::Validation(format!(
                "time_range must be between {} and {} hours",
                MIN_TIME_RANGE_HOURS, MAX_TIME_RANGE_HOURS
            )));
        }

        let since = Utc::now() - Duration::hours(i64::from(time_range_hours));
        let executions = self.executions.list_since(since).await?;
        Ok(aggregate(time_range_hours, executions))
    }

    /// Delete execution and sync-run history older than `retention_days`
    #[instrument(skip(self))]
    pub async fn cleanup_old_logs(&self, retention_days: u32) -> Result<u64, SyncCoreError> {
        if !(MIN_RETENTION_DAYS..=MAX_RETENTION_DAYS).contains(&retention_days) {
            return Err(SyncCoreError::Validation(format!(
                "retention_days must be between {} and {}",
                MIN_RETENTION_DAYS, MAX_RETENTION_DAYS
            )));
        }

        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let runs = self.runs.delete_older_than(cutoff).await?;
        let executions = self.executions.delete_older_than(cutoff).await?;
        tracing::info!(runs, executions, retention_days, "Pruned sync history");

        Ok(runs + executions)
    }
}

fn aggregate(time_range_hours: u32, executions: Vec<CronExecution>) -> DashboardData {
    let mut successful = 0u32;
    let mut failed = 0u32;
    let mut running = 0u32;
    let mut duration_total = 0i64;
    let mut duration_samples = 0i64;
    let mut pairs_succeeded = 0i64;
    let mut pairs_failed = 0i64;

    for execution in &executions {
        match execution.status {
            CronJobStatus::Success => successful += 1,
            CronJobStatus::Failed => failed += 1,
            CronJobStatus::Running => running += 1,
        }
        if execution.status != CronJobStatus::Running
            && let Some(duration) = execution.duration_ms
        {
            duration_total += duration;
            duration_samples += 1;
        }
        pairs_succeeded += i64::from(execution.success_count);
        pairs_failed += i64::from(execution.failure_count);
    }

    let finished = successful + failed;
    let success_rate = if finished == 0 {
        100.0
    } else {
        f64::from(successful) * 100.0 / f64::from(finished)
    };

    let recent_failures = executions
        .iter()
        .filter(|execution| execution.status == CronJobStatus::Failed)
        .take(RECENT_FAILURES_LIMIT)
        .cloned()
        .map(ExecutionView::from)
        .collect();

    DashboardData {
        time_range_hours,
        total_executions: u32::try_from(executions.len()).unwrap_or(u32::MAX),
        successful_executions: successful,
        failed_executions: failed,
        running_executions: running,
        success_rate,
        average_duration_ms: (duration_samples > 0)
            .then(|| duration_total as f64 / duration_samples as f64),
        pairs_succeeded,
        pairs_failed,
        recent_failures,
        recent_executions: executions
            .into_iter()
            .take(RECENT_EXECUTIONS_LIMIT)
            .map(ExecutionView::from)
            .collect(),
    }
}

fn status_label(status: CronJobStatus) -> &'static str {
    match status {
        CronJobStatus::Running => "running",
        CronJobStatus::Success => "success",
        CronJobStatus::Failed => "failed",
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
