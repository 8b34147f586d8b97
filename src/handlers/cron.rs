//! # Scheduler Handlers
//!
//! Endpoints hit by the external scheduler. All of them sit behind
//! [`crate::auth::cron_auth_middleware`].

use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};

use crate::cron_monitor::{CronSyncReport, DashboardData};
use crate::error::ApiError;
use crate::handlers::types::{CleanupQuery, CleanupResponse, CronSyncQuery, MonitoringQuery};
use crate::providers::SyncInterval;
use crate::repositories::OAuthStateRepository;
use crate::server::AppState;

const DEFAULT_TIME_RANGE_HOURS: u32 = 24;
const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Sync every connected pair whose provider matches the interval
#[utoipa::path(
    post,
    path = "/cron/sync",
    params(CronSyncQuery),
    responses(
        (status = 200, description = "Batch finished", body = CronSyncReport),
        (status = 400, description = "Unknown interval", body = ApiError),
        (status = 401, description = "Missing or invalid cron secret", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "cron"
)]
pub async fn run_sync(
    State(state): State<AppState>,
    query: Result<Query<CronSyncQuery>, QueryRejection>,
) -> Result<Json<CronSyncReport>, ApiError> {
    let Query(query) = query?;
    let interval = SyncInterval::parse(query.interval.as_deref())?;

    let report = state
        .cron_monitor
        .run_scheduled_sync(interval, &state.shutdown)
        .await?;

    tracing::info!(
        job = %report.job_name,
        status = ?report.status,
        succeeded = report.summary.success_count,
        failed = report.summary.failure_count,
        "Scheduled sync finished"
    );
    Ok(Json(report))
}

/// Aggregated execution history for the dashboard
#[utoipa::path(
    get,
    path = "/cron/monitoring",
    params(MonitoringQuery),
    responses(
        (status = 200, description = "Dashboard data", body = DashboardData),
        (status = 400, description = "time_range out of range", body = ApiError),
        (status = 401, description = "Missing or invalid cron secret", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "cron"
)]
pub async fn monitoring(
    State(state): State<AppState>,
    query: Result<Query<MonitoringQuery>, QueryRejection>,
) -> Result<Json<DashboardData>, ApiError> {
    let Query(query) = query?;
    let hours = query.time_range.unwrap_or(DEFAULT_TIME_RANGE_HOURS);

    Ok(Json(state.cron_monitor.get_dashboard_data(hours).await?))
}

/// Prune old execution history and expired authorization states
#[utoipa::path(
    post,
    path = "/cron/cleanup",
    params(CleanupQuery),
    responses(
        (status = 200, description = "History pruned", body = CleanupResponse),
        (status = 400, description = "retention_days out of range", body = ApiError),
        (status = 401, description = "Missing or invalid cron secret", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "cron"
)]
pub async fn cleanup(
    State(state): State<AppState>,
    query: Result<Query<CleanupQuery>, QueryRejection>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let Query(query) = query?;
    let retention_days = query.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS);

    let history = state.cron_monitor.cleanup_old_logs(retention_days).await?;
    let states = OAuthStateRepository::new(state.db.clone())
        .cleanup_expired()
        .await?;
    tracing::info!(history, states, "Cleanup finished");

    Ok(Json(CleanupResponse {
        deleted: history + states,
        retention_days,
    }))
}
