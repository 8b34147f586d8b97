//! # Sync Handlers
//!
//! User-initiated sync, cached status and supervised task state.

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, header::CACHE_CONTROL},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::auth::{UserHeader, UserId};
use crate::error::ApiError;
use crate::handlers::types::{ConnectionStatus, SyncRunView, SyncStatusResponse};
use crate::providers::ProviderKind;
use crate::rate_limit::{LimiterPolicy, RateLimitDecision};
use crate::repositories::{ActivityRepository, ConnectionRepository, SyncRunRepository};
use crate::server::AppState;
use crate::sync::{SyncOutcome, TaskState, TaskStatus};

const RECENT_RUNS_LIMIT: u64 = 10;

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Run a sync for one provider now and return its outcome
///
/// A failed sync is still a 200; the outcome carries `success: false` and the
/// error message.
#[utoipa::path(
    post,
    path = "/sync/{provider}",
    params(
        ("provider" = String, Path, description = "Provider identifier"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Sync finished", body = SyncOutcome),
        (status = 400, description = "Unknown or disabled provider", body = ApiError),
        (status = 401, description = "Missing or invalid X-User-Id", body = ApiError),
        (status = 429, description = "Manual sync rate limit exceeded", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn trigger_sync(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(provider): Path<String>,
) -> Result<Response, Response> {
    let kind = state
        .registry
        .lookup(&provider)
        .map_err(|e| ApiError::from(e).into_response())?
        .kind;

    let decision = state.rate_limiter.check(LimiterPolicy::ManualSync, user_id);
    let headers = rate_limit_headers(&decision);
    if let Err(err) = decision.into_result() {
        tracing::info!(user_id = %user_id, provider = %kind, "Manual sync rate limited");
        return Err((headers, ApiError::from(err)).into_response());
    }

    let outcome = state
        .supervisor
        .run_manual(user_id, kind)
        .await
        .map_err(|e| (headers.clone(), ApiError::from(e)).into_response())?;
    state.status_cache.invalidate(&(user_id, kind));

    Ok((headers, Json(outcome)).into_response())
}

/// Current connection and sync status for one provider
#[utoipa::path(
    get,
    path = "/sync/{provider}/status",
    params(
        ("provider" = String, Path, description = "Provider identifier"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Sync status", body = SyncStatusResponse),
        (status = 400, description = "Unknown or disabled provider", body = ApiError),
        (status = 401, description = "Missing or invalid X-User-Id", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn sync_status(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(provider): Path<String>,
) -> Result<Response, ApiError> {
    let kind = state.registry.lookup(&provider)?.kind;
    let key = (user_id, kind);

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!(
        "private, max-age={}",
        state.status_cache.ttl().as_secs()
    )) {
        headers.insert(CACHE_CONTROL, value);
    }

    if let Some(cached) = state.status_cache.get(&key) {
        headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
        return Ok((headers, Json(cached)).into_response());
    }

    let status = load_status(&state, user_id, kind).await?;
    // A syncing snapshot goes stale as soon as the run finishes
    if status.status != ConnectionStatus::Syncing {
        state.status_cache.insert(key, status.clone());
    }

    headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
    Ok((headers, Json(status)).into_response())
}

async fn load_status(
    state: &AppState,
    user_id: Uuid,
    kind: ProviderKind,
) -> Result<SyncStatusResponse, ApiError> {
    let connection = ConnectionRepository::new(state.db.clone())
        .find(user_id, kind.as_str())
        .await?;
    let recent_runs = SyncRunRepository::new(state.db.clone())
        .recent(user_id, kind.as_str(), RECENT_RUNS_LIMIT)
        .await?
        .into_iter()
        .map(SyncRunView::from)
        .collect();
    let items_synced = ActivityRepository::new(state.db.clone())
        .count_for(user_id, kind.as_str())
        .await?;

    let syncing = state.supervisor.status(user_id, kind).state == TaskState::Running;
    let (status, last_sync, last_error) = match connection {
        Some(conn) if conn.connected => {
            let status = if syncing {
                ConnectionStatus::Syncing
            } else if conn.last_error.is_some() {
                ConnectionStatus::Error
            } else {
                ConnectionStatus::Healthy
            };
            (status, conn.last_synced_at, conn.last_error)
        }
        Some(conn) => (ConnectionStatus::NotConnected, conn.last_synced_at, None),
        None => (ConnectionStatus::NotConnected, None, None),
    };

    Ok(SyncStatusResponse {
        provider: kind,
        status,
        last_sync,
        last_error,
        items_synced,
        recent_runs,
    })
}

/// State of the latest supervised manual sync for one provider
#[utoipa::path(
    get,
    path = "/sync/{provider}/task",
    params(
        ("provider" = String, Path, description = "Provider identifier"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Task status", body = TaskStatus),
        (status = 400, description = "Unknown or disabled provider", body = ApiError),
        (status = 401, description = "Missing or invalid X-User-Id", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn task_status(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(provider): Path<String>,
) -> Result<Json<TaskStatus>, ApiError> {
    let kind = state.registry.lookup(&provider)?.kind;
    Ok(Json(state.supervisor.status(user_id, kind)))
}

fn rate_limit_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(decision.reset_at.timestamp()),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn rate_limit_headers_carry_window_state() {
        let decision = RateLimitDecision {
            allowed: true,
            limit: 10,
            remaining: 7,
            reset_at: Utc.timestamp_opt(1_700_000_060, 0).unwrap(),
            retry_after_secs: 0,
        };

        let headers = rate_limit_headers(&decision);
        assert_eq!(headers["x-ratelimit-limit"], "10");
        assert_eq!(headers["x-ratelimit-remaining"], "7");
        assert_eq!(headers["x-ratelimit-reset"], "1700000060");
    }
}
