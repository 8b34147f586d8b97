//! Liveness and readiness probes

use axum::{Json, extract::State, http::StatusCode};

use crate::db;
use crate::handlers::types::{HealthResponse, ReadinessResponse};
use crate::server::AppState;

#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Process is up", body = HealthResponse)),
    tag = "health"
)]
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Ready once the database answers; lists the enabled providers
#[utoipa::path(
    get,
    path = "/readyz",
    responses(
        (status = 200, description = "Ready to serve", body = ReadinessResponse),
        (status = 503, description = "A dependency is unavailable", body = ReadinessResponse)
    ),
    tag = "health"
)]
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let database = match db::health_check(&state.db).await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "Readiness check failed: database");
            false
        }
    };
    let providers = state
        .registry
        .enabled()
        .map(|kind| kind.as_str().to_string())
        .collect();

    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadinessResponse {
        status: if database { "ready" } else { "unavailable" }.to_string(),
        database,
        providers,
    };
    (status, Json(body))
}
