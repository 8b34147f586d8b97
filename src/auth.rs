//! # Authentication
//!
//! Two request guards:
//! - [`cron_auth_middleware`] protects the scheduled endpoints with the shared
//!   cron secret presented as `Authorization: Bearer <secret>`.
//! - [`UserId`] extracts the caller identity from the `X-User-Id` header set by
//!   the upstream gateway.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized};
use crate::server::AppState;

pub const USER_ID_HEADER: &str = "X-User-Id";

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Rejects requests whose bearer token does not match the configured cron secret
pub async fn cron_auth_middleware(
    State(config): State<Arc<AppConfig>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    validate_cron_secret(&config, token)?;

    tracing::debug!("Authenticated scheduler request");
    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
}

fn validate_cron_secret(config: &AppConfig, token: &str) -> Result<(), ApiError> {
    // No configured secret means no caller can be authorized
    let Some(secret) = config.cron_secret.as_deref().filter(|s| !s.is_empty()) else {
        tracing::warn!("Scheduler request rejected: no cron secret configured");
        return Err(unauthorized(Some("Invalid bearer token")));
    };

    if bool::from(token.as_bytes().ct_eq(secret.as_bytes())) {
        Ok(())
    } else {
        tracing::warn!("Scheduler request rejected: bearer token mismatch");
        Err(unauthorized(Some("Invalid bearer token")))
    }
}

/// Authenticated end user, taken from the `X-User-Id` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| unauthorized(Some("Missing X-User-Id header")))?
            .to_str()
            .map_err(|_| unauthorized(Some("Invalid X-User-Id header")))?;

        value
            .trim()
            .parse::<Uuid>()
            .map(UserId)
            .map_err(|_| unauthorized(Some("X-User-Id must be a valid UUID")))
    }
}

/// OpenAPI header parameter for X-User-Id
#[derive(Debug, Serialize, Deserialize, IntoParams, utoipa::ToSchema)]
#[into_params(parameter_in = Header)]
pub struct UserHeader {
    /// Authenticated user identifier (UUID) set by the gateway
    #[serde(rename = "X-User-Id")]
    #[param(rename = "X-User-Id", value_type = String)]
    pub user_id: String,
}
