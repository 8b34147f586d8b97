//! # OAuth Handlers
//!
//! Connect, callback and disconnect for a user's provider account.

use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
};
use url::Url;

use crate::auth::{UserHeader, UserId};
use crate::error::{ApiError, SyncCoreError};
use crate::handlers::types::CallbackQuery;
use crate::providers::ProviderKind;
use crate::repositories::ConnectionRepository;
use crate::server::AppState;

/// Redirect the browser to the provider's consent page
#[utoipa::path(
    get,
    path = "/oauth/{provider}/connect",
    params(
        ("provider" = String, Path, description = "Provider identifier, e.g. 'github'"),
        UserHeader
    ),
    responses(
        (status = 302, description = "Redirect to the provider authorization URL"),
        (status = 400, description = "Unknown or disabled provider", body = ApiError),
        (status = 401, description = "Missing or invalid X-User-Id", body = ApiError)
    ),
    tag = "oauth"
)]
pub async fn connect(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(provider): Path<String>,
) -> Result<Response, ApiError> {
    let definition = state.registry.lookup(&provider)?;
    let kind = definition.kind;

    let state_token = state
        .csrf
        .generate_state_token(user_id, kind.as_str())
        .await?;
    let authorize_url = state.oauth.get_authorization_url(kind, &state_token)?;

    tracing::info!(user_id = %user_id, provider = %kind, "OAuth flow initiated");
    Ok(found(authorize_url.as_str()))
}

/// Complete the authorization handshake and store the credential
///
/// Always answers with a redirect to the application; failures are reported
/// through `error` and `provider` query parameters.
#[utoipa::path(
    get,
    path = "/oauth/{provider}/callback",
    params(
        ("provider" = String, Path, description = "Provider identifier"),
        CallbackQuery,
        UserHeader
    ),
    responses(
        (status = 302, description = "Redirect to the application with `connected` or `error`"),
        (status = 401, description = "Missing or invalid X-User-Id", body = ApiError)
    ),
    tag = "oauth"
)]
pub async fn callback(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiError> {
    let kind = match state.registry.lookup(&provider) {
        Ok(definition) => definition.kind,
        Err(_) => return app_redirect(&state, &[("error", "invalid_provider"), ("provider", &provider)]),
    };

    match complete_authorization(&state, user_id, kind, &query).await {
        Ok(()) => {
            tracing::info!(user_id = %user_id, provider = %kind, "Provider connected");
            app_redirect(&state, &[("connected", kind.as_str())])
        }
        Err(err) => {
            let code = err.code();
            tracing::warn!(user_id = %user_id, provider = %kind, error = %err, code, "OAuth callback failed");
            app_redirect(&state, &[("error", code), ("provider", kind.as_str())])
        }
    }
}

/// Why a callback did not produce a connection
#[derive(Debug)]
enum CallbackFailure {
    /// The user declined on the provider's consent page
    Denied(String),
    MissingCode,
    Core(SyncCoreError),
}

impl From<SyncCoreError> for CallbackFailure {
    fn from(err: SyncCoreError) -> Self {
        CallbackFailure::Core(err)
    }
}

impl CallbackFailure {
    fn code(&self) -> &'static str {
        match self {
            CallbackFailure::Denied(_) => "access_denied",
            CallbackFailure::MissingCode => "missing_code",
            CallbackFailure::Core(SyncCoreError::CsrfValidation) => "csrf_validation_failed",
            CallbackFailure::Core(SyncCoreError::OAuthExchange { status: Some(s), .. })
                if *s < 500 =>
            {
                "oauth_exchange_failed"
            }
            CallbackFailure::Core(SyncCoreError::OAuthExchange { .. }) => "provider_unavailable",
            CallbackFailure::Core(_) => "internal_error",
        }
    }
}

impl std::fmt::Display for CallbackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallbackFailure::Denied(reason) => write!(f, "authorization denied: {}", reason),
            CallbackFailure::MissingCode => f.write_str("authorization code is missing"),
            CallbackFailure::Core(err) => err.fmt(f),
        }
    }
}

async fn complete_authorization(
    state: &AppState,
    user_id: uuid::Uuid,
    kind: ProviderKind,
    query: &CallbackQuery,
) -> Result<(), CallbackFailure> {
    // State is consumed first so a callback can never be replayed
    let presented = query.state.as_deref().unwrap_or_default();
    state.csrf.verify(presented, user_id, kind.as_str()).await?;

    if let Some(error) = query.error.as_deref() {
        return Err(CallbackFailure::Denied(match query.error_description.as_deref() {
            Some(description) => format!("{}: {}", error, description),
            None => error.to_string(),
        }));
    }

    let code = query
        .code
        .as_deref()
        .filter(|code| !code.is_empty())
        .ok_or(CallbackFailure::MissingCode)?;

    let bundle = state.oauth.exchange_code_for_tokens(kind, code).await?;
    state.vault.store_token(user_id, kind.as_str(), &bundle).await?;

    ConnectionRepository::new(state.db.clone())
        .set_connected(user_id, kind.as_str(), true)
        .await
        .map_err(SyncCoreError::from)?;
    state
        .notifications
        .clear_provider_notifications(user_id, kind.as_str())
        .await?;
    state.status_cache.invalidate(&(user_id, kind));

    Ok(())
}

/// Revoke remotely (best-effort), delete the credential and mark disconnected
#[utoipa::path(
    post,
    path = "/oauth/{provider}/disconnect",
    params(
        ("provider" = String, Path, description = "Provider identifier"),
        UserHeader
    ),
    responses(
        (status = 204, description = "Disconnected"),
        (status = 400, description = "Unknown or disabled provider", body = ApiError),
        (status = 401, description = "Missing or invalid X-User-Id", body = ApiError)
    ),
    tag = "oauth"
)]
pub async fn disconnect(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(provider): Path<String>,
) -> Result<StatusCode, ApiError> {
    let kind = state.registry.lookup(&provider)?.kind;

    match state.vault.get_token(user_id, kind.as_str()).await {
        Ok(Some(bundle)) => state.oauth.revoke_token(kind, &bundle.access_token).await,
        Ok(None) => tracing::debug!("No stored credential to revoke"),
        // An unreadable credential cannot be revoked, only deleted
        Err(err) => tracing::warn!(error = %err, "Skipping revocation of unreadable credential"),
    }

    state.vault.delete_token(user_id, kind.as_str()).await?;
    ConnectionRepository::new(state.db.clone())
        .set_connected(user_id, kind.as_str(), false)
        .await?;
    state.status_cache.invalidate(&(user_id, kind));

    tracing::info!(user_id = %user_id, provider = %kind, "Provider disconnected");
    Ok(StatusCode::NO_CONTENT)
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

fn app_redirect(state: &AppState, params: &[(&str, &str)]) -> Result<Response, ApiError> {
    let mut url = Url::parse(&state.config.app_redirect_url).map_err(|e| {
        SyncCoreError::Internal(format!("invalid app redirect URL: {}", e))
    })?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    Ok(found(url.as_str()))
}
