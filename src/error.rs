//! # Error Handling
//!
//! Domain errors for the credential and sync engine ([`SyncCoreError`]) and the
//! problem+json HTTP representation ([`ApiError`]) they are translated into at
//! the handler boundary.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::crypto::CryptoError;
use crate::telemetry;

/// Maximum number of characters of an upstream body echoed back in details
const BODY_SNIPPET_CHARS: usize = 200;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new(status: StatusCode, code: &str, message: &str) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Extract the request trace ID, falling back to a short correlation ID
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

/// Domain error taxonomy shared by the vault, OAuth coordinator and sync engine
#[derive(Debug, Error)]
pub enum SyncCoreError {
    #[error("{provider} is not connected")]
    NotConnected { provider: String },

    #[error("reauthorization required for {provider}: {reason}")]
    ReauthRequired { provider: String, reason: String },

    #[error("token exchange with {provider} failed: {body}")]
    OAuthExchange {
        provider: String,
        /// Upstream HTTP status; `None` for transport failures
        status: Option<u16>,
        body: String,
    },

    #[error("stored credential could not be decrypted: {0}")]
    Decryption(#[from] CryptoError),

    #[error("authorization state is missing, expired, mismatched or already used")]
    CsrfValidation,

    #[error("rate limit exceeded; retry in {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("{provider} API error: {message}")]
    ProviderApi {
        provider: String,
        status: Option<u16>,
        retryable: bool,
        message: String,
    },

    #[error("{0}")]
    Validation(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncCoreError {
    pub fn reauth(provider: &str, reason: impl Into<String>) -> Self {
        SyncCoreError::ReauthRequired {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    /// Classify an upstream HTTP status: 5xx and 429 are retryable
    pub fn provider_status(provider: &str, status: u16, body: &str) -> Self {
        SyncCoreError::ProviderApi {
            provider: provider.to_string(),
            status: Some(status),
            retryable: status >= 500 || status == 429,
            message: format!("status {}: {}", status, truncate(body)),
        }
    }

    /// Transport-level failure (connect, TLS, body read); always retryable
    pub fn provider_transport(provider: &str, err: impl std::fmt::Display) -> Self {
        SyncCoreError::ProviderApi {
            provider: provider.to_string(),
            status: None,
            retryable: true,
            message: err.to_string(),
        }
    }

    /// Whether the next scheduled cycle can be expected to succeed without user action
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncCoreError::ProviderApi { retryable, .. } => *retryable,
            SyncCoreError::Timeout { .. } | SyncCoreError::Database(_) => true,
            SyncCoreError::OAuthExchange { status, .. } => status.is_none_or(|s| s >= 500),
            _ => false,
        }
    }

    /// Whether the user must reconnect the provider
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            SyncCoreError::ReauthRequired { .. } | SyncCoreError::Decryption(_)
        )
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() > BODY_SNIPPET_CHARS {
        let truncated: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
        format!("{}...", truncated)
    } else {
        body.to_string()
    }
}

pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error.code().is_some_and(|code| {
        let code_str = code.as_ref();
        code_str == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code_str)
    })
}

/// Upstream provider error information
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderError {
    /// Provider identifier (e.g., "github", "slack")
    pub provider: String,
    /// HTTP status code from upstream
    pub status: Option<u16>,
    /// Response body snippet from upstream (truncated)
    pub body_snippet: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<SyncCoreError> for ApiError {
    fn from(error: SyncCoreError) -> Self {
        match error {
            SyncCoreError::NotConnected { provider } => ApiError::new(
                StatusCode::NOT_FOUND,
                "NOT_CONNECTED",
                &format!("{} is not connected", provider),
            ),
            SyncCoreError::ReauthRequired { provider, .. } => ApiError::new(
                StatusCode::UNAUTHORIZED,
                "REAUTH_REQUIRED",
                &format!("Reauthorization required for {}", provider),
            )
            .with_details(json!({ "provider": provider })),
            SyncCoreError::Decryption(err) => {
                tracing::error!(error = %err, "Credential decryption failed");
                ApiError::new(
                    StatusCode::UNAUTHORIZED,
                    "REAUTH_REQUIRED",
                    "Stored credential is unusable; reconnect the provider",
                )
            }
            SyncCoreError::OAuthExchange {
                provider,
                status,
                body,
            } => {
                let details = json!(ProviderError {
                    provider: provider.clone(),
                    status,
                    body_snippet: Some(truncate(&body)),
                });
                match status {
                    Some(s) if (400..500).contains(&s) => ApiError::new(
                        StatusCode::BAD_REQUEST,
                        "OAUTH_EXCHANGE_FAILED",
                        &format!("{} rejected the authorization code", provider),
                    ),
                    _ => ApiError::new(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "PROVIDER_ERROR",
                        &format!("{} token endpoint unavailable", provider),
                    ),
                }
                .with_details(details)
            }
            SyncCoreError::CsrfValidation => ApiError::new(
                StatusCode::BAD_REQUEST,
                "CSRF_VALIDATION_FAILED",
                "Authorization state is invalid or expired",
            ),
            SyncCoreError::RateLimitExceeded { retry_after_secs } => ApiError::new(
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Rate limit exceeded",
            )
            .with_retry_after(retry_after_secs),
            SyncCoreError::ProviderApi {
                provider,
                status,
                retryable,
                message,
            } => {
                let details = json!(ProviderError {
                    provider: provider.clone(),
                    status,
                    body_snippet: Some(truncate(&message)),
                });
                let status_code = if retryable {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::BAD_REQUEST
                };
                ApiError::new(
                    status_code,
                    "PROVIDER_ERROR",
                    &format!("{} request failed", provider),
                )
                .with_details(details)
            }
            SyncCoreError::Validation(message) => {
                ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
            }
            SyncCoreError::Timeout { operation, seconds } => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "UPSTREAM_TIMEOUT",
                &format!("{} timed out after {}s", operation, seconds),
            ),
            SyncCoreError::Database(err) => err.into(),
            SyncCoreError::Internal(message) => {
                tracing::error!(%message, "Internal error");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "An internal error occurred",
                )
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            &format!("Invalid query parameters: {}", rejection.body_text()),
        )
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            _ => {
                tracing::error!("Database error: {:?}", error);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a not found error (404)
pub fn not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}
