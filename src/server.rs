//! # Server Configuration
//!
//! Application state wiring, the router, and the serve loop with graceful
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::HeaderName,
    middleware,
    routing::{delete, get, post},
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use crate::auth::cron_auth_middleware;
use crate::cache::StatusCache;
use crate::config::{AppConfig, ConfigError};
use crate::cron_monitor::CronExecutionMonitor;
use crate::crypto::{CryptoError, CryptoKey};
use crate::csrf::CsrfStateGuard;
use crate::error::SyncCoreError;
use crate::handlers::{self, types::SyncStatusResponse};
use crate::notifications::NotificationCenter;
use crate::providers::{
    ActivitySource, HttpActivitySource, OAuthCoordinator, ProviderKind, ProviderRegistry,
    RegistryError,
};
use crate::rate_limit::RateLimiter;
use crate::repositories::{ConnectionRepository, SyncRunRepository};
use crate::sync::{BatchRunner, SyncOrchestrator, SyncSupervisor};
use crate::telemetry::{REQUEST_ID_HEADER, trace_context_middleware};
use crate::vault::CredentialVault;

pub type StatusCacheHandle = Arc<StatusCache<(Uuid, ProviderKind), SyncStatusResponse>>;

/// Errors raised while assembling application state
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("invalid crypto key: {0}")]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Core(#[from] SyncCoreError),
}

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub registry: Arc<ProviderRegistry>,
    pub vault: CredentialVault,
    pub csrf: CsrfStateGuard,
    pub oauth: Arc<OAuthCoordinator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub notifications: NotificationCenter,
    pub supervisor: SyncSupervisor,
    pub cron_monitor: CronExecutionMonitor,
    pub status_cache: StatusCacheHandle,
    /// Cancelled once shutdown begins; batches stop dispatching new pairs
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire every component with the HTTP activity source
    pub fn new(config: AppConfig, db: DatabaseConnection) -> Result<Self, StartupError> {
        let source = HttpActivitySource::new(call_timeout(&config))?;
        Self::with_source(config, Arc::new(db), Arc::new(source))
    }

    /// Wire every component around the given activity source
    pub fn with_source(
        config: AppConfig,
        db: Arc<DatabaseConnection>,
        source: Arc<dyn ActivitySource>,
    ) -> Result<Self, StartupError> {
        let key = CryptoKey::new(config.crypto_key.clone().ok_or(ConfigError::MissingCryptoKey)?)?;
        let timeout = call_timeout(&config);

        let registry = Arc::new(ProviderRegistry::from_config(&config)?);
        let vault = CredentialVault::new(db.clone(), key.clone());
        let csrf = CsrfStateGuard::new(
            db.clone(),
            &key,
            chrono::Duration::minutes(config.state_ttl_minutes as i64),
        )?;
        let oauth = Arc::new(OAuthCoordinator::new(
            registry.clone(),
            &config.public_base_url,
            timeout,
        )?);
        let notifications = NotificationCenter::new(db.clone(), &config.app_redirect_url);

        let orchestrator = SyncOrchestrator::new(
            db.clone(),
            vault.clone(),
            oauth.clone(),
            source,
            notifications.clone(),
            timeout,
        );
        let batch = BatchRunner::new(
            orchestrator.clone(),
            ConnectionRepository::new(db.clone()),
            registry.clone(),
            config.sync.batch_concurrency,
        );
        let cron_monitor = CronExecutionMonitor::new(db.clone(), batch);
        let supervisor = SyncSupervisor::new(orchestrator);

        let status_cache = Arc::new(StatusCache::new(
            config.status_cache.capacity,
            Duration::from_secs(config.status_cache.ttl_seconds),
        ));
        let rate_limiter = Arc::new(RateLimiter::from_config(&config.rate_limits));

        Ok(Self {
            config: Arc::new(config),
            db,
            registry,
            vault,
            csrf,
            oauth,
            rate_limiter,
            notifications,
            supervisor,
            cron_monitor,
            status_cache,
            shutdown: CancellationToken::new(),
        })
    }
}

fn call_timeout(config: &AppConfig) -> Duration {
    Duration::from_secs(config.sync.call_timeout_seconds)
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let cron_routes = Router::new()
        .route("/cron/sync", post(handlers::cron::run_sync))
        .route("/cron/monitoring", get(handlers::cron::monitoring))
        .route("/cron/cleanup", post(handlers::cron::cleanup))
        .route_layer(middleware::from_fn_with_state(
            state.config.clone(),
            cron_auth_middleware,
        ));

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::health::healthz))
        .route("/readyz", get(handlers::health::readyz))
        .route("/oauth/{provider}/connect", get(handlers::oauth::connect))
        .route("/oauth/{provider}/callback", get(handlers::oauth::callback))
        .route("/oauth/{provider}/disconnect", post(handlers::oauth::disconnect))
        .route("/sync/{provider}", post(handlers::sync::trigger_sync))
        .route("/sync/{provider}/status", get(handlers::sync::sync_status))
        .route("/sync/{provider}/task", get(handlers::sync::task_status))
        .route(
            "/notifications",
            get(handlers::notifications::list_notifications),
        )
        .route(
            "/notifications/unread-count",
            get(handlers::notifications::unread_count),
        )
        .route(
            "/notifications/read-all",
            post(handlers::notifications::mark_all_read),
        )
        .route(
            "/notifications/{id}/read",
            post(handlers::notifications::mark_read),
        )
        .route(
            "/notifications/{id}",
            delete(handlers::notifications::delete_notification),
        )
        .merge(cron_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
}

/// Starts the server and blocks until a shutdown signal has been handled
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    let addr = config.bind_addr()?;
    let grace = Duration::from_secs(config.sync.shutdown_grace_seconds);
    let profile = config.profile.clone();

    let state = AppState::new(config, db)?;
    let runs = SyncRunRepository::new(state.db.clone());

    // Runs left open by a previous process can never finish
    let recovered = runs.fail_stale_running(Utc::now(), "interrupted by restart").await?;
    if recovered > 0 {
        tracing::warn!(count = recovered, "Marked interrupted sync runs as failed");
    }

    let shutdown = state.shutdown.clone();
    let supervisor = state.supervisor.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    supervisor.drain(grace).await;
    let abandoned = runs.fail_stale_running(Utc::now(), "cancelled").await?;
    if abandoned > 0 {
        tracing::warn!(count = abandoned, "Marked unfinished sync runs as cancelled");
    }

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM and cancels `token`
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    token.cancel();
}

struct CronSecurity;

impl Modify for CronSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health::healthz,
        crate::handlers::health::readyz,
        crate::handlers::oauth::connect,
        crate::handlers::oauth::callback,
        crate::handlers::oauth::disconnect,
        crate::handlers::sync::trigger_sync,
        crate::handlers::sync::sync_status,
        crate::handlers::sync::task_status,
        crate::handlers::notifications::list_notifications,
        crate::handlers::notifications::unread_count,
        crate::handlers::notifications::mark_read,
        crate::handlers::notifications::mark_all_read,
        crate::handlers::notifications::delete_notification,
        crate::handlers::cron::run_sync,
        crate::handlers::cron::monitoring,
        crate::handlers::cron::cleanup,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::error::ProviderError,
            crate::providers::ProviderKind,
            crate::handlers::types::ConnectionStatus,
            crate::handlers::types::SyncRunView,
            crate::handlers::types::SyncStatusResponse,
            crate::handlers::types::NotificationView,
            crate::handlers::types::UnreadCountResponse,
            crate::handlers::types::UpdatedCountResponse,
            crate::handlers::types::CleanupResponse,
            crate::handlers::types::HealthResponse,
            crate::handlers::types::ReadinessResponse,
            crate::sync::SyncOutcome,
            crate::sync::TaskState,
            crate::sync::TaskStatus,
            crate::sync::BatchSummary,
            crate::cron_monitor::CronSyncReport,
            crate::cron_monitor::DashboardData,
            crate::cron_monitor::ExecutionView,
        )
    ),
    modifiers(&CronSecurity),
    tags(
        (name = "oauth", description = "Provider authorization lifecycle"),
        (name = "sync", description = "Manual sync and status"),
        (name = "notifications", description = "User-facing notifications"),
        (name = "cron", description = "Scheduler endpoints"),
    ),
    info(
        title = "Connector Sync API",
        description = "OAuth credential lifecycle and activity sync orchestration",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
