//! Single-pair sync state machine
//!
//! `sync_provider` loads the credential, refreshes it when expired, fetches
//! activity since the last high-water mark, upserts it, and records a
//! terminal [`SyncRun`](crate::models::sync_run::Model). Failures are turned
//! into notifications and a failed run; nothing is retried within the call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::SyncCoreError;
use crate::models::notification::NotificationType;
use crate::models::sync_run::SyncTrigger;
use crate::notifications::NotificationCenter;
use crate::providers::{ActivitySource, OAuthCoordinator, ProviderKind};
use crate::repositories::{ActivityRepository, ConnectionRepository, SyncRunRepository};
use crate::sync::locks::PairLocks;
use crate::vault::{CredentialVault, TokenBundle};

/// Tokens expiring within this margin are refreshed before use
const EXPIRY_SKEW_SECONDS: i64 = 60;

/// Error recorded on a run whose task panicked or was dropped mid-sync
pub const ABANDONED_RUN_ERROR: &str = "sync task ended unexpectedly";

/// Result of one `sync_provider` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SyncOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_synced: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Absent when no run was recorded, e.g. the pair was already syncing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// True when another sync for the same pair was in progress
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

impl SyncOutcome {
    fn succeeded(items_synced: u32, duration_ms: u64, run_id: Uuid) -> Self {
        Self {
            success: true,
            items_synced: Some(items_synced),
            error: None,
            duration_ms,
            run_id: Some(run_id),
            skipped: false,
        }
    }

    fn failed(error: String, duration_ms: u64, run_id: Option<Uuid>) -> Self {
        Self {
            success: false,
            items_synced: None,
            error: Some(error),
            duration_ms,
            run_id,
            skipped: false,
        }
    }

    pub(crate) fn abandoned() -> Self {
        Self::failed(ABANDONED_RUN_ERROR.to_string(), 0, None)
    }

    pub(crate) fn busy() -> Self {
        Self {
            success: false,
            items_synced: None,
            error: Some("a sync for this provider is already in progress".to_string()),
            duration_ms: 0,
            run_id: None,
            skipped: true,
        }
    }
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    vault: CredentialVault,
    oauth: Arc<OAuthCoordinator>,
    source: Arc<dyn ActivitySource>,
    notifications: NotificationCenter,
    connections: ConnectionRepository,
    activities: ActivityRepository,
    runs: SyncRunRepository,
    locks: PairLocks,
    call_timeout: Duration,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    pub fn new(
        db: Arc<DatabaseConnection>,
        vault: CredentialVault,
        oauth: Arc<OAuthCoordinator>,
        source: Arc<dyn ActivitySource>,
        notifications: NotificationCenter,
        call_timeout: Duration,
    ) -> Self {
        Self {
            vault,
            oauth,
            source,
            notifications,
            connections: ConnectionRepository::new(db.clone()),
            activities: ActivityRepository::new(db.clone()),
            runs: SyncRunRepository::new(db),
            locks: PairLocks::new(),
            call_timeout,
        }
    }

    pub fn locks(&self) -> &PairLocks {
        &self.locks
    }

    /// Sync one `(user, provider)` pair.
    ///
    /// Never returns an error: every failure ends as a failed [`SyncOutcome`]
    /// so batch callers can keep going.
    #[instrument(skip(self), fields(user_id = %user_id, provider = %provider, run_id = tracing::field::Empty))]
    pub async fn sync_provider(
        &self,
        user_id: Uuid,
        provider: ProviderKind,
        trigger: SyncTrigger,
        cron_execution_id: Option<Uuid>,
    ) -> SyncOutcome {
        let Some(_pair_lock) = self.locks.try_acquire(user_id, provider) else {
            tracing::info!("Sync already in progress for pair; skipping");
            metrics::counter!("sync_runs_total", "provider" => provider.as_str(), "status" => "skipped")
                .increment(1);
            return SyncOutcome::busy();
        };

        metrics::gauge!("sync_in_flight").increment(1.0);
        let _in_flight = scopeguard::guard((), |_| {
            metrics::gauge!("sync_in_flight").decrement(1.0);
        });

        let started = Instant::now();
        let run = match self
            .runs
            .start(user_id, provider.as_str(), trigger, cron_execution_id)
            .await
        {
            Ok(run) => run,
            Err(err) => {
                tracing::error!(error = %err, "Failed to record sync run start");
                return SyncOutcome::failed(
                    SyncCoreError::from(err).to_string(),
                    elapsed_ms(started),
                    None,
                );
            }
        };
        tracing::Span::current().record("run_id", tracing::field::display(run.id));

        // A panic or a dropped future must still close the run
        let open_run = scopeguard::guard((self.runs.clone(), run.id), move |(runs, run_id)| {
            tracing::error!(%run_id, "Sync ended without recording an outcome");
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let duration_ms = elapsed_ms(started) as i64;
                    if let Err(err) = runs.fail(run_id, ABANDONED_RUN_ERROR, duration_ms).await {
                        tracing::error!(error = %err, %run_id, "Failed to close abandoned sync run");
                    }
                });
            }
        });

        let result = self.execute(user_id, provider).await;
        let duration_ms = elapsed_ms(started);
        metrics::histogram!("sync_duration_ms", "provider" => provider.as_str())
            .record(duration_ms as f64);

        let outcome = match result {
            Ok(items_synced) => {
                self.finish_success(user_id, provider, run.id, items_synced, duration_ms)
                    .await
            }
            Err(err) => {
                self.finish_failure(user_id, provider, run.id, err, duration_ms)
                    .await
            }
        };
        scopeguard::ScopeGuard::into_inner(open_run);
        outcome
    }

    /// Steps that can fail the run
    async fn execute(&self, user_id: Uuid, provider: ProviderKind) -> Result<u32, SyncCoreError> {
        let definition = self.oauth.registry().get(provider)?;

        let token = self
            .vault
            .get_token(user_id, provider.as_str())
            .await?
            .ok_or_else(|| SyncCoreError::NotConnected {
                provider: provider.as_str().to_string(),
            })?;

        let token = if token.is_expired_at(Utc::now(), chrono::Duration::seconds(EXPIRY_SKEW_SECONDS))
        {
            self.refresh_expired(user_id, provider, token).await?
        } else {
            token
        };

        let since = self
            .connections
            .find(user_id, provider.as_str())
            .await?
            .and_then(|connection| connection.last_synced_at);
        let watermark = Utc::now();

        let items = tokio::time::timeout(
            self.call_timeout,
            self.source
                .fetch_since(&definition, &token.access_token, since),
        )
        .await
        .map_err(|_| SyncCoreError::Timeout {
            operation: format!("{} activity fetch", provider),
            seconds: self.call_timeout.as_secs(),
        })??;

        let written = self
            .activities
            .upsert_many(user_id, provider.as_str(), items)
            .await?;
        self.connections
            .record_sync_success(user_id, provider.as_str(), watermark)
            .await?;

        Ok(u32::try_from(written).unwrap_or(u32::MAX))
    }

    /// Exchange the refresh token for a new access token and persist it.
    ///
    /// Every way this can fail ends in [`SyncCoreError::ReauthRequired`].
    async fn refresh_expired(
        &self,
        user_id: Uuid,
        provider: ProviderKind,
        token: TokenBundle,
    ) -> Result<TokenBundle, SyncCoreError> {
        let Some(refresh_token) = token.refresh_token.as_deref() else {
            return Err(SyncCoreError::reauth(
                provider.as_str(),
                "access token expired and no refresh token is stored",
            ));
        };
        if !self.oauth.supports_refresh(provider) {
            return Err(SyncCoreError::reauth(
                provider.as_str(),
                "access token expired and the provider does not support refresh",
            ));
        }

        let refreshed =
            match tokio::time::timeout(self.call_timeout, self.oauth.refresh(provider, refresh_token))
                .await
            {
                Ok(Ok(bundle)) => bundle,
                Ok(Err(err)) => {
                    tracing::warn!(
                        error = %err,
                        retryable = err.is_retryable(),
                        "Token refresh failed"
                    );
                    return Err(SyncCoreError::reauth(
                        provider.as_str(),
                        format!("token refresh failed: {}", err),
                    ));
                }
                Err(_) => {
                    tracing::warn!("Token refresh timed out");
                    return Err(SyncCoreError::reauth(
                        provider.as_str(),
                        "token refresh timed out",
                    ));
                }
            };

        self.vault
            .store_token(user_id, provider.as_str(), &refreshed)
            .await?;
        tracing::info!("Refreshed expired access token");
        Ok(refreshed)
    }

    async fn finish_success(
        &self,
        user_id: Uuid,
        provider: ProviderKind,
        run_id: Uuid,
        items_synced: u32,
        duration_ms: u64,
    ) -> SyncOutcome {
        if let Err(err) = self
            .runs
            .complete(run_id, items_synced as i32, duration_ms as i64)
            .await
        {
            tracing::error!(error = %err, "Failed to record sync run success");
        }

        if let Err(err) = self
            .notifications
            .clear_type(user_id, provider.as_str(), NotificationType::SyncFailures)
            .await
        {
            tracing::warn!(error = %err, "Failed to clear sync failure notification");
        }

        metrics::counter!("sync_runs_total", "provider" => provider.as_str(), "status" => "success")
            .increment(1);
        tracing::info!(items_synced, duration_ms, "Sync completed");

        SyncOutcome::succeeded(items_synced, duration_ms, run_id)
    }

    async fn finish_failure(
        &self,
        user_id: Uuid,
        provider: ProviderKind,
        run_id: Uuid,
        err: SyncCoreError,
        duration_ms: u64,
    ) -> SyncOutcome {
        let message = err.to_string();

        if let Err(db_err) = self.runs.fail(run_id, &message, duration_ms as i64).await {
            tracing::error!(error = %db_err, "Failed to record sync run failure");
        }

        let notified = if err.requires_reauth() {
            self.notifications
                .notify_reauth_required(user_id, provider)
                .await
                .map(|_| ())
        } else if matches!(err, SyncCoreError::NotConnected { .. }) {
            Ok(())
        } else {
            self.notifications
                .notify_sync_failure(user_id, provider, &message)
                .await
                .map(|_| ())
        };
        if let Err(notify_err) = notified {
            tracing::warn!(error = %notify_err, "Failed to upsert failure notification");
        }

        if let Err(db_err) = self
            .connections
            .record_sync_failure(user_id, provider.as_str(), &message)
            .await
        {
            tracing::warn!(error = %db_err, "Failed to record sync failure on connection");
        }

        metrics::counter!("sync_runs_total", "provider" => provider.as_str(), "status" => "failed")
            .increment(1);
        if err.is_retryable() {
            tracing::warn!(error = %message, duration_ms, "Sync failed; next cycle will retry");
        } else {
            tracing::error!(error = %message, duration_ms, "Sync failed");
        }

        SyncOutcome::failed(message, duration_ms, Some(run_id))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
