//! Scheduled batch sync
//!
//! Syncs every connected pair for the providers an interval selects, bounded by
//! a semaphore. Each pair runs in its own task, so a failure, timeout or panic
//! in one pair is counted and the rest of the batch carries on.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::SyncCoreError;
use crate::models::sync_run::SyncTrigger;
use crate::providers::{ProviderKind, ProviderRegistry, SyncInterval, providers_for_interval};
use crate::repositories::ConnectionRepository;
use crate::sync::orchestrator::SyncOrchestrator;

/// Aggregate counts for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct BatchSummary {
    /// Providers the interval selected
    pub providers: Vec<ProviderKind>,
    /// Distinct users with at least one dispatched pair
    pub users_processed: u32,
    /// Pairs dispatched to the orchestrator
    pub providers_synced: u32,
    pub success_count: u32,
    pub failure_count: u32,
    /// Pairs already syncing elsewhere
    pub skipped_count: u32,
    /// Dispatch stopped early because shutdown began
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct BatchRunner {
    orchestrator: SyncOrchestrator,
    connections: ConnectionRepository,
    registry: Arc<ProviderRegistry>,
    concurrency: usize,
}

impl BatchRunner {
    pub fn new(
        orchestrator: SyncOrchestrator,
        connections: ConnectionRepository,
        registry: Arc<ProviderRegistry>,
        concurrency: usize,
    ) -> Self {
        Self {
            orchestrator,
            connections,
            registry,
            concurrency: concurrency.max(1),
        }
    }

    /// Run one batch for `interval` (`None` selects every provider class)
    #[instrument(skip(self, cancel), fields(interval = ?interval))]
    pub async fn run(
        &self,
        interval: Option<SyncInterval>,
        cron_execution_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary, SyncCoreError> {
        let providers = providers_for_interval(interval, self.registry.enabled());
        let names: Vec<&str> = providers.iter().map(|kind| kind.as_str()).collect();
        let pairs = self.connections.list_connected(&names).await?;

        let mut summary = BatchSummary {
            providers: providers.clone(),
            ..Default::default()
        };
        tracing::info!(pairs = pairs.len(), "Starting batch sync");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut users = HashSet::new();
        let mut handles = Vec::with_capacity(pairs.len());

        for connection in pairs {
            let provider: ProviderKind = match connection.provider.parse() {
                Ok(provider) => provider,
                Err(_) => {
                    tracing::warn!(provider = %connection.provider, "Skipping connection for unknown provider");
                    continue;
                }
            };

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!("Batch cancelled; no further pairs will be dispatched");
                    summary.cancelled = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => permit
                    .map_err(|_| SyncCoreError::Internal("batch semaphore closed".to_string()))?,
            };

            users.insert(connection.user_id);
            summary.providers_synced += 1;

            let orchestrator = self.orchestrator.clone();
            let user_id = connection.user_id;
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                orchestrator
                    .sync_provider(user_id, provider, SyncTrigger::Scheduled, cron_execution_id)
                    .await
            }));
        }

        // In-flight pairs always run to completion or their own timeout
        for handle in handles {
            match handle.await {
                Ok(outcome) if outcome.success => summary.success_count += 1,
                Ok(outcome) if outcome.skipped => summary.skipped_count += 1,
                Ok(_) => summary.failure_count += 1,
                Err(err) => {
                    summary.failure_count += 1;
                    tracing::error!(error = %err, "Pair sync task panicked");
                }
            }
        }

        summary.users_processed = u32::try_from(users.len()).unwrap_or(u32::MAX);
        tracing::info!(
            users = summary.users_processed,
            pairs = summary.providers_synced,
            succeeded = summary.success_count,
            failed = summary.failure_count,
            skipped = summary.skipped_count,
            "Batch sync finished"
        );

        Ok(summary)
    }
}
