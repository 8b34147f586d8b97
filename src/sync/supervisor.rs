//! Supervised manual sync tasks
//!
//! Manual syncs run on their own tokio task so a dropped HTTP request does not
//! abandon them. The supervisor remembers the latest task per pair and can
//! answer whether it is still running and how it ended.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::SyncCoreError;
use crate::models::sync_run::SyncTrigger;
use crate::providers::ProviderKind;
use crate::sync::orchestrator::{SyncOrchestrator, SyncOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

/// Observable state of the latest manual sync for a pair
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TaskStatus {
    pub state: TaskState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<SyncOutcome>,
}

impl TaskStatus {
    fn idle() -> Self {
        Self {
            state: TaskState::Idle,
            started_at: None,
            finished_at: None,
            outcome: None,
        }
    }
}

#[derive(Debug)]
struct TaskEntry {
    status: TaskStatus,
    handle: Option<JoinHandle<()>>,
}

type Pair = (Uuid, ProviderKind);

#[derive(Debug, Clone)]
pub struct SyncSupervisor {
    orchestrator: SyncOrchestrator,
    tasks: Arc<Mutex<HashMap<Pair, TaskEntry>>>,
}

impl SyncSupervisor {
    pub fn new(orchestrator: SyncOrchestrator) -> Self {
        Self {
            orchestrator,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    /// Start a manual sync for a pair and wait for its outcome.
    ///
    /// If a supervised sync for the pair is already running, returns a skipped
    /// outcome without starting another.
    pub async fn run_manual(
        &self,
        user_id: Uuid,
        provider: ProviderKind,
    ) -> Result<SyncOutcome, SyncCoreError> {
        let receiver = match self.spawn(user_id, provider) {
            Some(receiver) => receiver,
            None => return Ok(SyncOutcome::busy()),
        };

        receiver
            .await
            .map_err(|_| SyncCoreError::Internal("supervised sync task ended without an outcome".into()))
    }

    /// Spawn the task and register it; `None` if one is already running
    fn spawn(&self, user_id: Uuid, provider: ProviderKind) -> Option<oneshot::Receiver<SyncOutcome>> {
        let mut tasks = self.lock_tasks();
        if tasks
            .get(&(user_id, provider))
            .is_some_and(|entry| entry.status.state == TaskState::Running)
        {
            return None;
        }

        let (sender, receiver) = oneshot::channel();
        let orchestrator = self.orchestrator.clone();
        let registry = Arc::clone(&self.tasks);

        let handle = tokio::spawn(async move {
            // Runs only if the sync unwinds or the task is aborted
            let unfinished = scopeguard::guard((registry, sender), move |(registry, sender)| {
                tracing::error!(%user_id, %provider, "Supervised sync task ended without an outcome");
                let outcome = SyncOutcome::abandoned();
                record_outcome(&registry, (user_id, provider), outcome.clone());
                let _ = sender.send(outcome);
            });

            let outcome = orchestrator
                .sync_provider(user_id, provider, SyncTrigger::Manual, None)
                .await;

            let (registry, sender) = scopeguard::ScopeGuard::into_inner(unfinished);
            record_outcome(&registry, (user_id, provider), outcome.clone());

            // The requester may have gone away; the recorded status still stands
            let _ = sender.send(outcome);
        });

        tasks.insert(
            (user_id, provider),
            TaskEntry {
                status: TaskStatus {
                    state: TaskState::Running,
                    started_at: Some(Utc::now()),
                    finished_at: None,
                    outcome: None,
                },
                handle: Some(handle),
            },
        );

        Some(receiver)
    }

    /// Latest supervised task state for a pair.
    ///
    /// A scheduled sync holding the pair lock is reported as running.
    pub fn status(&self, user_id: Uuid, provider: ProviderKind) -> TaskStatus {
        let tasks = self.lock_tasks();
        let status = tasks
            .get(&(user_id, provider))
            .map(|entry| entry.status.clone())
            .unwrap_or_else(TaskStatus::idle);

        if status.state != TaskState::Running && self.orchestrator.locks().is_held(user_id, provider)
        {
            return TaskStatus {
                state: TaskState::Running,
                ..status
            };
        }
        status
    }

    /// Number of supervised tasks still running
    pub fn running_count(&self) -> usize {
        self.lock_tasks()
            .values()
            .filter(|entry| entry.status.state == TaskState::Running)
            .count()
    }

    /// Wait up to `grace` for running tasks; abort whatever is left
    pub async fn drain(&self, grace: Duration) {
        let handles: Vec<JoinHandle<()>> = self
            .lock_tasks()
            .values_mut()
            .filter_map(|entry| entry.handle.take())
            .collect();
        if handles.is_empty() {
            return;
        }

        tracing::info!(count = handles.len(), "Waiting for supervised syncs to finish");
        let aborters: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let waited = tokio::time::timeout(grace, async {
            for handle in handles {
                let _ = handle.await;
            }
        })
        .await;

        if waited.is_err() {
            tracing::warn!("Shutdown grace elapsed; aborting remaining supervised syncs");
            for aborter in aborters {
                aborter.abort();
            }
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<Pair, TaskEntry>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Move a pair's entry to its terminal state
fn record_outcome(tasks: &Mutex<HashMap<Pair, TaskEntry>>, pair: Pair, outcome: SyncOutcome) {
    let mut tasks = tasks.lock().unwrap_or_else(|poison| poison.into_inner());
    if let Some(entry) = tasks.get_mut(&pair) {
        entry.status.state = if outcome.success {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        };
        entry.status.finished_at = Some(Utc::now());
        entry.status.outcome = Some(outcome);
        entry.handle = None;
    }
}
