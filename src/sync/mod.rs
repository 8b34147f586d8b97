//! Sync engine: per-pair orchestration, pair locking, supervised manual
//! tasks and scheduled batches.

pub mod batch;
pub mod locks;
pub mod orchestrator;
pub mod supervisor;

pub use batch::{BatchRunner, BatchSummary};
pub use locks::PairLocks;
pub use orchestrator::{ABANDONED_RUN_ERROR, SyncOrchestrator, SyncOutcome};
pub use supervisor::{SyncSupervisor, TaskState, TaskStatus};
