//! Advisory per-pair locks
//!
//! At most one sync runs for a `(user, provider)` pair at a time. The lock is
//! released when the guard drops, on every exit path including panics and
//! cancellation of the owning future.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::providers::ProviderKind;

type Pair = (Uuid, ProviderKind);

#[derive(Debug, Clone, Default)]
pub struct PairLocks {
    held: Arc<Mutex<HashSet<Pair>>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for a pair, or `None` if a sync already holds it
    pub fn try_acquire(&self, user_id: Uuid, provider: ProviderKind) -> Option<PairLockGuard> {
        let mut held = self
            .held
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if !held.insert((user_id, provider)) {
            return None;
        }

        Some(PairLockGuard {
            held: Arc::clone(&self.held),
            pair: (user_id, provider),
        })
    }

    pub fn is_held(&self, user_id: Uuid, provider: ProviderKind) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .contains(&(user_id, provider))
    }
}

#[derive(Debug)]
pub struct PairLockGuard {
    held: Arc<Mutex<HashSet<Pair>>>,
    pair: Pair,
}

impl Drop for PairLockGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .remove(&self.pair);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_guard_drops() {
        let locks = PairLocks::new();
        let user = Uuid::new_v4();

        let guard = locks.try_acquire(user, ProviderKind::Github).unwrap();
        assert!(locks.try_acquire(user, ProviderKind::Github).is_none());
        // Other pairs are independent
        assert!(locks.try_acquire(user, ProviderKind::Slack).is_some());
        assert!(locks.try_acquire(Uuid::new_v4(), ProviderKind::Github).is_some());

        drop(guard);
        assert!(!locks.is_held(user, ProviderKind::Github));
        assert!(locks.try_acquire(user, ProviderKind::Github).is_some());
    }

    #[tokio::test]
    async fn lock_is_released_when_task_panics() {
        let locks = PairLocks::new();
        let user = Uuid::new_v4();

        let task_locks = locks.clone();
        let result = tokio::spawn(async move {
            let _guard = task_locks.try_acquire(user, ProviderKind::Notion).unwrap();
            panic!("provider adapter blew up");
        })
        .await;

        assert!(result.is_err());
        assert!(!locks.is_held(user, ProviderKind::Notion));
    }
}
