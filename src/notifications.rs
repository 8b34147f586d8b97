//! User-facing connection health notifications.
//!
//! Repeated occurrences of the same problem update the single unread row for
//! `(user, provider, type)` instead of stacking new rows.

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{SyncCoreError, is_unique_violation};
use crate::models::notification::{Model, NotificationType, Severity};
use crate::providers::ProviderKind;
use crate::repositories::NotificationRepository;
use crate::repositories::notification::NotificationContent;

/// Longest provider error message copied into a notification body
const MAX_ERROR_IN_MESSAGE: usize = 300;

#[derive(Debug, Clone)]
pub struct NotificationCenter {
    repo: NotificationRepository,
    app_url: String,
}

impl NotificationCenter {
    /// `app_url` is the integrations page that notification actions link to
    pub fn new(db: Arc<DatabaseConnection>, app_url: &str) -> Self {
        Self {
            repo: NotificationRepository::new(db),
            app_url: app_url.to_string(),
        }
    }

    /// Create the unread notification for `(user, provider, type)` or update it in place
    #[instrument(skip(self, content), fields(user_id = %user_id, provider = %provider, kind = ?notification_type))]
    pub async fn upsert(
        &self,
        user_id: Uuid,
        provider: &str,
        notification_type: NotificationType,
        content: NotificationContent,
    ) -> Result<Model, SyncCoreError> {
        if let Some(existing) = self
            .repo
            .find_unread(user_id, provider, notification_type)
            .await?
        {
            return Ok(self.repo.update_content(existing, content).await?);
        }

        match self
            .repo
            .insert(user_id, provider, notification_type, content.clone())
            .await
        {
            Ok(created) => Ok(created),
            // Lost a race with a concurrent insert; the partial unique index kept one row
            Err(err) if is_unique_violation(&err) => {
                let existing = self
                    .repo
                    .find_unread(user_id, provider, notification_type)
                    .await?
                    .ok_or(SyncCoreError::Database(err))?;
                Ok(self.repo.update_content(existing, content).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Raise or refresh the "reconnect this provider" notice
    pub async fn notify_reauth_required(
        &self,
        user_id: Uuid,
        provider: ProviderKind,
    ) -> Result<Model, SyncCoreError> {
        let content = self.reauth_required_content(provider);
        self.upsert(
            user_id,
            provider.as_str(),
            NotificationType::ReauthRequired,
            content,
        )
        .await
    }

    /// Raise or refresh the "sync is failing" notice
    pub async fn notify_sync_failure(
        &self,
        user_id: Uuid,
        provider: ProviderKind,
        error: &str,
    ) -> Result<Model, SyncCoreError> {
        let content = self.sync_failure_content(provider, error);
        self.upsert(
            user_id,
            provider.as_str(),
            NotificationType::SyncFailures,
            content,
        )
        .await
    }

    /// Resolve every unread notification for a pair, e.g. after reconnecting
    #[instrument(skip(self), fields(user_id = %user_id, provider = %provider))]
    pub async fn clear_provider_notifications(
        &self,
        user_id: Uuid,
        provider: &str,
    ) -> Result<u64, SyncCoreError> {
        let cleared = self.repo.mark_read_for_pair(user_id, provider).await?;
        if cleared > 0 {
            tracing::debug!(cleared, "Cleared provider notifications");
        }
        Ok(cleared)
    }

    /// Resolve the unread notification of one type for a pair
    pub async fn clear_type(
        &self,
        user_id: Uuid,
        provider: &str,
        notification_type: NotificationType,
    ) -> Result<u64, SyncCoreError> {
        Ok(self
            .repo
            .mark_read_for_type(user_id, provider, notification_type)
            .await?)
    }

    pub async fn get_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Model>, SyncCoreError> {
        Ok(self.repo.list(user_id, unread_only).await?)
    }

    pub async fn get_unread_count(&self, user_id: Uuid) -> Result<u64, SyncCoreError> {
        Ok(self.repo.count_unread(user_id).await?)
    }

    /// Returns false when no notification with that id belongs to the user
    pub async fn mark_as_read(&self, user_id: Uuid, id: Uuid) -> Result<bool, SyncCoreError> {
        Ok(self.repo.mark_read(user_id, id).await?)
    }

    pub async fn mark_all_as_read(&self, user_id: Uuid) -> Result<u64, SyncCoreError> {
        Ok(self.repo.mark_all_read(user_id).await?)
    }

    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<bool, SyncCoreError> {
        Ok(self.repo.delete(user_id, id).await?)
    }

    fn action_url(&self, provider: ProviderKind) -> String {
        let separator = if self.app_url.contains('?') { '&' } else { '?' };
        format!("{}{}provider={}", self.app_url, separator, provider)
    }

    fn reauth_required_content(&self, provider: ProviderKind) -> NotificationContent {
        NotificationContent {
            severity: Severity::Error,
            title: format!("Reconnect {}", provider.display_name()),
            message: format!(
                "Your {} connection has expired and can no longer sync. Reconnect it to resume.",
                provider.display_name()
            ),
            action_url: Some(self.action_url(provider)),
            action_label: Some("Reconnect".to_string()),
        }
    }

    fn sync_failure_content(&self, provider: ProviderKind, error: &str) -> NotificationContent {
        let error: String = error.chars().take(MAX_ERROR_IN_MESSAGE).collect();
        NotificationContent {
            severity: Severity::Warning,
            title: format!("{} sync failed", provider.display_name()),
            message: format!(
                "We could not sync your {} activity: {}. We will retry automatically.",
                provider.display_name(),
                error
            ),
            action_url: Some(self.action_url(provider)),
            action_label: Some("View integration".to_string()),
        }
    }
}
