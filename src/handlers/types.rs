//! Request and response types shared by the HTTP handlers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::models::notification::{self, NotificationType, Severity};
use crate::models::sync_run::{self, SyncRunStatus, SyncTrigger};
use crate::providers::ProviderKind;

/// Query parameters the provider redirects back with
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user denied access
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Connection health as shown on the integrations page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    NotConnected,
    Syncing,
    Error,
    Healthy,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SyncRunView {
    pub id: Uuid,
    pub status: SyncRunStatus,
    pub trigger: SyncTrigger,
    pub items_synced: i32,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl From<sync_run::Model> for SyncRunView {
    fn from(run: sync_run::Model) -> Self {
        Self {
            id: run.id,
            status: run.status,
            trigger: run.trigger,
            items_synced: run.items_synced,
            error: run.error,
            started_at: run.started_at,
            completed_at: run.completed_at,
            duration_ms: run.duration_ms,
        }
    }
}

/// Cached per-provider sync status
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SyncStatusResponse {
    pub provider: ProviderKind,
    pub status: ConnectionStatus,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Activity items mirrored for this provider
    pub items_synced: u64,
    pub recent_runs: Vec<SyncRunView>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NotificationView {
    pub id: Uuid,
    pub provider: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub action_url: Option<String>,
    pub action_label: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<notification::Model> for NotificationView {
    fn from(model: notification::Model) -> Self {
        Self {
            id: model.id,
            provider: model.provider,
            notification_type: model.notification_type,
            severity: model.severity,
            title: model.title,
            message: model.message,
            action_url: model.action_url,
            action_label: model.action_label,
            read: model.read,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct NotificationsQuery {
    /// Only return unread notifications
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UnreadCountResponse {
    pub count: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdatedCountResponse {
    pub updated: u64,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct CronSyncQuery {
    /// `15min`, `30min`, or absent for every provider class
    pub interval: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct MonitoringQuery {
    /// Lookback window in hours (1 to 168, default 24)
    pub time_range: Option<u32>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct CleanupQuery {
    /// History older than this many days is deleted (1 to 365, default 30)
    pub retention_days: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CleanupResponse {
    pub deleted: u64,
    pub retention_days: u32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadinessResponse {
    pub status: String,
    pub database: bool,
    pub providers: Vec<String>,
}
