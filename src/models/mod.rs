//! # Data Models
//!
//! SeaORM entities for every table the sync service owns, plus the small
//! response types shared by the HTTP layer.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod activity;
pub mod connection;
pub mod credential;
pub mod cron_job_execution;
pub mod notification;
pub mod oauth_state;
pub mod sync_run;

pub use activity::Entity as Activity;
pub use connection::Entity as Connection;
pub use credential::Entity as Credential;
pub use cron_job_execution::Entity as CronJobExecution;
pub use notification::Entity as Notification;
pub use oauth_state::Entity as OAuthState;
pub use sync_run::Entity as SyncRun;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "connector-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
