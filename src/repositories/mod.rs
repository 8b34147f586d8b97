//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for each
//! table, keyed by user and provider where the data is user-scoped.

pub mod activity;
pub mod connection;
pub mod credential;
pub mod cron_execution;
pub mod notification;
pub mod oauth_state;
pub mod sync_run;

pub use activity::{ActivityRepository, NewActivity};
pub use connection::ConnectionRepository;
pub use credential::CredentialRepository;
pub use cron_execution::CronExecutionRepository;
pub use notification::NotificationRepository;
pub use oauth_state::OAuthStateRepository;
pub use sync_run::SyncRunRepository;
