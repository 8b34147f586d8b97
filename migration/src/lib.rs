//! Database migrations for the connector sync service.
//!
//! Every table the service reads or writes is created here with SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_11_10_000001_create_credentials;
mod m2025_11_10_000002_create_oauth_states;
mod m2025_11_10_000003_create_connections;
mod m2025_11_10_000004_create_activities;
mod m2025_11_10_000005_create_sync_runs;
mod m2025_11_10_000006_create_cron_job_executions;
mod m2025_11_10_000007_create_notifications;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_11_10_000001_create_credentials::Migration),
            Box::new(m2025_11_10_000002_create_oauth_states::Migration),
            Box::new(m2025_11_10_000003_create_connections::Migration),
            Box::new(m2025_11_10_000004_create_activities::Migration),
            Box::new(m2025_11_10_000005_create_sync_runs::Migration),
            Box::new(m2025_11_10_000006_create_cron_job_executions::Migration),
            Box::new(m2025_11_10_000007_create_notifications::Migration),
        ]
    }
}
