//! Cron job execution repository

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::cron_job_execution::{
    self, ActiveModel, CronJobStatus, Entity as CronJobExecution, Model,
};

/// Counters reported when a batch finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionCounts {
    pub users_processed: i32,
    pub providers_synced: i32,
    pub success_count: i32,
    pub failure_count: i32,
}

#[derive(Debug, Clone)]
pub struct CronExecutionRepository {
    db: Arc<DatabaseConnection>,
}

impl CronExecutionRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn insert_start(&self, job_name: &str, metadata: Option<JsonValue>) -> Result<Uuid, DbErr> {
        let id = Uuid::new_v4();
        let row = ActiveModel {
            id: Set(id),
            job_name: Set(job_name.to_string()),
            started_at: Set(Utc::now()),
            completed_at: Set(None),
            status: Set(CronJobStatus::Running),
            users_processed: Set(0),
            providers_synced: Set(0),
            success_count: Set(0),
            failure_count: Set(0),
            error_message: Set(None),
            duration_ms: Set(None),
            metadata: Set(metadata),
        };
        CronJobExecution::insert(row).exec_without_returning(&*self.db).await?;
        Ok(id)
    }

    /// Finalize an execution; returns `None` when the id is unknown
    pub async fn complete(
        &self,
        id: Uuid,
        status: CronJobStatus,
        counts: ExecutionCounts,
        error_message: Option<String>,
        duration_ms: i64,
    ) -> Result<Option<Model>, DbErr> {
        let Some(existing) = CronJobExecution::find_by_id(id).one(&*self.db).await? else {
            return Ok(None);
        };

        let mut active: ActiveModel = existing.into();
        active.status = Set(status);
        active.completed_at = Set(Some(Utc::now()));
        active.users_processed = Set(counts.users_processed);
        active.providers_synced = Set(counts.providers_synced);
        active.success_count = Set(counts.success_count);
        active.failure_count = Set(counts.failure_count);
        active.error_message = Set(error_message);
        active.duration_ms = Set(Some(duration_ms));

        active.update(&*self.db).await.map(Some)
    }

    /// Record a batch that aborted before an execution id existed
    pub async fn insert_failure(
        &self,
        job_name: &str,
        error_message: &str,
        duration_ms: i64,
    ) -> Result<Uuid, DbErr> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let row = ActiveModel {
            id: Set(id),
            job_name: Set(job_name.to_string()),
            started_at: Set(now - chrono::Duration::milliseconds(duration_ms)),
            completed_at: Set(Some(now)),
            status: Set(CronJobStatus::Failed),
            users_processed: Set(0),
            providers_synced: Set(0),
            success_count: Set(0),
            failure_count: Set(0),
            error_message: Set(Some(error_message.to_string())),
            duration_ms: Set(Some(duration_ms)),
            metadata: Set(None),
        };
        CronJobExecution::insert(row).exec_without_returning(&*self.db).await?;
        Ok(id)
    }

    /// Executions started at or after `since`, newest first
    pub async fn list_since(&self, since: DateTime<Utc>) -> Result<Vec<Model>, DbErr> {
        CronJobExecution::find()
            .filter(cron_job_execution::Column::StartedAt.gte(since))
            .order_by_desc(cron_job_execution::Column::StartedAt)
            .all(&*self.db)
            .await
    }

    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, DbErr> {
        let result = CronJobExecution::delete_many()
            .filter(cron_job_execution::Column::StartedAt.lt(cutoff))
            .filter(cron_job_execution::Column::Status.ne(CronJobStatus::Running))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
