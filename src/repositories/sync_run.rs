//! Sync run repository
//!
//! Runs are inserted in `running` and moved exactly once into a terminal state.
//! Terminal updates are filtered on `status = running` so a finished run is
//! never rewritten.

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Set, sea_query::Expr,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::sync_run::{self, ActiveModel, Entity as SyncRun, Model, SyncRunStatus, SyncTrigger};

#[derive(Debug, Clone)]
pub struct SyncRunRepository {
    db: Arc<DatabaseConnection>,
}

impl SyncRunRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Insert a `running` row and return it
    pub async fn start(
        &self,
        user_id: Uuid,
        provider: &str,
        trigger: SyncTrigger,
        cron_execution_id: Option<Uuid>,
    ) -> Result<Model, DbErr> {
        let model = Model {
            id: Uuid::new_v4(),
            user_id,
            provider: provider.to_string(),
            status: SyncRunStatus::Running,
            trigger,
            items_synced: 0,
            error: None,
            cron_execution_id,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        };

        let row = ActiveModel {
            id: Set(model.id),
            user_id: Set(model.user_id),
            provider: Set(model.provider.clone()),
            status: Set(model.status),
            trigger: Set(model.trigger),
            items_synced: Set(0),
            error: Set(None),
            cron_execution_id: Set(cron_execution_id),
            started_at: Set(model.started_at),
            completed_at: Set(None),
            duration_ms: Set(None),
        };
        SyncRun::insert(row).exec_without_returning(&*self.db).await?;

        Ok(model)
    }

    /// Mark a running run as succeeded
    pub async fn complete(&self, id: Uuid, items_synced: i32, duration_ms: i64) -> Result<bool, DbErr> {
        self.finish(id, SyncRunStatus::Success, items_synced, None, duration_ms)
            .await
    }

    /// Mark a running run as failed
    pub async fn fail(&self, id: Uuid, error: &str, duration_ms: i64) -> Result<bool, DbErr> {
        self.finish(id, SyncRunStatus::Failed, 0, Some(error.to_string()), duration_ms)
            .await
    }

    async fn finish(
        &self,
        id: Uuid,
        status: SyncRunStatus,
        items_synced: i32,
        error: Option<String>,
        duration_ms: i64,
    ) -> Result<bool, DbErr> {
        let result = SyncRun::update_many()
            .col_expr(sync_run::Column::Status, Expr::value(status))
            .col_expr(sync_run::Column::ItemsSynced, Expr::value(items_synced))
            .col_expr(sync_run::Column::Error, Expr::value(error))
            .col_expr(sync_run::Column::CompletedAt, Expr::value(Utc::now()))
            .col_expr(sync_run::Column::DurationMs, Expr::value(duration_ms))
            .filter(sync_run::Column::Id.eq(id))
            .filter(sync_run::Column::Status.eq(SyncRunStatus::Running))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, DbErr> {
        SyncRun::find_by_id(id).one(&*self.db).await
    }

    /// Most recent runs for a pair, newest first
    pub async fn recent(&self, user_id: Uuid, provider: &str, limit: u64) -> Result<Vec<Model>, DbErr> {
        SyncRun::find()
            .filter(sync_run::Column::UserId.eq(user_id))
            .filter(sync_run::Column::Provider.eq(provider))
            .order_by_desc(sync_run::Column::StartedAt)
            .limit(limit)
            .all(&*self.db)
            .await
    }

    /// Fail every run still marked `running` that started before `cutoff`.
    ///
    /// Used at startup and on shutdown so an interrupted process never leaves
    /// a run stuck.
    pub async fn fail_stale_running(&self, cutoff: DateTime<Utc>, reason: &str) -> Result<u64, DbErr> {
        let result = SyncRun::update_many()
            .col_expr(sync_run::Column::Status, Expr::value(SyncRunStatus::Failed))
            .col_expr(sync_run::Column::Error, Expr::value(reason.to_string()))
            .col_expr(sync_run::Column::CompletedAt, Expr::value(Utc::now()))
            .filter(sync_run::Column::Status.eq(SyncRunStatus::Running))
            .filter(sync_run::Column::StartedAt.lt(cutoff))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }

    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, DbErr> {
        let result = SyncRun::delete_many()
            .filter(sync_run::Column::StartedAt.lt(cutoff))
            .filter(sync_run::Column::Status.ne(SyncRunStatus::Running))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
