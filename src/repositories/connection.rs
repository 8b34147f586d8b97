//! Connection repository for database operations
//!
//! Tracks whether a user is connected to a provider and the incremental sync
//! high-water mark used by the orchestrator.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
    sea_query::Expr,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::connection::{self, ActiveModel, Entity as Connection, Model};

/// Repository for connection database operations
#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    db: Arc<DatabaseConnection>,
}

impl ConnectionRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find(&self, user_id: Uuid, provider: &str) -> Result<Option<Model>, DbErr> {
        Connection::find()
            .filter(connection::Column::UserId.eq(user_id))
            .filter(connection::Column::Provider.eq(provider))
            .one(&*self.db)
            .await
    }

    /// Set the connection flag, creating the row on first connect
    pub async fn set_connected(
        &self,
        user_id: Uuid,
        provider: &str,
        connected: bool,
    ) -> Result<(), DbErr> {
        let now = Utc::now();
        let row = ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            provider: Set(provider.to_string()),
            connected: Set(connected),
            last_synced_at: Set(None),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Connection::insert(row)
            .on_conflict(
                OnConflict::columns([connection::Column::UserId, connection::Column::Provider])
                    .update_columns([connection::Column::Connected, connection::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        Ok(())
    }

    /// Advance the high-water mark and clear the last error
    pub async fn record_sync_success(
        &self,
        user_id: Uuid,
        provider: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<(), DbErr> {
        Connection::update_many()
            .col_expr(connection::Column::LastSyncedAt, Expr::value(synced_at))
            .col_expr(connection::Column::LastError, Expr::value(Option::<String>::None))
            .col_expr(connection::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(connection::Column::UserId.eq(user_id))
            .filter(connection::Column::Provider.eq(provider))
            .exec(&*self.db)
            .await?;

        Ok(())
    }

    /// Remember why the last sync failed without moving the high-water mark
    pub async fn record_sync_failure(
        &self,
        user_id: Uuid,
        provider: &str,
        error: &str,
    ) -> Result<(), DbErr> {
        Connection::update_many()
            .col_expr(connection::Column::LastError, Expr::value(error.to_string()))
            .col_expr(connection::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(connection::Column::UserId.eq(user_id))
            .filter(connection::Column::Provider.eq(provider))
            .exec(&*self.db)
            .await?;

        Ok(())
    }

    /// All connected pairs for the given providers, oldest sync first
    pub async fn list_connected(&self, providers: &[&str]) -> Result<Vec<Model>, DbErr> {
        if providers.is_empty() {
            return Ok(Vec::new());
        }

        Connection::find()
            .filter(connection::Column::Connected.eq(true))
            .filter(connection::Column::Provider.is_in(providers.iter().copied()))
            .order_by_asc(connection::Column::LastSyncedAt)
            .order_by_asc(connection::Column::UserId)
            .all(&*self.db)
            .await
    }
}
