//! Activity repository
//!
//! Idempotent writes into the local activity mirror.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, Set,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::activity::{self, ActiveModel, Entity as Activity};

/// SQLite caps bound parameters per statement; keep batches well below it
const UPSERT_CHUNK_SIZE: usize = 50;

/// Provider item ready to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub external_id: String,
    pub kind: String,
    pub title: String,
    pub url: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub payload: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct ActivityRepository {
    db: Arc<DatabaseConnection>,
}

impl ActivityRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Upsert items keyed by `(user_id, provider, external_id)`.
    ///
    /// Returns the number of items written (inserted or refreshed).
    pub async fn upsert_many(
        &self,
        user_id: Uuid,
        provider: &str,
        items: Vec<NewActivity>,
    ) -> Result<usize, DbErr> {
        let total = items.len();
        let now = Utc::now();

        let mut rows = items.into_iter().map(|item| ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            provider: Set(provider.to_string()),
            external_id: Set(item.external_id),
            kind: Set(item.kind),
            title: Set(item.title),
            url: Set(item.url),
            occurred_at: Set(item.occurred_at),
            payload: Set(item.payload),
            created_at: Set(now),
            updated_at: Set(now),
        });

        loop {
            let chunk: Vec<ActiveModel> = rows.by_ref().take(UPSERT_CHUNK_SIZE).collect();
            if chunk.is_empty() {
                break;
            }

            Activity::insert_many(chunk)
                .on_conflict(
                    OnConflict::columns([
                        activity::Column::UserId,
                        activity::Column::Provider,
                        activity::Column::ExternalId,
                    ])
                    .update_columns([
                        activity::Column::Kind,
                        activity::Column::Title,
                        activity::Column::Url,
                        activity::Column::OccurredAt,
                        activity::Column::Payload,
                        activity::Column::UpdatedAt,
                    ])
                    .to_owned(),
                )
                .exec_without_returning(&*self.db)
                .await?;
        }

        Ok(total)
    }

    pub async fn count_for(&self, user_id: Uuid, provider: &str) -> Result<u64, DbErr> {
        Activity::find()
            .filter(activity::Column::UserId.eq(user_id))
            .filter(activity::Column::Provider.eq(provider))
            .count(&*self.db)
            .await
    }
}
