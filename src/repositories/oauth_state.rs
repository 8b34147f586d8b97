//! # OAuth State Repository
//!
//! This module provides database operations for pending authorization states.

use chrono::{Duration, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::oauth_state::{self, ActiveModel, Entity, Model};

/// Repository for OAuth state database operations
#[derive(Debug, Clone)]
pub struct OAuthStateRepository {
    db: Arc<DatabaseConnection>,
}

impl OAuthStateRepository {
    /// Create a new OAuth state repository
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Record a newly issued state digest
    pub async fn create(
        &self,
        user_id: Uuid,
        provider: &str,
        state_digest: &str,
        ttl: Duration,
    ) -> Result<Model, DbErr> {
        let now = Utc::now();
        let model = Model {
            id: Uuid::new_v4(),
            user_id,
            provider: provider.to_string(),
            state_digest: state_digest.to_string(),
            expires_at: now + ttl,
            created_at: now,
        };

        let row = ActiveModel {
            id: Set(model.id),
            user_id: Set(model.user_id),
            provider: Set(model.provider.clone()),
            state_digest: Set(model.state_digest.clone()),
            expires_at: Set(model.expires_at),
            created_at: Set(model.created_at),
        };
        Entity::insert(row).exec_without_returning(&*self.db).await?;

        Ok(model)
    }

    /// Remove the state with the given digest and return what was stored.
    ///
    /// The row is deleted whether or not the caller later accepts it, so a
    /// digest can be consumed at most once.
    pub async fn consume_by_digest(&self, state_digest: &str) -> Result<Option<Model>, DbErr> {
        let found = Entity::find()
            .filter(oauth_state::Column::StateDigest.eq(state_digest))
            .one(&*self.db)
            .await?;

        let Some(state) = found else {
            return Ok(None);
        };

        let deleted = Entity::delete_by_id(state.id).exec(&*self.db).await?;
        if deleted.rows_affected == 0 {
            // Another request consumed it between our read and delete
            return Ok(None);
        }

        Ok(Some(state))
    }

    /// Clean up expired OAuth states
    pub async fn cleanup_expired(&self) -> Result<u64, DbErr> {
        let result = Entity::delete_many()
            .filter(oauth_state::Column::ExpiresAt.lt(Utc::now()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
