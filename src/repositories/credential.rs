//! Credential repository
//!
//! Raw persistence for encrypted token bundles. Encryption happens one layer up
//! in [`crate::vault::CredentialVault`]; this type only ever sees ciphertext.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::credential::{self, ActiveModel, Entity as Credential, Model};

/// Ciphertext payload written by the vault
#[derive(Debug, Clone)]
pub struct EncryptedCredential {
    pub access_token_ciphertext: Vec<u8>,
    pub refresh_token_ciphertext: Option<Vec<u8>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CredentialRepository {
    db: Arc<DatabaseConnection>,
}

impl CredentialRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find the credential row for a user/provider pair
    pub async fn find(&self, user_id: Uuid, provider: &str) -> Result<Option<Model>, DbErr> {
        Credential::find()
            .filter(credential::Column::UserId.eq(user_id))
            .filter(credential::Column::Provider.eq(provider))
            .one(&*self.db)
            .await
    }

    /// Insert or replace the credential for a user/provider pair.
    ///
    /// Concurrent writers for the same pair resolve as last-writer-wins.
    pub async fn upsert(
        &self,
        user_id: Uuid,
        provider: &str,
        encrypted: EncryptedCredential,
    ) -> Result<(), DbErr> {
        let now = Utc::now();
        let row = ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            provider: Set(provider.to_string()),
            access_token_ciphertext: Set(encrypted.access_token_ciphertext),
            refresh_token_ciphertext: Set(encrypted.refresh_token_ciphertext),
            expires_at: Set(encrypted.expires_at),
            scope: Set(encrypted.scope),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Credential::insert(row)
            .on_conflict(
                OnConflict::columns([credential::Column::UserId, credential::Column::Provider])
                    .update_columns([
                        credential::Column::AccessTokenCiphertext,
                        credential::Column::RefreshTokenCiphertext,
                        credential::Column::ExpiresAt,
                        credential::Column::Scope,
                        credential::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        Ok(())
    }

    /// Delete the credential for a pair, returning the number of rows removed
    pub async fn delete(&self, user_id: Uuid, provider: &str) -> Result<u64, DbErr> {
        let result = Credential::delete_many()
            .filter(credential::Column::UserId.eq(user_id))
            .filter(credential::Column::Provider.eq(provider))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
