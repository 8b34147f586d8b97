//! Credential vault
//!
//! Owns the `credentials` table. Tokens enter and leave as plaintext
//! [`TokenBundle`]s and are only ever persisted as AES-256-GCM ciphertext.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::crypto::{CryptoKey, TokenField, open_token, seal_token};
use crate::error::SyncCoreError;
use crate::repositories::CredentialRepository;
use crate::repositories::credential::EncryptedCredential;

/// Decrypted OAuth credential for one (user, provider) pair
#[derive(Clone, PartialEq, Eq)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBundle")
            .field("access_token", &"***")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

impl TokenBundle {
    /// True when the access token expires within `skew` of `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now + skew)
    }
}

#[derive(Debug, Clone)]
pub struct CredentialVault {
    repo: CredentialRepository,
    key: CryptoKey,
}

impl CredentialVault {
    pub fn new(db: Arc<DatabaseConnection>, key: CryptoKey) -> Self {
        Self {
            repo: CredentialRepository::new(db),
            key,
        }
    }

    /// Encrypt and upsert the credential for a pair
    #[instrument(skip(self, bundle), fields(user_id = %user_id, provider = %provider))]
    pub async fn store_token(
        &self,
        user_id: Uuid,
        provider: &str,
        bundle: &TokenBundle,
    ) -> Result<(), SyncCoreError> {
        let access_token_ciphertext = seal_token(
            &self.key,
            user_id,
            provider,
            TokenField::Access,
            &bundle.access_token,
        )
        .map_err(|e| SyncCoreError::Internal(e.to_string()))?;

        let refresh_token_ciphertext = bundle
            .refresh_token
            .as_deref()
            .map(|token| seal_token(&self.key, user_id, provider, TokenField::Refresh, token))
            .transpose()
            .map_err(|e| SyncCoreError::Internal(e.to_string()))?;

        self.repo
            .upsert(
                user_id,
                provider,
                EncryptedCredential {
                    access_token_ciphertext,
                    refresh_token_ciphertext,
                    expires_at: bundle.expires_at,
                    scope: bundle.scope.clone(),
                },
            )
            .await?;

        tracing::debug!("Stored encrypted credential");
        Ok(())
    }

    /// Load and decrypt the credential for a pair.
    ///
    /// Returns `Ok(None)` when nothing is stored and
    /// [`SyncCoreError::Decryption`] when ciphertext fails authentication.
    #[instrument(skip(self), fields(user_id = %user_id, provider = %provider))]
    pub async fn get_token(
        &self,
        user_id: Uuid,
        provider: &str,
    ) -> Result<Option<TokenBundle>, SyncCoreError> {
        let Some(row) = self.repo.find(user_id, provider).await? else {
            return Ok(None);
        };

        let access_token = open_token(
            &self.key,
            user_id,
            provider,
            TokenField::Access,
            &row.access_token_ciphertext,
        )?;

        let refresh_token = row
            .refresh_token_ciphertext
            .as_deref()
            .map(|ciphertext| {
                open_token(&self.key, user_id, provider, TokenField::Refresh, ciphertext)
            })
            .transpose()?;

        Ok(Some(TokenBundle {
            access_token,
            refresh_token,
            expires_at: row.expires_at,
            scope: row.scope,
        }))
    }

    /// Remove the credential for a pair; absent credentials are not an error
    #[instrument(skip(self), fields(user_id = %user_id, provider = %provider))]
    pub async fn delete_token(&self, user_id: Uuid, provider: &str) -> Result<(), SyncCoreError> {
        let removed = self.repo.delete(user_id, provider).await?;
        tracing::debug!(removed, "Deleted credential");
        Ok(())
    }
}
