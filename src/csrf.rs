//! Anti-forgery state tokens for the OAuth authorization handshake.
//!
//! A state token is 32 random bytes encoded as base64url (43 characters). The
//! database only holds an HMAC-SHA256 digest of it, keyed by a subkey derived
//! from the master key, so rows read out of storage cannot be replayed.
//! Validation deletes the row before anything else is checked, which makes
//! every token single-use whether it validates or not.

use std::sync::Arc;

use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sea_orm::DatabaseConnection;
use sha2::Sha256;
use tracing::instrument;
use uuid::Uuid;

use crate::crypto::CryptoKey;
use crate::error::SyncCoreError;
use crate::repositories::OAuthStateRepository;

type HmacSha256 = Hmac<Sha256>;

const STATE_KEY_CONTEXT: &[u8] = b"connector-sync/oauth-state/v1";
const STATE_BYTES: usize = 32;
/// Upper bound on an incoming state parameter before we bother hashing it
const MAX_STATE_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct CsrfStateGuard {
    repo: OAuthStateRepository,
    digest_key: CryptoKey,
    ttl: Duration,
}

impl CsrfStateGuard {
    pub fn new(
        db: Arc<DatabaseConnection>,
        master_key: &CryptoKey,
        ttl: Duration,
    ) -> Result<Self, SyncCoreError> {
        let derived = hmac_sha256(master_key.as_bytes(), STATE_KEY_CONTEXT)?;
        let digest_key =
            CryptoKey::new(derived).map_err(|e| SyncCoreError::Internal(e.to_string()))?;

        Ok(Self {
            repo: OAuthStateRepository::new(db),
            digest_key,
            ttl,
        })
    }

    /// Issue a fresh state token bound to `(user_id, provider)`
    #[instrument(skip(self), fields(user_id = %user_id, provider = %provider))]
    pub async fn generate_state_token(
        &self,
        user_id: Uuid,
        provider: &str,
    ) -> Result<String, SyncCoreError> {
        match self.repo.cleanup_expired().await {
            Ok(purged) if purged > 0 => tracing::debug!(purged, "Purged expired OAuth states"),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "Failed to purge expired OAuth states"),
        }

        let token = generate_secure_state();
        let digest = self.digest(&token)?;
        self.repo.create(user_id, provider, &digest, self.ttl).await?;

        Ok(token)
    }

    /// Consume `state` and report whether it was issued for this exact pair
    /// and is still within its lifetime.
    #[instrument(skip(self, state), fields(user_id = %user_id, provider = %provider))]
    pub async fn validate_state_token(
        &self,
        state: &str,
        user_id: Uuid,
        provider: &str,
    ) -> Result<bool, SyncCoreError> {
        if state.is_empty() || state.len() > MAX_STATE_LEN {
            tracing::warn!("Rejected malformed OAuth state");
            return Ok(false);
        }

        let digest = self.digest(state)?;
        let Some(stored) = self.repo.consume_by_digest(&digest).await? else {
            tracing::warn!("OAuth state unknown or already consumed");
            return Ok(false);
        };

        if stored.expires_at <= Utc::now() {
            tracing::warn!("OAuth state expired");
            return Ok(false);
        }

        if stored.user_id != user_id || stored.provider != provider {
            tracing::warn!(
                issued_provider = %stored.provider,
                "OAuth state presented for a different user or provider"
            );
            return Ok(false);
        }

        Ok(true)
    }

    /// [`Self::validate_state_token`] that fails with [`SyncCoreError::CsrfValidation`]
    pub async fn verify(
        &self,
        state: &str,
        user_id: Uuid,
        provider: &str,
    ) -> Result<(), SyncCoreError> {
        if self.validate_state_token(state, user_id, provider).await? {
            Ok(())
        } else {
            Err(SyncCoreError::CsrfValidation)
        }
    }

    fn digest(&self, token: &str) -> Result<String, SyncCoreError> {
        hmac_sha256(self.digest_key.as_bytes(), token.as_bytes()).map(hex::encode)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SyncCoreError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| SyncCoreError::Internal(format!("invalid HMAC key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Generate a cryptographically secure random state token
fn generate_secure_state() -> String {
    use rand::Rng;

    let mut bytes = [0u8; STATE_BYTES];
    rand::thread_rng().fill(&mut bytes);

    base64_url::encode(&bytes)
}
