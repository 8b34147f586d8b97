//! Integration tests for credential storage, authorization state and throttling.

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::Duration;
use connector_sync::{
    crypto::CryptoKey,
    csrf::CsrfStateGuard,
    error::SyncCoreError,
    models::credential,
    rate_limit::{LimiterPolicy, RateLimiter},
    repositories::CredentialRepository,
    vault::CredentialVault,
};
use sea_orm::{ActiveModelTrait, IntoActiveModel, Set};
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;

#[tokio::test]
async fn vault_round_trips_and_deletes_idempotently() {
    let db = test_utils::setup_test_db_arc().await.unwrap();
    let vault = CredentialVault::new(db.clone(), test_utils::test_key());
    let user = Uuid::new_v4();
    let token = test_utils::bundle("gho_secret_access");

    vault.store_token(user, "github", &token).await.unwrap();
    let loaded = vault.get_token(user, "github").await.unwrap();
    assert_eq!(loaded, Some(token.clone()));

    // Stored bytes never contain the plaintext
    let row = CredentialRepository::new(db.clone())
        .find(user, "github")
        .await
        .unwrap()
        .unwrap();
    let plaintext = token.access_token.as_bytes();
    assert!(
        !row.access_token_ciphertext
            .windows(plaintext.len())
            .any(|w| w == plaintext)
    );

    vault.delete_token(user, "github").await.unwrap();
    assert_eq!(vault.get_token(user, "github").await.unwrap(), None);
    // Deleting again is not an error
    vault.delete_token(user, "github").await.unwrap();
}

#[tokio::test]
async fn vault_replaces_existing_credential() {
    let db = test_utils::setup_test_db_arc().await.unwrap();
    let vault = CredentialVault::new(db, test_utils::test_key());
    let user = Uuid::new_v4();

    vault
        .store_token(user, "slack", &test_utils::bundle("first"))
        .await
        .unwrap();
    vault
        .store_token(user, "slack", &test_utils::bundle("second"))
        .await
        .unwrap();

    let loaded = vault.get_token(user, "slack").await.unwrap().unwrap();
    assert_eq!(loaded.access_token, "second");
}

#[tokio::test]
async fn tampered_or_foreign_ciphertext_fails_decryption() {
    let db = test_utils::setup_test_db_arc().await.unwrap();
    let vault = CredentialVault::new(db.clone(), test_utils::test_key());
    let user = Uuid::new_v4();
    vault
        .store_token(user, "notion", &test_utils::bundle("secret"))
        .await
        .unwrap();

    // A vault with a different key cannot open the row
    let other = CredentialVault::new(db.clone(), CryptoKey::new(vec![1u8; 32]).unwrap());
    let err = other.get_token(user, "notion").await.unwrap_err();
    assert!(matches!(err, SyncCoreError::Decryption(_)));
    assert!(err.requires_reauth());

    // Flipping a ciphertext byte breaks authentication
    let row = CredentialRepository::new(db.clone())
        .find(user, "notion")
        .await
        .unwrap()
        .unwrap();
    let mut bytes = row.access_token_ciphertext.clone();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    let mut active: credential::ActiveModel = row.into_active_model();
    active.access_token_ciphertext = Set(bytes);
    active.update(db.as_ref()).await.unwrap();

    let err = vault.get_token(user, "notion").await.unwrap_err();
    assert!(matches!(err, SyncCoreError::Decryption(_)));
}

#[tokio::test]
async fn ciphertext_is_bound_to_its_pair() {
    let db = test_utils::setup_test_db_arc().await.unwrap();
    let vault = CredentialVault::new(db.clone(), test_utils::test_key());
    let owner = Uuid::new_v4();
    let intruder = Uuid::new_v4();
    vault
        .store_token(owner, "github", &test_utils::bundle("owner-token"))
        .await
        .unwrap();
    vault
        .store_token(intruder, "github", &test_utils::bundle("intruder-token"))
        .await
        .unwrap();

    // Copy the owner's ciphertext onto the intruder's row
    let repo = CredentialRepository::new(db.clone());
    let owner_row = repo.find(owner, "github").await.unwrap().unwrap();
    let intruder_row = repo.find(intruder, "github").await.unwrap().unwrap();
    let mut active: credential::ActiveModel = intruder_row.into_active_model();
    active.access_token_ciphertext = Set(owner_row.access_token_ciphertext);
    active.update(db.as_ref()).await.unwrap();

    let err = vault.get_token(intruder, "github").await.unwrap_err();
    assert!(matches!(err, SyncCoreError::Decryption(_)));
}

async fn guard(ttl: Duration) -> CsrfStateGuard {
    let db = test_utils::setup_test_db_arc().await.unwrap();
    CsrfStateGuard::new(db, &test_utils::test_key(), ttl).unwrap()
}

#[tokio::test]
async fn state_token_is_single_use() {
    let guard = guard(Duration::minutes(10)).await;
    let user = Uuid::new_v4();

    let state = guard.generate_state_token(user, "github").await.unwrap();
    assert!(guard.validate_state_token(&state, user, "github").await.unwrap());
    assert!(!guard.validate_state_token(&state, user, "github").await.unwrap());
}

#[tokio::test]
async fn state_token_is_bound_to_user_and_provider() {
    let guard = guard(Duration::minutes(10)).await;
    let user = Uuid::new_v4();

    let state = guard.generate_state_token(user, "github").await.unwrap();
    assert!(!guard.validate_state_token(&state, user, "slack").await.unwrap());
    // The mismatched attempt consumed it
    assert!(!guard.validate_state_token(&state, user, "github").await.unwrap());

    let state = guard.generate_state_token(user, "github").await.unwrap();
    assert!(
        !guard
            .validate_state_token(&state, Uuid::new_v4(), "github")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn expired_or_unknown_state_is_rejected() {
    let expired = guard(Duration::seconds(-1)).await;
    let user = Uuid::new_v4();
    let state = expired.generate_state_token(user, "github").await.unwrap();
    assert!(!expired.validate_state_token(&state, user, "github").await.unwrap());

    let guard = guard(Duration::minutes(10)).await;
    assert!(!guard.validate_state_token("", user, "github").await.unwrap());
    assert!(
        !guard
            .validate_state_token("never-issued", user, "github")
            .await
            .unwrap()
    );
    assert!(matches!(
        guard.verify("never-issued", user, "github").await,
        Err(SyncCoreError::CsrfValidation)
    ));
}

#[test]
fn manual_sync_allows_ten_per_minute_per_user() {
    let limiter = Arc::new(RateLimiter::from_config(&Default::default()));
    let user = Uuid::new_v4();
    let start = Instant::now();

    for i in 0..10 {
        let decision = limiter.check_at(LimiterPolicy::ManualSync, user, start);
        assert!(decision.allowed, "request {} should pass", i + 1);
        assert_eq!(decision.remaining, 9 - i);
    }

    let rejected = limiter.check_at(LimiterPolicy::ManualSync, user, start);
    assert!(!rejected.allowed);
    assert!(rejected.retry_after_secs > 0 && rejected.retry_after_secs <= 60);
    assert!(matches!(
        rejected.into_result(),
        Err(SyncCoreError::RateLimitExceeded { .. })
    ));

    // Other users and other policies are unaffected
    assert!(
        limiter
            .check_at(LimiterPolicy::ManualSync, Uuid::new_v4(), start)
            .allowed
    );
    assert!(
        limiter
            .check_at(LimiterPolicy::SummaryGeneration, user, start)
            .allowed
    );

    // A new window starts after a minute
    let later = start + StdDuration::from_secs(60);
    assert!(limiter.check_at(LimiterPolicy::ManualSync, user, later).allowed);
}
