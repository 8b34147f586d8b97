//! Shared fixtures for integration tests.
//!
//! In-memory SQLite with migrations, a fixed crypto key, a scriptable
//! activity source, and helpers to build application state or a live server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use connector_sync::{
    config::{AppConfig, ProviderClientConfig},
    crypto::CryptoKey,
    error::SyncCoreError,
    providers::{ActivitySource, ProviderDefinition, ProviderKind},
    repositories::{ConnectionRepository, NewActivity},
    server::{AppState, create_app},
    vault::TokenBundle,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use uuid::Uuid;

pub const TEST_KEY_BYTES: [u8; 32] = [42u8; 32];
pub const CRON_SECRET: &str = "abc";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;

    Migrator::up(&db, None).await?;

    Ok(db)
}

#[allow(dead_code)]
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

#[allow(dead_code)]
pub fn test_key() -> CryptoKey {
    CryptoKey::new(TEST_KEY_BYTES.to_vec()).expect("32-byte test key")
}

/// Configuration with every provider enabled and all hosts pointed at `base`
#[allow(dead_code)]
pub fn test_config(base: &str) -> AppConfig {
    let mut providers = BTreeMap::new();
    for kind in ProviderKind::ALL {
        providers.insert(
            kind.as_str().to_string(),
            ProviderClientConfig {
                client_id: Some(format!("{}-client", kind.as_str())),
                client_secret: Some(format!("{}-secret", kind.as_str())),
                oauth_base: Some(base.to_string()),
                api_base: Some(base.to_string()),
            },
        );
    }

    AppConfig {
        profile: "test".to_string(),
        public_base_url: "http://localhost:8080".to_string(),
        app_redirect_url: "http://localhost:3000/settings/integrations".to_string(),
        crypto_key: Some(TEST_KEY_BYTES.to_vec()),
        cron_secret: Some(CRON_SECRET.to_string()),
        enabled_providers: ProviderKind::ALL
            .iter()
            .map(|kind| kind.as_str().to_string())
            .collect(),
        providers,
        ..Default::default()
    }
}

/// Activity source returning canned items; chosen access tokens fail, hang or panic
#[derive(Default)]
pub struct FakeSource {
    failing_tokens: Mutex<HashSet<String>>,
    hanging_tokens: Mutex<HashSet<String>>,
    panicking_tokens: Mutex<HashSet<String>>,
    items_per_call: usize,
    calls: AtomicUsize,
    since_seen: Mutex<Vec<Option<DateTime<Utc>>>>,
}

#[allow(dead_code)]
impl FakeSource {
    pub fn returning(items_per_call: usize) -> Arc<Self> {
        Arc::new(Self {
            items_per_call,
            ..Default::default()
        })
    }

    pub fn fail_for_token(&self, token: &str) {
        self.failing_tokens
            .lock()
            .unwrap()
            .insert(token.to_string());
    }

    pub fn hang_for_token(&self, token: &str) {
        self.hanging_tokens
            .lock()
            .unwrap()
            .insert(token.to_string());
    }

    pub fn panic_for_token(&self, token: &str) {
        self.panicking_tokens
            .lock()
            .unwrap()
            .insert(token.to_string());
    }

    pub fn succeed_for_token(&self, token: &str) {
        self.failing_tokens.lock().unwrap().remove(token);
        self.panicking_tokens.lock().unwrap().remove(token);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn since_seen(&self) -> Vec<Option<DateTime<Utc>>> {
        self.since_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActivitySource for FakeSource {
    async fn fetch_since(
        &self,
        definition: &ProviderDefinition,
        access_token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<NewActivity>, SyncCoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.since_seen.lock().unwrap().push(since);

        if self.panicking_tokens.lock().unwrap().contains(access_token) {
            panic!("activity adapter crashed for {}", definition.kind);
        }
        let hangs = self.hanging_tokens.lock().unwrap().contains(access_token);
        if hangs {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }

        if self.failing_tokens.lock().unwrap().contains(access_token) {
            return Err(SyncCoreError::provider_status(
                definition.kind.as_str(),
                503,
                "upstream unavailable",
            ));
        }

        let now = Utc::now();
        Ok((0..self.items_per_call)
            .map(|i| NewActivity {
                external_id: format!("{}-{}", access_token, i),
                kind: "item".to_string(),
                title: format!("Item {}", i),
                url: None,
                occurred_at: now - Duration::minutes(i as i64),
                payload: None,
            })
            .collect())
    }
}

#[allow(dead_code)]
pub fn bundle(access_token: &str) -> TokenBundle {
    TokenBundle {
        access_token: access_token.to_string(),
        refresh_token: Some(format!("{}-refresh", access_token)),
        expires_at: Some(Utc::now() + Duration::hours(1)),
        scope: Some("repo".to_string()),
    }
}

#[allow(dead_code)]
pub async fn build_state(
    config: AppConfig,
    source: Arc<dyn ActivitySource>,
) -> Result<(AppState, Arc<DatabaseConnection>)> {
    let db = setup_test_db_arc().await?;
    let state = AppState::with_source(config, db.clone(), source).context("building state")?;
    Ok((state, db))
}

/// Store a credential and mark the pair connected, as a completed callback would
#[allow(dead_code)]
pub async fn connect_pair(
    state: &AppState,
    user_id: Uuid,
    provider: ProviderKind,
    token: &TokenBundle,
) -> Result<()> {
    state
        .vault
        .store_token(user_id, provider.as_str(), token)
        .await?;
    ConnectionRepository::new(state.db.clone())
        .set_connected(user_id, provider.as_str(), true)
        .await?;
    Ok(())
}

pub struct TestServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<Result<()>>>,
}

#[allow(dead_code)]
impl TestServerHandle {
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = self.join_handle.take() {
            handle.await.context("server task join failed")??;
        }

        Ok(())
    }
}

/// Serve the full router on an ephemeral port
#[allow(dead_code)]
pub async fn spawn_server(state: AppState) -> Result<(String, TestServerHandle)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let app = create_app(state);
    let join_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .context("server error")
    });

    Ok((
        format!("http://{}", addr),
        TestServerHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle: Some(join_handle),
        },
    ))
}

/// HTTP client that does not follow redirects
#[allow(dead_code)]
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("reqwest client")
}
