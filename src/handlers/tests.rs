//! # Tests for Handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use crate::auth::USER_ID_HEADER;
use crate::config::{AppConfig, ProviderClientConfig};
use crate::handlers::root;
use crate::providers::HttpActivitySource;
use crate::server::{AppState, create_app};

async fn test_state() -> AppState {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    Migrator::up(&db, None).await.unwrap();

    let mut providers = BTreeMap::new();
    providers.insert(
        "github".to_string(),
        ProviderClientConfig {
            client_id: Some("client-id".to_string()),
            client_secret: Some("client-secret".to_string()),
            oauth_base: Some("http://127.0.0.1:9".to_string()),
            api_base: Some("http://127.0.0.1:9".to_string()),
        },
    );
    let config = AppConfig {
        crypto_key: Some(vec![7u8; 32]),
        cron_secret: Some("abc".to_string()),
        enabled_providers: vec!["github".to_string()],
        providers,
        ..Default::default()
    };

    let source = HttpActivitySource::new(std::time::Duration::from_secs(1)).unwrap();
    AppState::with_source(config, Arc::new(db), Arc::new(source)).unwrap()
}

async fn send(state: AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = create_app(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_root_handler_returns_expected_service_info() {
    let axum::Json(info) = root().await;
    assert_eq!(info.service, "connector-sync");
    assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn readiness_lists_enabled_providers() {
    let state = test_state().await;
    let (status, body) = send(
        state,
        Request::builder().uri("/readyz").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], true);
    assert_eq!(body["providers"], serde_json::json!(["github"]));
}

#[tokio::test]
async fn user_routes_require_user_header() {
    let state = test_state().await;
    let (status, body) = send(
        state,
        Request::builder()
            .uri("/sync/github/status")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn disabled_provider_is_a_validation_error() {
    let state = test_state().await;
    let (status, body) = send(
        state,
        Request::builder()
            .uri("/sync/slack/status")
            .header(USER_ID_HEADER, Uuid::new_v4().to_string())
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn status_is_cached_after_first_read() {
    let state = test_state().await;
    let user = Uuid::new_v4().to_string();
    let request = || {
        Request::builder()
            .uri("/sync/github/status")
            .header(USER_ID_HEADER, &user)
            .body(Body::empty())
            .unwrap()
    };

    let first = create_app(state.clone()).oneshot(request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-cache"], "MISS");
    assert!(
        first.headers()["cache-control"]
            .to_str()
            .unwrap()
            .starts_with("private, max-age=")
    );

    let second = create_app(state).oneshot(request()).await.unwrap();
    assert_eq!(second.headers()["x-cache"], "HIT");
    let bytes = to_bytes(second.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "not_connected");
    assert_eq!(body["provider"], "github");
}

#[tokio::test]
async fn cron_routes_reject_wrong_secret() {
    let state = test_state().await;
    let (status, _) = send(
        state.clone(),
        Request::builder()
            .method("POST")
            .uri("/cron/sync")
            .header("Authorization", "Bearer wrong")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        state,
        Request::builder()
            .method("POST")
            .uri("/cron/sync?interval=5min")
            .header("Authorization", "Bearer abc")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let state = test_state().await;
    let response = create_app(state)
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}
