//! Integration tests for the sync engine: per-pair orchestration, refresh,
//! scheduled batches and the notifications they raise.

use chrono::{Duration, Utc};
use connector_sync::{
    models::{cron_job_execution::CronJobStatus, notification::NotificationType},
    models::sync_run::{SyncRunStatus, SyncTrigger},
    providers::{ProviderKind, SyncInterval},
    repositories::{ActivityRepository, ConnectionRepository, SyncRunRepository},
    sync::{ABANDONED_RUN_ERROR, TaskState},
    vault::TokenBundle,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, method, path},
};

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::FakeSource;

fn expired(access_token: &str, refresh_token: Option<&str>) -> TokenBundle {
    TokenBundle {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.map(str::to_string),
        expires_at: Some(Utc::now() - Duration::minutes(5)),
        scope: None,
    }
}

#[tokio::test]
async fn failing_pair_does_not_block_the_batch() {
    let source = FakeSource::returning(3);
    let (state, db) = test_utils::build_state(test_utils::test_config("http://127.0.0.1:9"), source.clone())
        .await
        .unwrap();

    let user_a = Uuid::new_v4();
    let user_b = Uuid::new_v4();
    test_utils::connect_pair(&state, user_a, ProviderKind::Github, &test_utils::bundle("token-a"))
        .await
        .unwrap();
    test_utils::connect_pair(&state, user_b, ProviderKind::Github, &test_utils::bundle("token-b"))
        .await
        .unwrap();
    source.fail_for_token("token-a");

    let report = state
        .cron_monitor
        .run_scheduled_sync(Some(SyncInterval::FifteenMinutes), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, CronJobStatus::Success);
    assert_eq!(report.job_name, "sync_15min");
    assert_eq!(report.summary.providers, vec![ProviderKind::Github]);
    assert_eq!(report.summary.users_processed, 2);
    assert_eq!(report.summary.providers_synced, 2);
    assert_eq!(report.summary.success_count, 1);
    assert_eq!(report.summary.failure_count, 1);

    let activities = ActivityRepository::new(db.clone());
    assert_eq!(activities.count_for(user_b, "github").await.unwrap(), 3);
    assert_eq!(activities.count_for(user_a, "github").await.unwrap(), 0);

    let failed = ConnectionRepository::new(db.clone())
        .find(user_a, "github")
        .await
        .unwrap()
        .unwrap();
    assert!(failed.last_error.is_some());

    let notifications = state.notifications.get_notifications(user_a, true).await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].notification_type, NotificationType::SyncFailures);
    assert!(
        state
            .notifications
            .get_notifications(user_b, false)
            .await
            .unwrap()
            .is_empty()
    );

    // Runs are linked to the execution
    let runs = SyncRunRepository::new(db).recent(user_b, "github", 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, SyncRunStatus::Success);
    assert_eq!(runs[0].trigger, SyncTrigger::Scheduled);
    assert_eq!(runs[0].cron_execution_id, Some(report.execution_id));
}

#[tokio::test]
async fn interval_selects_providers_by_cadence() {
    let source = FakeSource::returning(1);
    let (state, _db) = test_utils::build_state(test_utils::test_config("http://127.0.0.1:9"), source.clone())
        .await
        .unwrap();

    let user = Uuid::new_v4();
    for kind in [ProviderKind::Github, ProviderKind::Slack, ProviderKind::Notion] {
        test_utils::connect_pair(&state, user, kind, &test_utils::bundle(kind.as_str()))
            .await
            .unwrap();
    }

    let cancel = CancellationToken::new();
    let frequent = state
        .cron_monitor
        .run_scheduled_sync(SyncInterval::parse(Some("15min")).unwrap(), &cancel)
        .await
        .unwrap();
    assert_eq!(frequent.summary.providers_synced, 1);

    let standard = state
        .cron_monitor
        .run_scheduled_sync(SyncInterval::parse(Some("30min")).unwrap(), &cancel)
        .await
        .unwrap();
    assert_eq!(standard.summary.providers_synced, 2);
    assert!(!standard.summary.providers.contains(&ProviderKind::Github));

    let everything = state
        .cron_monitor
        .run_scheduled_sync(None, &cancel)
        .await
        .unwrap();
    assert_eq!(everything.job_name, "sync_all");
    assert_eq!(everything.summary.providers_synced, 3);
    assert_eq!(source.calls(), 6);
}

#[tokio::test]
async fn cancelled_batch_dispatches_nothing_and_is_recorded_failed() {
    let source = FakeSource::returning(1);
    let (state, _db) = test_utils::build_state(test_utils::test_config("http://127.0.0.1:9"), source.clone())
        .await
        .unwrap();
    test_utils::connect_pair(&state, Uuid::new_v4(), ProviderKind::Github, &test_utils::bundle("t"))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = state
        .cron_monitor
        .run_scheduled_sync(None, &cancel)
        .await
        .unwrap();

    assert!(report.summary.cancelled);
    assert_eq!(report.status, CronJobStatus::Failed);
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn repeated_failures_keep_one_notification_and_success_clears_it() {
    let source = FakeSource::returning(2);
    let (state, _db) = test_utils::build_state(test_utils::test_config("http://127.0.0.1:9"), source.clone())
        .await
        .unwrap();
    let user = Uuid::new_v4();
    test_utils::connect_pair(&state, user, ProviderKind::Slack, &test_utils::bundle("slack-token"))
        .await
        .unwrap();
    source.fail_for_token("slack-token");

    for _ in 0..3 {
        let outcome = state.supervisor.run_manual(user, ProviderKind::Slack).await.unwrap();
        assert!(!outcome.success);
    }
    assert_eq!(state.notifications.get_unread_count(user).await.unwrap(), 1);

    source.succeed_for_token("slack-token");
    let outcome = state.supervisor.run_manual(user, ProviderKind::Slack).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.items_synced, Some(2));
    assert_eq!(state.notifications.get_unread_count(user).await.unwrap(), 0);
}

#[tokio::test]
async fn expired_credential_without_refresh_requires_reauth() {
    let source = FakeSource::returning(1);
    let (state, db) = test_utils::build_state(test_utils::test_config("http://127.0.0.1:9"), source.clone())
        .await
        .unwrap();
    let user = Uuid::new_v4();
    test_utils::connect_pair(&state, user, ProviderKind::Github, &expired("stale", None))
        .await
        .unwrap();

    let outcome = state.supervisor.run_manual(user, ProviderKind::Github).await.unwrap();

    assert!(!outcome.success);
    let error = outcome.error.unwrap().to_lowercase();
    assert!(error.contains("reauth"), "unexpected error: {}", error);
    assert_eq!(source.calls(), 0);

    let notifications = state.notifications.get_notifications(user, true).await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].notification_type, NotificationType::ReauthRequired);

    let runs = SyncRunRepository::new(db).recent(user, "github", 10).await.unwrap();
    assert_eq!(runs[0].status, SyncRunStatus::Failed);
    assert_eq!(runs[0].trigger, SyncTrigger::Manual);
}

#[tokio::test]
async fn expired_credential_is_refreshed_before_fetching() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=old-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-access",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let source = FakeSource::returning(4);
    let (state, _db) = test_utils::build_state(test_utils::test_config(&server.uri()), source.clone())
        .await
        .unwrap();
    let user = Uuid::new_v4();
    test_utils::connect_pair(
        &state,
        user,
        ProviderKind::GoogleCalendar,
        &expired("old-access", Some("old-refresh")),
    )
    .await
    .unwrap();

    let outcome = state
        .supervisor
        .run_manual(user, ProviderKind::GoogleCalendar)
        .await
        .unwrap();
    assert!(outcome.success, "sync failed: {:?}", outcome.error);
    assert_eq!(outcome.items_synced, Some(4));

    let stored = state
        .vault
        .get_token(user, "google_calendar")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token, "fresh-access");
    // No rotation in the response keeps the previous refresh token
    assert_eq!(stored.refresh_token.as_deref(), Some("old-refresh"));
    assert!(stored.expires_at.unwrap() > Utc::now());
}

#[tokio::test]
async fn rejected_refresh_requires_reauth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;

    let source = FakeSource::returning(1);
    let (state, _db) = test_utils::build_state(test_utils::test_config(&server.uri()), source.clone())
        .await
        .unwrap();
    let user = Uuid::new_v4();
    test_utils::connect_pair(
        &state,
        user,
        ProviderKind::GoogleCalendar,
        &expired("old-access", Some("revoked-refresh")),
    )
    .await
    .unwrap();

    let outcome = state
        .supervisor
        .run_manual(user, ProviderKind::GoogleCalendar)
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().to_lowercase().contains("reauth"));
    assert_eq!(source.calls(), 0);

    let notifications = state.notifications.get_notifications(user, true).await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].notification_type, NotificationType::ReauthRequired);
}

#[tokio::test]
async fn missing_credential_fails_without_notification() {
    let source = FakeSource::returning(1);
    let (state, _db) = test_utils::build_state(test_utils::test_config("http://127.0.0.1:9"), source)
        .await
        .unwrap();
    let user = Uuid::new_v4();

    let outcome = state.supervisor.run_manual(user, ProviderKind::Notion).await.unwrap();
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("not connected"));
    assert_eq!(state.notifications.get_unread_count(user).await.unwrap(), 0);
}

#[tokio::test]
async fn second_sync_resumes_from_the_watermark_without_duplicates() {
    let source = FakeSource::returning(3);
    let (state, db) = test_utils::build_state(test_utils::test_config("http://127.0.0.1:9"), source.clone())
        .await
        .unwrap();
    let user = Uuid::new_v4();
    test_utils::connect_pair(&state, user, ProviderKind::Github, &test_utils::bundle("t"))
        .await
        .unwrap();
    let activities = ActivityRepository::new(db.clone());

    assert!(state.supervisor.run_manual(user, ProviderKind::Github).await.unwrap().success);
    let watermark = ConnectionRepository::new(db)
        .find(user, "github")
        .await
        .unwrap()
        .unwrap()
        .last_synced_at;
    assert!(watermark.is_some());
    assert_eq!(activities.count_for(user, "github").await.unwrap(), 3);

    // The source hands back the same external ids again
    assert!(state.supervisor.run_manual(user, ProviderKind::Github).await.unwrap().success);
    assert_eq!(activities.count_for(user, "github").await.unwrap(), 3);

    let seen = source.since_seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], None);
    assert_eq!(seen[1], watermark);
}

#[tokio::test]
async fn hung_fetch_times_out_without_stalling_the_batch() {
    let source = FakeSource::returning(1);
    let mut config = test_utils::test_config("http://127.0.0.1:9");
    config.sync.call_timeout_seconds = 1;
    let (state, db) = test_utils::build_state(config, source.clone()).await.unwrap();

    let slow_user = Uuid::new_v4();
    let fast_user = Uuid::new_v4();
    test_utils::connect_pair(&state, slow_user, ProviderKind::Github, &test_utils::bundle("slow"))
        .await
        .unwrap();
    test_utils::connect_pair(&state, fast_user, ProviderKind::Github, &test_utils::bundle("fast"))
        .await
        .unwrap();
    source.hang_for_token("slow");

    let report = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        state
            .cron_monitor
            .run_scheduled_sync(Some(SyncInterval::FifteenMinutes), &CancellationToken::new()),
    )
    .await
    .expect("batch finished within the bound")
    .unwrap();

    assert_eq!(report.summary.success_count, 1);
    assert_eq!(report.summary.failure_count, 1);

    let runs = SyncRunRepository::new(db);
    let slow_run = &runs.recent(slow_user, "github", 1).await.unwrap()[0];
    assert_eq!(slow_run.status, SyncRunStatus::Failed);
    assert!(slow_run.error.as_deref().unwrap().contains("timed out"));
    let fast_run = &runs.recent(fast_user, "github", 1).await.unwrap()[0];
    assert_eq!(fast_run.status, SyncRunStatus::Success);
}

#[tokio::test]
async fn panicking_sync_is_recorded_failed_and_frees_the_pair() {
    let source = FakeSource::returning(1);
    let (state, db) = test_utils::build_state(test_utils::test_config("http://127.0.0.1:9"), source.clone())
        .await
        .unwrap();
    let user = Uuid::new_v4();
    test_utils::connect_pair(&state, user, ProviderKind::Github, &test_utils::bundle("crash"))
        .await
        .unwrap();
    source.panic_for_token("crash");

    let outcome = state.supervisor.run_manual(user, ProviderKind::Github).await.unwrap();
    assert!(!outcome.success);
    assert!(!outcome.skipped);
    assert_eq!(outcome.error.as_deref(), Some(ABANDONED_RUN_ERROR));

    let status = state.supervisor.status(user, ProviderKind::Github);
    assert_eq!(status.state, TaskState::Failed);
    assert!(status.finished_at.is_some());
    assert_eq!(state.supervisor.running_count(), 0);

    // The open run is closed in the background
    let runs = SyncRunRepository::new(db);
    let mut closed = None;
    for _ in 0..50 {
        let run = runs.recent(user, "github", 1).await.unwrap().remove(0);
        if run.status != SyncRunStatus::Running {
            closed = Some(run);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    let run = closed.expect("abandoned run was closed");
    assert_eq!(run.status, SyncRunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some(ABANDONED_RUN_ERROR));

    // The pair is usable again
    source.succeed_for_token("crash");
    let outcome = state.supervisor.run_manual(user, ProviderKind::Github).await.unwrap();
    assert!(outcome.success);
    assert_eq!(
        state.supervisor.status(user, ProviderKind::Github).state,
        TaskState::Succeeded
    );
}

#[tokio::test]
async fn pair_already_syncing_is_skipped() {
    let source = FakeSource::returning(1);
    let (state, db) = test_utils::build_state(test_utils::test_config("http://127.0.0.1:9"), source.clone())
        .await
        .unwrap();
    let user = Uuid::new_v4();
    test_utils::connect_pair(&state, user, ProviderKind::Github, &test_utils::bundle("t"))
        .await
        .unwrap();

    let orchestrator = state.supervisor.orchestrator();
    let held = orchestrator.locks().try_acquire(user, ProviderKind::Github).unwrap();
    let outcome = orchestrator
        .sync_provider(user, ProviderKind::Github, SyncTrigger::Manual, None)
        .await;
    assert!(outcome.skipped);
    assert!(!outcome.success);
    assert_eq!(source.calls(), 0);
    assert!(
        SyncRunRepository::new(db)
            .recent(user, "github", 10)
            .await
            .unwrap()
            .is_empty()
    );

    drop(held);
    let outcome = orchestrator
        .sync_provider(user, ProviderKind::Github, SyncTrigger::Manual, None)
        .await;
    assert!(outcome.success);
}

#[tokio::test]
async fn dashboard_and_cleanup_reflect_history() {
    let source = FakeSource::returning(1);
    let (state, _db) = test_utils::build_state(test_utils::test_config("http://127.0.0.1:9"), source.clone())
        .await
        .unwrap();
    let user = Uuid::new_v4();
    test_utils::connect_pair(&state, user, ProviderKind::Github, &test_utils::bundle("ok"))
        .await
        .unwrap();
    test_utils::connect_pair(&state, user, ProviderKind::Slack, &test_utils::bundle("bad"))
        .await
        .unwrap();
    source.fail_for_token("bad");

    state
        .cron_monitor
        .run_scheduled_sync(None, &CancellationToken::new())
        .await
        .unwrap();

    let dashboard = state.cron_monitor.get_dashboard_data(24).await.unwrap();
    assert_eq!(dashboard.total_executions, 1);
    assert_eq!(dashboard.successful_executions, 1);
    assert_eq!(dashboard.pairs_succeeded, 1);
    assert_eq!(dashboard.pairs_failed, 1);
    assert_eq!(dashboard.recent_executions.len(), 1);

    assert!(state.cron_monitor.get_dashboard_data(0).await.is_err());
    assert!(state.cron_monitor.get_dashboard_data(169).await.is_err());
    assert!(state.cron_monitor.cleanup_old_logs(0).await.is_err());

    // Nothing is old enough to prune yet
    assert_eq!(state.cron_monitor.cleanup_old_logs(1).await.unwrap(), 0);
}
