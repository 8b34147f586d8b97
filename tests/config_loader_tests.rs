use connector_sync::config::ConfigLoader;
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const TEST_KEY: &str = "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=";

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    for (key, _) in env::vars() {
        if key.starts_with("CONNECTOR_SYNC_") {
            unsafe {
                env::remove_var(key);
            }
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("CONNECTOR_SYNC_CRYPTO_KEY", TEST_KEY);
    }

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.state_ttl_minutes, 10);
    assert_eq!(cfg.rate_limits.manual_sync_per_minute, 10);
    assert_eq!(cfg.rate_limits.summary_per_minute, 20);
    assert!(cfg.enabled_providers.is_empty());
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "CONNECTOR_SYNC_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "CONNECTOR_SYNC_API_BIND_ADDR=192.168.0.10:5000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "CONNECTOR_SYNC_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        &format!(
            "CONNECTOR_SYNC_PROFILE=test\nCONNECTOR_SYNC_API_BIND_ADDR=127.0.0.1:4000\nCONNECTOR_SYNC_CRYPTO_KEY={}\n",
            TEST_KEY
        ),
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "CONNECTOR_SYNC_API_BIND_ADDR=127.0.0.1:3000\n",
    );

    unsafe {
        env::set_var("CONNECTOR_SYNC_API_BIND_ADDR", "0.0.0.0:9090");
        env::set_var("CONNECTOR_SYNC_CRYPTO_KEY", TEST_KEY);
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");

    clear_env();
}

#[test]
fn provider_settings_are_grouped_by_name() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        &format!(
            "CONNECTOR_SYNC_CRYPTO_KEY={}\n\
             CONNECTOR_SYNC_ENABLED_PROVIDERS=GitHub, google_calendar\n\
             CONNECTOR_SYNC_PROVIDER_GITHUB_CLIENT_ID=gh-id\n\
             CONNECTOR_SYNC_PROVIDER_GITHUB_CLIENT_SECRET=gh-secret\n\
             CONNECTOR_SYNC_PROVIDER_GOOGLE_CALENDAR_CLIENT_ID=gc-id\n\
             CONNECTOR_SYNC_PROVIDER_GOOGLE_CALENDAR_CLIENT_SECRET=gc-secret\n\
             CONNECTOR_SYNC_PROVIDER_GOOGLE_CALENDAR_OAUTH_BASE=http://127.0.0.1:9999/\n",
            TEST_KEY
        ),
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("provider config loads");

    assert_eq!(cfg.enabled_providers, vec!["github", "google_calendar"]);
    assert_eq!(cfg.providers["github"].client_id.as_deref(), Some("gh-id"));
    let calendar = &cfg.providers["google_calendar"];
    assert_eq!(calendar.client_secret.as_deref(), Some("gc-secret"));
    assert_eq!(calendar.oauth_base.as_deref(), Some("http://127.0.0.1:9999"));

    clear_env();
}

#[test]
fn enabled_provider_without_secret_fails() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("CONNECTOR_SYNC_CRYPTO_KEY", TEST_KEY);
        env::set_var("CONNECTOR_SYNC_ENABLED_PROVIDERS", "slack");
        env::set_var("CONNECTOR_SYNC_PROVIDER_SLACK_CLIENT_ID", "slack-id");
    }

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("missing client secret should fail");
    assert!(err.to_string().contains("no client secret"));

    clear_env();
}

#[test]
fn non_dev_profile_requires_cron_secret() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("CONNECTOR_SYNC_PROFILE", "prod");
        env::set_var("CONNECTOR_SYNC_CRYPTO_KEY", TEST_KEY);
    }

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("prod without cron secret should fail");
    assert!(err.to_string().contains("cron secret is missing"));

    unsafe {
        env::set_var("CONNECTOR_SYNC_CRON_SECRET", "abc");
    }
    let cfg = loader.load().expect("prod with cron secret loads");
    assert_eq!(cfg.cron_secret.as_deref(), Some("abc"));

    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("CONNECTOR_SYNC_API_BIND_ADDR", "not-an-addr");
        env::set_var("CONNECTOR_SYNC_CRYPTO_KEY", TEST_KEY);
    }
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}
