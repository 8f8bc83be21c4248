//! Configuration precedence across the DB table, YAML files and CLI flags.

mod common;

use common::{test_db, test_log};
use std::time::Duration;
use streamsync::config::{
    self, CliOverrides, ConfigLayer, ErrorPolicy, SharedConfig, SyncConfig,
};
use tempfile::TempDir;

fn write_yaml(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("ssync.yaml");
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn yaml_overrides_db_and_cli_overrides_yaml() {
    let _log = test_log("yaml_overrides_db_and_cli_overrides_yaml");
    let mut storage = test_db();
    storage.set_config("host", "db.example.com").unwrap();
    storage.set_config("max-issues", "500").unwrap();
    storage.set_config("api-interval", "3").unwrap();

    let dir = TempDir::new().unwrap();
    let path = write_yaml(
        &dir,
        "host: yaml.example.com\napi_interval: 1.5\nerror:\n  policy: halt\n",
    );
    let cli = CliOverrides {
        host: Some("cli.example.com".to_string()),
        ..CliOverrides::default()
    };

    let layer = config::load_config(Some(&storage), Some(&path), &cli).unwrap();
    let sync = SyncConfig::from_layer(&layer).unwrap();
    assert_eq!(sync.host, "cli.example.com");
    assert_eq!(sync.max_issues, 500);
    assert_eq!(sync.api_interval, Duration::from_millis(1500));
    assert_eq!(sync.error_policy, ErrorPolicy::Halt);
    assert_eq!(sync.poll_interval, SyncConfig::default().poll_interval);
}

#[test]
fn startup_keys_never_come_from_the_database() {
    let _log = test_log("startup_keys_never_come_from_the_database");
    let mut storage = test_db();
    storage.set_config("db", "/elsewhere.db").unwrap();
    let layer = ConfigLayer::from_db(&storage).unwrap();
    assert!(layer.startup.is_empty());
    assert!(!layer.runtime.contains_key("db"));
}

#[test]
fn yaml_startup_keys_select_paths() {
    let _log = test_log("yaml_startup_keys_select_paths");
    let dir = TempDir::new().unwrap();
    let path = write_yaml(&dir, "db: /tmp/ssync-test.db\nlog_file: /tmp/ssync.log\n");
    let layer = ConfigLayer::from_yaml(&path).unwrap();
    assert_eq!(
        config::db_path_from_layer(&layer),
        std::path::PathBuf::from("/tmp/ssync-test.db")
    );
    assert_eq!(
        config::log_file_from_layer(&layer),
        Some(std::path::PathBuf::from("/tmp/ssync.log"))
    );
}

#[test]
fn missing_explicit_config_is_an_error() {
    let _log = test_log("missing_explicit_config_is_an_error");
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.yaml");
    assert!(config::load_explicit_config(Some(&missing)).is_err());
    assert!(ConfigLayer::from_yaml(&missing).unwrap().runtime.is_empty());
}

#[test]
fn token_from_env_prefers_ssync_variable() {
    let _log = test_log("token_from_env_prefers_ssync_variable");
    let layer = ConfigLayer::from_vars([
        ("GITHUB_TOKEN".to_string(), "gh".to_string()),
        ("SSYNC_ACCESS_TOKEN".to_string(), "ss".to_string()),
        ("SSYNC_POLL_INTERVAL".to_string(), "0.25".to_string()),
    ]);
    let sync = SyncConfig::from_layer(&layer).unwrap();
    assert_eq!(sync.access_token.as_deref(), Some("ss"));
    assert_eq!(sync.poll_interval, Duration::from_millis(250));

    let fallback = ConfigLayer::from_vars([("GITHUB_TOKEN".to_string(), "gh".to_string())]);
    assert_eq!(
        SyncConfig::from_layer(&fallback).unwrap().access_token.as_deref(),
        Some("gh")
    );
}

#[test]
fn invalid_values_name_the_key() {
    let _log = test_log("invalid_values_name_the_key");
    let layer = ConfigLayer::from_vars([("SSYNC_ERROR_POLICY".to_string(), "retry".to_string())]);
    let err = SyncConfig::from_layer(&layer).unwrap_err();
    assert!(err.to_string().contains("error-policy"), "{err}");
}

#[test]
fn shared_config_swaps_atomically() {
    let _log = test_log("shared_config_swaps_atomically");
    let shared = SharedConfig::new(SyncConfig::default());
    let before = shared.load();
    shared.reconfigure(SyncConfig {
        host: "ghe.example.com".to_string(),
        ..SyncConfig::default()
    });
    assert_eq!(before.host, "api.github.com");
    assert_eq!(shared.load().host, "ghe.example.com");
}
