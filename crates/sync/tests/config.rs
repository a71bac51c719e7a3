#![forbid(unsafe_code)]

use jm_sync::{ConfigLoader, SyncConfig, SyncError};
use std::path::PathBuf;
use std::time::Duration;

// Nothing in the test environment sets variables with this prefix.
const ISOLATED_PREFIX: &str = "JM_CONFIG_TEST_UNSET";

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("jm_sync_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

#[test]
fn toml_file_overrides_defaults() {
    let dir = temp_dir("config_toml");
    let path = dir.join("sync.toml");
    std::fs::write(
        &path,
        r#"
database_dir = "/var/lib/jira-metrics"
lease_duration_minutes = 45
minimum_interval_minutes = 15

[logging]
level = "debug"
json = true
"#,
    )
    .expect("write config");

    let config = ConfigLoader::new()
        .with_env_prefix(ISOLATED_PREFIX)
        .with_config_path(&path)
        .load()
        .expect("load");

    assert_eq!(config.database_dir, PathBuf::from("/var/lib/jira-metrics"));
    assert_eq!(config.lease_duration_minutes, 45);
    assert_eq!(config.minimum_interval_minutes, 15);
    assert_eq!(config.stale_run_after_minutes, 240);
    assert_eq!(config.busy_timeout(), Duration::from_secs(5));
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);

    let policy = config.default_policy();
    assert_eq!(policy.lease_duration, Duration::from_secs(45 * 60));
    assert_eq!(policy.minimum_interval, Duration::from_secs(15 * 60));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = temp_dir("config_missing");
    let config = ConfigLoader::new()
        .with_env_prefix(ISOLATED_PREFIX)
        .with_config_path(dir.join("absent.toml"))
        .load()
        .expect("load");
    assert_eq!(config, SyncConfig::default());
}

#[test]
fn invalid_values_are_rejected_after_merge() {
    let dir = temp_dir("config_invalid");
    let path = dir.join("sync.toml");
    std::fs::write(&path, "minimum_interval_minutes = 0\n").expect("write config");

    let result = ConfigLoader::new()
        .with_env_prefix(ISOLATED_PREFIX)
        .with_config_path(&path)
        .load();
    assert!(matches!(result, Err(SyncError::InvalidInput(_))));
}

#[test]
fn malformed_values_are_config_errors() {
    let dir = temp_dir("config_malformed");
    let path = dir.join("sync.toml");
    std::fs::write(&path, "lease_duration_minutes = \"soon\"\n").expect("write config");

    let result = ConfigLoader::new()
        .with_env_prefix(ISOLATED_PREFIX)
        .with_config_path(&path)
        .load();
    assert!(matches!(result, Err(SyncError::Config(_))));
}
