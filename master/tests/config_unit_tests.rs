//! Unit tests for configuration parsing and validation
//!
//! These tests verify that configuration files are parsed correctly
//! and validation rules are enforced.

mod common;

use common::fixtures::*;
use snapshot_master::config::ExecutorKind;
use snapshot_master::ConfigManager;

#[test]
fn test_parse_main_config_defaults() {
    let main_toml = r#"
host = "0.0.0.0"
port = 8095
    "#;

    let config: snapshot_master::Config = toml::from_str(main_toml).unwrap();

    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 8095);
    assert_eq!(config.database_path, "data/snapshot-master.db");
    assert_eq!(config.executor, ExecutorKind::Http);
    assert_eq!(config.retry.max_attempts, 5);
    assert!(config.housekeeping.enabled);
    assert_eq!(config.housekeeping.schedule, "0 0 * * * *");
    assert_eq!(config.scheduler.max_jitter_tolerance_ms, 1_000);
}

#[test]
fn test_parse_main_config_overrides() {
    let main_toml = r#"
host = "127.0.0.1"
port = 9000
database_path = "/var/lib/snapshots.db"
executor = "memory"

[retry]
max_attempts = 8
initial_backoff_ms = 50

[housekeeping]
enabled = false
restoration_retention_hours = 48
    "#;

    let config: snapshot_master::Config = toml::from_str(main_toml).unwrap();
    assert_eq!(config.executor, ExecutorKind::Memory);
    assert_eq!(config.retry.max_attempts, 8);
    assert_eq!(config.retry.initial_backoff_ms, 50);
    assert_eq!(config.retry.max_backoff_ms, 5_000);
    assert!(!config.housekeeping.enabled);
    assert_eq!(config.housekeeping.restoration_retention_hours, 48);
}

#[tokio::test]
async fn test_load_config_directory_merges_tables() {
    let test_config = TestConfigBuilder::new()
        .with_server("ts-1", |s| {
            s.agent("10.0.0.1", 8745)
                .table(TEST_TABLE_QUALIFIED, &["t-1", "t-2"])
                .table(OTHER_TABLE_QUALIFIED, &["e-1"])
        })
        .with_server("ts-2", |s| {
            s.agent("10.0.0.2", 8745)
                .table(TEST_TABLE_QUALIFIED, &["t-3"])
        })
        .build();

    let manager = ConfigManager::new(test_config.dir()).await.unwrap();
    let config = manager.get_current_config();

    assert_eq!(config.servers.len(), 2);
    assert_eq!(config.servers["ts-2"].host, "10.0.0.2");
    assert_eq!(config.servers["ts-1"].api_key, TEST_API_KEY);
    assert_eq!(config.servers["ts-1"].request_timeout_seconds, 30);

    let placements = &config.tables[TEST_TABLE_QUALIFIED];
    assert_eq!(placements.len(), 3);
    assert!(placements
        .iter()
        .any(|p| p.tablet_id == "t-3" && p.server == "ts-2"));
    assert_eq!(config.tables[OTHER_TABLE_QUALIFIED].len(), 1);
}

#[tokio::test]
async fn test_duplicate_tablet_is_rejected() {
    let test_config = TestConfigBuilder::new()
        .with_server("ts-1", |s| s.table(TEST_TABLE_QUALIFIED, &["t-1"]))
        .with_server("ts-2", |s| s.table(TEST_TABLE_QUALIFIED, &["t-1"]))
        .build();

    let err = ConfigManager::new(test_config.dir()).await.err().unwrap();
    assert!(err.to_string().contains("more than one server"));
}

#[tokio::test]
async fn test_unqualified_table_is_rejected() {
    let test_config = TestConfigBuilder::new()
        .with_server("ts-1", |s| s.table("just_a_namespace", &["t-1"]))
        .build();

    assert!(ConfigManager::new(test_config.dir()).await.is_err());
}

#[tokio::test]
async fn test_invalid_retry_policy_is_rejected() {
    let test_config = TestConfigBuilder::new()
        .with_main_config(|m| m.raw("[retry]\nmax_attempts = 0"))
        .build();

    let err = ConfigManager::new(test_config.dir()).await.err().unwrap();
    assert!(err.to_string().contains("retry"));
}

#[tokio::test]
async fn test_missing_main_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let result = ConfigManager::new(dir.path().to_string_lossy().to_string()).await;
    assert!(result.is_err());
}
