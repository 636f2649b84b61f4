pub mod manager;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
pub use manager::ConfigManager;

use crate::constants;
use crate::executor::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub executor: ExecutorKind,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub housekeeping: HousekeepingSettings,
    // Populated from individual server config files
    #[serde(skip)]
    pub servers: HashMap<String, ServerConfig>,
    #[serde(skip)]
    pub tables: BTreeMap<String, Vec<TabletPlacement>>,
}

fn default_database_path() -> String {
    "data/snapshot-master.db".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    #[default]
    Http,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Upper bound on how early a tick may fire and still count as due
    pub max_jitter_tolerance_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_jitter_tolerance_ms: constants::scheduler::MAX_JITTER_TOLERANCE.as_millis() as u64,
        }
    }
}

impl SchedulerSettings {
    pub fn max_jitter_tolerance(&self) -> Duration {
        Duration::from_millis(self.max_jitter_tolerance_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HousekeepingSettings {
    pub enabled: bool,
    /// 6-field cron expression (sec min hour day month dow)
    pub schedule: String,
    pub restoration_retention_hours: i64,
}

impl Default for HousekeepingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: constants::housekeeping::DEFAULT_SCHEDULE.to_string(),
            restoration_retention_hours: constants::housekeeping::RESTORATION_RETENTION_HOURS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub agent_port: u16,
    pub api_key: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_request_timeout() -> u64 {
    constants::http::REQUEST_TIMEOUT.as_secs()
}

fn default_poll_interval() -> u64 {
    constants::http::JOB_POLL_INTERVAL.as_millis() as u64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfigFile {
    pub server: ServerConfig,
    #[serde(default)]
    pub tables: HashMap<String, TableConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub tablets: Vec<String>,
}

/// A tablet and the server that hosts it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletPlacement {
    pub server: String,
    pub tablet_id: String,
}
