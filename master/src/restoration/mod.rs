//! Point-in-time restoration jobs
//!
//! A restoration returns every tablet of a schedule's targets to its state as
//! of `target_timestamp`, starting from the latest complete snapshot at or
//! before that time. Jobs move RESTORING -> RESTORED | FAILED and never leave
//! a terminal state.

pub mod orchestrator;
pub mod store;

pub use orchestrator::RestorationOrchestrator;
pub use store::RestorationStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{RestorationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestorationState {
    Restoring,
    Restored,
    Failed,
}

impl RestorationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestorationState::Restoring => "RESTORING",
            RestorationState::Restored => "RESTORED",
            RestorationState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RestorationState::Restoring)
    }
}

impl fmt::Display for RestorationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RestorationState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "RESTORING" => Ok(RestorationState::Restoring),
            "RESTORED" => Ok(RestorationState::Restored),
            "FAILED" => Ok(RestorationState::Failed),
            other => Err(anyhow::anyhow!("Unknown restoration state '{}'", other)),
        }
    }
}

/// The snapshot a restoration starts from, referenced by id only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseSnapshotRef {
    pub snapshot_id: String,
    pub snapshot_time: DateTime<Utc>,
}

/// Where a failed restoration stopped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestorationFailure {
    pub step: String,
    pub tablet_id: Option<String>,
    pub attempts: u32,
    pub reason: String,
}

impl fmt::Display for RestorationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tablet_id {
            Some(tablet) => write!(
                f,
                "{} failed on tablet {} after {} attempts: {}",
                self.step, tablet, self.attempts, self.reason
            ),
            None => write!(f, "{} failed: {}", self.step, self.reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestorationJob {
    pub id: String,
    pub schedule_id: String,
    pub target_timestamp: DateTime<Utc>,
    pub state: RestorationState,
    pub base_snapshot: BaseSnapshotRef,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub tablets_total: u32,
    pub tablets_restored: u32,
    pub failure: Option<RestorationFailure>,
}

impl RestorationJob {
    pub fn new(
        id: String,
        schedule_id: &str,
        target_timestamp: DateTime<Utc>,
        base_snapshot: BaseSnapshotRef,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            schedule_id: schedule_id.to_string(),
            target_timestamp,
            state: RestorationState::Restoring,
            base_snapshot,
            created_at,
            completed_at: None,
            tablets_total: 0,
            tablets_restored: 0,
            failure: None,
        }
    }

    /// Move to a terminal state; terminal jobs reject any further transition
    pub fn finish(
        &mut self,
        state: RestorationState,
        failure: Option<RestorationFailure>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if self.state.is_terminal() {
            return Err(RestorationError::TerminalState {
                restoration_id: self.id.clone(),
                state: self.state.to_string(),
            }
            .into());
        }
        if !state.is_terminal() {
            return Err(RestorationError::TerminalState {
                restoration_id: self.id.clone(),
                state: format!("{} (requested {})", self.state, state),
            }
            .into());
        }
        self.state = state;
        self.failure = failure;
        self.completed_at = Some(at);
        Ok(())
    }
}
