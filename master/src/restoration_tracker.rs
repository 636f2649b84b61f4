//! Active restoration tracking
//!
//! Records which schedules are currently being restored. An entry exists from
//! the moment a restoration is accepted until it reaches a terminal state, and
//! while it exists:
//!
//! - a second restoration of the same schedule is refused
//! - the schedule cannot be deleted
//! - the restoration's base snapshot is pinned against pruning
//!
//! # Usage
//!
//! ```ignore
//! tracker.try_start_restoration(&schedule_id, &job_id, &base_snapshot_id).await?;
//!
//! // Drive the restoration...
//!
//! tracker.finish_restoration(&schedule_id, &job_id).await;
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::errors::{RestorationError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct ActiveRestoration {
    pub restoration_id: String,
    pub schedule_id: String,
    pub base_snapshot_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestorationActivity {
    pub busy_schedules: HashMap<String, ActiveRestoration>,
    pub total_active: usize,
}

#[derive(Clone, Default)]
pub struct RestorationTracker {
    active: Arc<RwLock<HashMap<String, ActiveRestoration>>>, // schedule_id -> restoration
}

impl RestorationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `schedule_id` for a restoration. Fails with a conflict while
    /// another restoration holds it.
    #[instrument(skip(self), fields(schedule = %schedule_id, restoration = %restoration_id))]
    pub async fn try_start_restoration(
        &self,
        schedule_id: &str,
        restoration_id: &str,
        base_snapshot_id: &str,
    ) -> Result<()> {
        let mut active = self.active.write().await;

        if let Some(current) = active.get(schedule_id) {
            return Err(RestorationError::AlreadyRestoring {
                schedule_id: schedule_id.to_string(),
                restoration_id: current.restoration_id.clone(),
            }
            .into());
        }

        active.insert(
            schedule_id.to_string(),
            ActiveRestoration {
                restoration_id: restoration_id.to_string(),
                schedule_id: schedule_id.to_string(),
                base_snapshot_id: base_snapshot_id.to_string(),
                started_at: Utc::now(),
            },
        );
        info!(
            "Restoration {} claimed schedule {} (base {})",
            restoration_id, schedule_id, base_snapshot_id
        );
        Ok(())
    }

    /// Release the schedule, but only if `restoration_id` still holds it
    #[instrument(skip(self), fields(schedule = %schedule_id, restoration = %restoration_id))]
    pub async fn finish_restoration(&self, schedule_id: &str, restoration_id: &str) {
        let mut active = self.active.write().await;
        match active.get(schedule_id) {
            Some(current) if current.restoration_id == restoration_id => {
                let took = Utc::now().signed_duration_since(current.started_at);
                info!(
                    "Restoration {} released schedule {} (took {}ms)",
                    restoration_id,
                    schedule_id,
                    took.num_milliseconds()
                );
                active.remove(schedule_id);
            }
            Some(current) => debug!(
                "Restoration {} tried to release schedule {} held by {}",
                restoration_id, schedule_id, current.restoration_id
            ),
            None => {}
        }
    }

    pub async fn is_busy(&self, schedule_id: &str) -> bool {
        self.active.read().await.contains_key(schedule_id)
    }

    pub async fn get_active(&self, schedule_id: &str) -> Option<ActiveRestoration> {
        self.active.read().await.get(schedule_id).cloned()
    }

    /// Snapshot ids that must survive pruning of `schedule_id`
    pub async fn pinned_bases(&self, schedule_id: &str) -> HashSet<String> {
        self.active
            .read()
            .await
            .get(schedule_id)
            .map(|a| a.base_snapshot_id.clone())
            .into_iter()
            .collect()
    }

    pub async fn get_activity(&self) -> RestorationActivity {
        let active = self.active.read().await;
        RestorationActivity {
            busy_schedules: active.clone(),
            total_active: active.len(),
        }
    }
}
