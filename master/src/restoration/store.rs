//! Durable store of restoration jobs
//!
//! Same layout as the schedule registry: one lock per job, the index held only
//! for lookups, and every change persisted before it is published.
//!
//! Finishing a job releases its schedule in the tracker before the job lock is
//! dropped, so a reader that sees a terminal state can restore again at once.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{RestorationFailure, RestorationJob, RestorationState};
use crate::database::Database;
use crate::errors::{RestorationError, Result};
use crate::restoration_tracker::RestorationTracker;

type JobHandle = Arc<RwLock<RestorationJob>>;

pub struct RestorationStore {
    database: Arc<Database>,
    tracker: RestorationTracker,
    jobs: RwLock<HashMap<String, JobHandle>>,
}

impl RestorationStore {
    pub fn new(database: Arc<Database>, tracker: RestorationTracker) -> Self {
        Self {
            database,
            tracker,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn load(&self) -> Result<usize> {
        let stored = self.database.load_restorations().await?;
        let mut jobs = self.jobs.write().await;
        jobs.clear();
        for job in stored {
            jobs.insert(job.id.clone(), Arc::new(RwLock::new(job)));
        }
        info!("Loaded {} restorations", jobs.len());
        Ok(jobs.len())
    }

    pub async fn insert(&self, job: RestorationJob) -> Result<()> {
        self.database.store_restoration(&job).await?;
        self.jobs
            .write()
            .await
            .insert(job.id.clone(), Arc::new(RwLock::new(job)));
        Ok(())
    }

    async fn handle(&self, restoration_id: &str) -> Result<JobHandle> {
        self.jobs
            .read()
            .await
            .get(restoration_id)
            .cloned()
            .ok_or_else(|| {
                RestorationError::NotFound {
                    restoration_id: restoration_id.to_string(),
                }
                .into()
            })
    }

    pub async fn get(&self, restoration_id: &str) -> Result<RestorationJob> {
        let handle = self.handle(restoration_id).await?;
        let job = handle.read().await;
        Ok(job.clone())
    }

    /// All jobs oldest first, or exactly the one named by `restoration_id`
    pub async fn list(&self, restoration_id: Option<&str>) -> Result<Vec<RestorationJob>> {
        if let Some(id) = restoration_id {
            return Ok(vec![self.get(id).await?]);
        }

        let handles: Vec<JobHandle> = self.jobs.read().await.values().cloned().collect();
        let mut jobs = Vec::with_capacity(handles.len());
        for handle in handles {
            jobs.push(handle.read().await.clone());
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }

    pub async fn in_flight(&self) -> Result<Vec<RestorationJob>> {
        Ok(self
            .list(None)
            .await?
            .into_iter()
            .filter(|job| job.state == RestorationState::Restoring)
            .collect())
    }

    pub async fn set_progress(
        &self,
        restoration_id: &str,
        tablets_total: u32,
        tablets_restored: u32,
    ) -> Result<RestorationJob> {
        let handle = self.handle(restoration_id).await?;
        let mut job = handle.write().await;
        if job.state.is_terminal() {
            return Err(RestorationError::TerminalState {
                restoration_id: restoration_id.to_string(),
                state: job.state.to_string(),
            }
            .into());
        }

        let mut updated = job.clone();
        updated.tablets_total = tablets_total;
        updated.tablets_restored = tablets_restored;
        self.database.store_restoration(&updated).await?;
        *job = updated.clone();
        debug!(
            "Restoration {} progress {}/{}",
            restoration_id, tablets_restored, tablets_total
        );
        Ok(updated)
    }

    /// Move the job to a terminal state and release its schedule
    pub async fn finish(
        &self,
        restoration_id: &str,
        state: RestorationState,
        failure: Option<RestorationFailure>,
        at: DateTime<Utc>,
    ) -> Result<RestorationJob> {
        let handle = self.handle(restoration_id).await?;
        let mut job = handle.write().await;

        let mut updated = job.clone();
        updated.finish(state, failure, at)?;
        self.database.store_restoration(&updated).await?;
        *job = updated.clone();
        self.tracker
            .finish_restoration(&updated.schedule_id, &updated.id)
            .await;
        Ok(updated)
    }

    /// Forget terminal jobs that completed before `cutoff`
    pub async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self
            .database
            .delete_terminal_restorations_before(cutoff)
            .await?;
        if removed.is_empty() {
            return Ok(0);
        }

        let mut jobs = self.jobs.write().await;
        for id in &removed {
            jobs.remove(id);
        }
        info!("Purged {} finished restorations", removed.len());
        Ok(removed.len())
    }
}
