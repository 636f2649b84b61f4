//! Drives point-in-time restorations
//!
//! A restoration is validated and recorded synchronously, then driven to a
//! terminal state by a background task:
//!
//! ```text
//! restore() ──validated──▶ RESTORING ──all tablets restored──▶ RESTORED
//!                               └──any tablet out of retries──▶ FAILED
//! ```
//!
//! Callers poll for the outcome; nothing cancels a running restoration.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use super::{RestorationFailure, RestorationJob, RestorationState, RestorationStore};
use crate::clock::{format_utc, truncate_micros, Clock};
use crate::constants::restoration::WAIT_POLL_INTERVAL;
use crate::errors::{RestorationError, Result};
use crate::executor::{fan_out, tablet_failure_reason, RetryPolicy, TabletExecutor};
use crate::registry::SnapshotScheduleRegistry;

#[derive(Clone)]
pub struct RestorationOrchestrator {
    registry: Arc<SnapshotScheduleRegistry>,
    store: Arc<RestorationStore>,
    executor: Arc<dyn TabletExecutor>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl RestorationOrchestrator {
    pub fn new(
        registry: Arc<SnapshotScheduleRegistry>,
        store: Arc<RestorationStore>,
        executor: Arc<dyn TabletExecutor>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            store,
            executor,
            retry,
            clock,
        }
    }

    /// Start restoring `schedule_id` to its state as of `target_timestamp`.
    /// Returns the RESTORING job; the work continues in the background.
    #[instrument(skip(self), fields(target = %format_utc(target_timestamp)))]
    pub async fn restore(&self, schedule_id: &str, target_timestamp: DateTime<Utc>) -> Result<RestorationJob> {
        let target = truncate_micros(target_timestamp);
        self.registry.get_schedule(schedule_id).await?;

        let now = self.clock.now();
        if target > now {
            return Err(RestorationError::TimestampInFuture {
                target: format_utc(target),
                now: format_utc(now),
            }
            .into());
        }

        let restoration_id = uuid::Uuid::new_v4().to_string();
        let base = self
            .registry
            .pin_base_for_restore(schedule_id, target, &restoration_id)
            .await?;

        let job = RestorationJob::new(restoration_id, schedule_id, target, base, now);
        if let Err(e) = self.store.insert(job.clone()).await {
            self.registry
                .tracker()
                .finish_restoration(schedule_id, &job.id)
                .await;
            return Err(e);
        }

        info!(
            "Restoration {} of schedule {} to {} accepted (base snapshot {} at {})",
            job.id,
            schedule_id,
            format_utc(target),
            job.base_snapshot.snapshot_id,
            format_utc(job.base_snapshot.snapshot_time)
        );

        self.spawn_driver(job.clone());
        Ok(job)
    }

    pub async fn get_restoration(&self, restoration_id: &str) -> Result<RestorationJob> {
        self.store.get(restoration_id).await
    }

    pub async fn list_restorations(&self, restoration_id: Option<&str>) -> Result<Vec<RestorationJob>> {
        self.store.list(restoration_id).await
    }

    /// Poll until the job is terminal or until `timeout` passes. Returns the
    /// last observed job either way.
    pub async fn wait_for_terminal(&self, restoration_id: &str, timeout: Duration) -> Result<RestorationJob> {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self.store.get(restoration_id).await?;
            if job.state.is_terminal() || Instant::now() >= deadline {
                return Ok(job);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }

    /// Re-drive restorations left RESTORING by a previous process
    pub async fn resume_in_flight(&self) -> Result<usize> {
        let in_flight = self.store.in_flight().await?;
        let mut resumed = 0;

        for job in in_flight {
            let claimed = self
                .registry
                .tracker()
                .try_start_restoration(&job.schedule_id, &job.id, &job.base_snapshot.snapshot_id)
                .await;
            if let Err(e) = claimed {
                warn!("Cannot resume restoration {}: {}", job.id, e);
                let failure = RestorationFailure {
                    step: "resume".to_string(),
                    tablet_id: None,
                    attempts: 0,
                    reason: e.to_string(),
                };
                self.finish(&job.id, RestorationState::Failed, Some(failure)).await?;
                continue;
            }

            info!("Resuming restoration {} of schedule {}", job.id, job.schedule_id);
            self.spawn_driver(job);
            resumed += 1;
        }

        Ok(resumed)
    }

    /// The schedule stays claimed until the terminal state is stored. If that
    /// write keeps failing the job is left RESTORING for the next start.
    fn spawn_driver(&self, job: RestorationJob) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let (schedule_id, restoration_id) = (job.schedule_id.clone(), job.id.clone());
            if let Err(e) = orchestrator.drive(job).await {
                error!(
                    "Restoration {} could not be recorded, schedule {} stays claimed until restart: {}",
                    restoration_id, schedule_id, e
                );
            }
        });
    }

    async fn finish(
        &self,
        restoration_id: &str,
        state: RestorationState,
        failure: Option<RestorationFailure>,
    ) -> Result<RestorationJob> {
        let at = self.clock.now();
        self.retry
            .persist(&format!("restoration {}", restoration_id), || {
                self.store.finish(restoration_id, state, failure.clone(), at)
            })
            .await
    }

    async fn drive(&self, job: RestorationJob) -> Result<()> {
        let outcome = self.restore_tablets(&job).await;
        let finished = match outcome {
            Ok(()) => self.finish(&job.id, RestorationState::Restored, None).await?,
            Err(failure) => {
                warn!("Restoration {} failed: {}", job.id, failure);
                self.finish(&job.id, RestorationState::Failed, Some(failure)).await?
            }
        };

        info!(
            "Restoration {} of schedule {} finished {} ({}/{} tablets)",
            finished.id,
            finished.schedule_id,
            finished.state,
            finished.tablets_restored,
            finished.tablets_total
        );
        Ok(())
    }

    async fn restore_tablets(&self, job: &RestorationJob) -> std::result::Result<(), RestorationFailure> {
        let schedule = self
            .registry
            .get_schedule(&job.schedule_id)
            .await
            .map_err(|e| RestorationFailure {
                step: "load_schedule".to_string(),
                tablet_id: None,
                attempts: 1,
                reason: e.to_string(),
            })?;

        let executor = self.executor.clone();
        let targets = schedule.targets.clone();
        let resolved = self
            .retry
            .run(&job.schedule_id, "resolve_tablets", || {
                let executor = executor.clone();
                let targets = targets.clone();
                async move { executor.resolve_tablets(&targets).await }
            })
            .await;
        let tablets = resolved.result.map_err(|e| RestorationFailure {
            step: "resolve_tablets".to_string(),
            tablet_id: None,
            attempts: resolved.attempts,
            reason: tablet_failure_reason(&e),
        })?;

        let total = tablets.len() as u32;
        self.record_progress(&job.id, total, 0).await;

        let report = fan_out(&self.retry, "restore_to_image", &tablets, |tablet| {
            let executor = executor.clone();
            let base = job.base_snapshot.clone();
            let target = job.target_timestamp;
            async move { executor.restore_to_image(&tablet, &base, target).await }
        })
        .await;
        self.record_progress(&job.id, total, report.succeeded()).await;

        match report.first_failure() {
            Some((outcome, err)) => Err(RestorationFailure {
                step: report.operation.clone(),
                tablet_id: Some(outcome.tablet_id.clone()),
                attempts: outcome.attempts,
                reason: tablet_failure_reason(err),
            }),
            None => Ok(()),
        }
    }

    async fn record_progress(&self, restoration_id: &str, total: u32, restored: u32) {
        if let Err(e) = self.store.set_progress(restoration_id, total, restored).await {
            warn!("Failed to record progress of restoration {}: {}", restoration_id, e);
        }
    }
}
