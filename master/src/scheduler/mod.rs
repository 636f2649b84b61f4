//! Periodic snapshot creation
//!
//! Every registered schedule gets its own timer task. On each tick the task:
//!
//! 1. Checks the schedule is due (`now - last snapshot >= interval`, minus a
//!    small jitter tolerance). A record still CREATING when no other tick is
//!    running was left by a failed write or a crash; it is settled against
//!    the tablets and the tick ends there.
//! 2. Appends a CREATING record linked to the last complete snapshot
//! 3. Fans `create_snapshot` out to every tablet of the schedule's targets
//! 4. Marks the record COMPLETE or FAILED and prunes expired history
//!
//! Missed intervals are never backfilled.
//!
//! Housekeeping of finished restorations runs separately on a cron schedule,
//! see [`housekeeping`].

pub mod housekeeping;
pub use housekeeping::Housekeeper;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::{format_utc, Clock};
use crate::config::SchedulerSettings;
use crate::constants::scheduler::JITTER_DIVISOR;
use crate::errors::{ErrorKind, Result};
use crate::executor::{
    fan_out, tablet_failure_reason, RetryPolicy, SnapshotPresence, TabletExecutor, TabletRef,
};
use crate::registry::SnapshotScheduleRegistry;
use crate::snapshot::{SnapshotRecord, SnapshotSchedule, SnapshotState, TargetObject};

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    NotDue,
    /// Another tick is running, or this one settled a leftover CREATING record
    Skipped,
    Completed(SnapshotRecord),
    Failed(SnapshotRecord),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub completed: usize,
    pub failed: usize,
}

pub struct SnapshotScheduler {
    registry: Arc<SnapshotScheduleRegistry>,
    executor: Arc<dyn TabletExecutor>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    tick_guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SnapshotScheduler {
    pub fn new(
        registry: Arc<SnapshotScheduleRegistry>,
        executor: Arc<dyn TabletExecutor>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            registry,
            executor,
            retry,
            clock,
            settings,
            tasks: Mutex::new(HashMap::new()),
            tick_guards: Mutex::new(HashMap::new()),
        }
    }

    /// Start a timer task for every schedule in the registry
    #[instrument(skip(self))]
    pub async fn start_all(self: &Arc<Self>) -> Result<usize> {
        let ids = self.registry.schedule_ids().await;
        for id in &ids {
            self.register(id).await?;
        }
        info!("Started {} snapshot timers", ids.len());
        Ok(ids.len())
    }

    /// Start (or restart) the timer task of one schedule
    pub async fn register(self: &Arc<Self>, schedule_id: &str) -> Result<()> {
        let schedule = self.registry.get_schedule(schedule_id).await?;
        let handle = self.spawn_timer(schedule.id.clone(), schedule.interval);

        if let Some(previous) = self.tasks.lock().await.insert(schedule.id.clone(), handle) {
            previous.abort();
        }
        debug!(
            "Registered snapshot timer for {} every {:?}",
            schedule.id, schedule.interval
        );
        Ok(())
    }

    pub async fn unregister(&self, schedule_id: &str) {
        if let Some(handle) = self.tasks.lock().await.remove(schedule_id) {
            handle.abort();
            info!("Stopped snapshot timer for {}", schedule_id);
        }
        self.tick_guards.lock().await.remove(schedule_id);
    }

    pub async fn active_timers(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Stop every timer task
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
        info!("Snapshot scheduler stopped");
    }

    fn spawn_timer(self: &Arc<Self>, schedule_id: String, interval: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                match scheduler.tick(&schedule_id).await {
                    Ok(TickOutcome::Failed(record)) => warn!(
                        "Snapshot {} of schedule {} failed: {}",
                        record.id,
                        schedule_id,
                        record.error_message.as_deref().unwrap_or("unknown error")
                    ),
                    Ok(outcome) => debug!("Tick of schedule {}: {:?}", schedule_id, outcome),
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        info!("Schedule {} no longer exists, stopping its timer", schedule_id);
                        break;
                    }
                    Err(e) => error!("Tick of schedule {} failed: {}", schedule_id, e),
                }
            }
        })
    }

    /// Resolve `targets` to tablets; unknown namespaces and tables are
    /// rejected as invalid arguments
    pub async fn resolve_targets(&self, targets: &[TargetObject]) -> Result<Vec<TabletRef>> {
        let executor = self.executor.clone();
        self.retry
            .run("targets", "resolve_tablets", || {
                let executor = executor.clone();
                let targets = targets.to_vec();
                async move { executor.resolve_tablets(&targets).await }
            })
            .await
            .result
    }

    async fn tick_guard(&self, schedule_id: &str) -> Arc<Mutex<()>> {
        self.tick_guards
            .lock()
            .await
            .entry(schedule_id.to_string())
            .or_default()
            .clone()
    }

    fn jitter_tolerance(&self, interval: Duration) -> Duration {
        (interval / JITTER_DIVISOR).min(self.settings.max_jitter_tolerance())
    }

    fn is_due(&self, schedule: &SnapshotSchedule, now: chrono::DateTime<Utc>) -> bool {
        let Some(last) = schedule.last_snapshot() else {
            return true;
        };
        let Ok(elapsed) = (now - last.snapshot_time).to_std() else {
            return false;
        };
        elapsed + self.jitter_tolerance(schedule.interval) >= schedule.interval
    }

    /// Run one scheduling step for `schedule_id`
    #[instrument(skip(self))]
    pub async fn tick(&self, schedule_id: &str) -> Result<TickOutcome> {
        let guard = self.tick_guard(schedule_id).await;
        let Ok(_running) = guard.try_lock() else {
            debug!("Tick of {} already running, skipping", schedule_id);
            return Ok(TickOutcome::Skipped);
        };

        let schedule = self.registry.get_schedule(schedule_id).await?;
        if let Some(stale) = schedule.snapshots.iter().find(|s| s.state == SnapshotState::Creating) {
            warn!(
                "Snapshot {} of schedule {} was left CREATING, checking tablets",
                stale.id, schedule_id
            );
            self.settle(&schedule, stale).await?;
            return Ok(TickOutcome::Skipped);
        }

        let now = self.clock.now();
        if !self.is_due(&schedule, now) {
            return Ok(TickOutcome::NotDue);
        }

        let snapshot_time = match schedule.last_snapshot() {
            Some(last) if last.snapshot_time >= now => {
                last.snapshot_time + chrono::Duration::microseconds(1)
            }
            _ => now,
        };
        let record = SnapshotRecord::creating(
            schedule_id,
            snapshot_time,
            schedule.last_complete().map(|s| s.snapshot_time),
        );
        let record = self.registry.append_snapshot(schedule_id, record).await?;

        let outcome = match self.create_on_tablets(&schedule, &record).await {
            Ok(tablets) => {
                let record = self
                    .finalize(schedule_id, &record.id, SnapshotState::Complete, None)
                    .await?;
                info!(
                    "Snapshot {} of schedule {} complete at {} ({} tablets)",
                    record.id,
                    schedule_id,
                    format_utc(record.snapshot_time),
                    tablets
                );
                TickOutcome::Completed(record)
            }
            Err(reason) => {
                let record = self
                    .finalize(schedule_id, &record.id, SnapshotState::Failed, Some(reason))
                    .await?;
                TickOutcome::Failed(record)
            }
        };

        let retention = chrono::Duration::from_std(schedule.retention)
            .unwrap_or(chrono::Duration::MAX);
        if let Some(cutoff) = now.checked_sub_signed(retention) {
            self.registry.prune_older_than(schedule_id, cutoff).await?;
        }

        Ok(outcome)
    }

    /// Snapshot every tablet; the error is the diagnostic stored on the record
    async fn create_on_tablets(
        &self,
        schedule: &SnapshotSchedule,
        record: &SnapshotRecord,
    ) -> std::result::Result<u32, String> {
        let executor = self.executor.clone();
        let tablets = self
            .resolve_targets(&schedule.targets)
            .await
            .map_err(|e| format!("resolve_tablets failed: {}", tablet_failure_reason(&e)))?;

        let report = fan_out(&self.retry, "create_snapshot", &tablets, |tablet| {
            let executor = executor.clone();
            let snapshot_id = record.id.clone();
            let at = record.snapshot_time;
            async move { executor.create_snapshot(&tablet, &snapshot_id, at).await }
        })
        .await;

        match report.first_failure() {
            Some((outcome, err)) => Err(format!(
                "{} failed on tablet {} after {} attempts: {}",
                report.operation,
                outcome.tablet_id,
                outcome.attempts,
                tablet_failure_reason(err)
            )),
            None => Ok(report.succeeded()),
        }
    }

    /// Store the terminal state of `snapshot_id`, retrying storage failures.
    /// On error the record stays CREATING and the next tick settles it.
    async fn finalize(
        &self,
        schedule_id: &str,
        snapshot_id: &str,
        state: SnapshotState,
        error_message: Option<String>,
    ) -> Result<SnapshotRecord> {
        self.retry
            .persist(&format!("snapshot {}", snapshot_id), || {
                self.registry
                    .update_snapshot_state(schedule_id, snapshot_id, state, error_message.clone())
            })
            .await
    }

    /// Settle snapshots left CREATING by a previous process by asking every
    /// tablet whether it holds the snapshot
    pub async fn recover_in_flight(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for record in self.registry.creating_snapshots().await {
            let guard = self.tick_guard(&record.schedule_id).await;
            let _running = guard.lock().await;

            let schedule = self.registry.get_schedule(&record.schedule_id).await?;
            let Some(current) = schedule.snapshot(&record.id) else {
                continue;
            };
            if current.state != SnapshotState::Creating {
                continue;
            }
            match self.settle(&schedule, current).await? {
                SnapshotState::Complete => report.completed += 1,
                _ => report.failed += 1,
            }
        }

        Ok(report)
    }

    /// Decide a CREATING record from what the tablets report
    async fn settle(&self, schedule: &SnapshotSchedule, record: &SnapshotRecord) -> Result<SnapshotState> {
        match self.check_tablets(schedule, record).await {
            Ok(()) => {
                self.finalize(&record.schedule_id, &record.id, SnapshotState::Complete, None)
                    .await?;
                info!("Recovered snapshot {} of schedule {} as COMPLETE", record.id, record.schedule_id);
                Ok(SnapshotState::Complete)
            }
            Err(reason) => {
                warn!(
                    "Recovered snapshot {} of schedule {} as FAILED: {}",
                    record.id, record.schedule_id, reason
                );
                self.finalize(&record.schedule_id, &record.id, SnapshotState::Failed, Some(reason))
                    .await?;
                Ok(SnapshotState::Failed)
            }
        }
    }

    async fn check_tablets(
        &self,
        schedule: &SnapshotSchedule,
        record: &SnapshotRecord,
    ) -> std::result::Result<(), String> {
        let executor = self.executor.clone();
        let tablets = self
            .resolve_targets(&schedule.targets)
            .await
            .map_err(|e| format!("resolve_tablets failed during recovery: {}", tablet_failure_reason(&e)))?;

        let report = fan_out(&self.retry, "snapshot_status", &tablets, |tablet| {
            let executor = executor.clone();
            let snapshot_id = record.id.clone();
            async move { executor.snapshot_status(&tablet, &snapshot_id).await }
        })
        .await;

        for outcome in &report.outcomes {
            match &outcome.result {
                Ok(SnapshotPresence::Complete) => {}
                Ok(SnapshotPresence::Missing) => {
                    return Err(format!(
                        "snapshot missing on tablet {} after restart",
                        outcome.tablet_id
                    ))
                }
                Err(e) => {
                    return Err(format!(
                        "snapshot_status failed on tablet {}: {}",
                        outcome.tablet_id,
                        tablet_failure_reason(e)
                    ))
                }
            }
        }
        Ok(())
    }
}
