//! Durable registry of snapshot schedules and their snapshot history
//!
//! Each schedule sits behind its own lock; the index is held only long enough
//! to find the entry. Every mutation is persisted before it becomes visible in
//! memory, so readers never see state that a restart would lose.
//!
//! Lock order is index, then schedule, then the restoration tracker. Deleting a
//! schedule empties its slot under the schedule lock, so a writer that looked
//! the handle up before the delete finds nothing to write to.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::clock::{format_utc, Clock};
use crate::database::Database;
use crate::errors::{RestorationError, Result, ScheduleError};
use crate::restoration::BaseSnapshotRef;
use crate::restoration_tracker::RestorationTracker;
use crate::snapshot::{ScheduleSpec, SnapshotRecord, SnapshotSchedule, SnapshotState};

/// `None` once the schedule has been deleted
type ScheduleHandle = Arc<RwLock<Option<SnapshotSchedule>>>;

fn not_found(schedule_id: &str) -> crate::errors::MasterError {
    ScheduleError::NotFound {
        schedule_id: schedule_id.to_string(),
    }
    .into()
}

fn live<'a>(slot: &'a Option<SnapshotSchedule>, schedule_id: &str) -> Result<&'a SnapshotSchedule> {
    slot.as_ref().ok_or_else(|| not_found(schedule_id))
}

fn live_mut<'a>(slot: &'a mut Option<SnapshotSchedule>, schedule_id: &str) -> Result<&'a mut SnapshotSchedule> {
    slot.as_mut().ok_or_else(|| not_found(schedule_id))
}

pub struct SnapshotScheduleRegistry {
    database: Arc<Database>,
    tracker: RestorationTracker,
    clock: Arc<dyn Clock>,
    schedules: RwLock<HashMap<String, ScheduleHandle>>,
}

impl SnapshotScheduleRegistry {
    pub fn new(database: Arc<Database>, tracker: RestorationTracker, clock: Arc<dyn Clock>) -> Self {
        Self {
            database,
            tracker,
            clock,
            schedules: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the in-memory index from the database
    pub async fn load(&self) -> Result<usize> {
        let stored = self.database.load_schedules().await?;
        let mut schedules = self.schedules.write().await;
        schedules.clear();

        for schedule in stored {
            if let Err(e) = schedule.verify_chain() {
                warn!("Loaded schedule {} with inconsistent history: {}", schedule.id, e);
            }
            schedules.insert(schedule.id.clone(), Arc::new(RwLock::new(Some(schedule))));
        }

        info!("Loaded {} snapshot schedules", schedules.len());
        Ok(schedules.len())
    }

    pub fn tracker(&self) -> &RestorationTracker {
        &self.tracker
    }

    #[instrument(skip(self, spec), fields(targets = spec.targets.len()))]
    pub async fn create_schedule(&self, spec: ScheduleSpec) -> Result<SnapshotSchedule> {
        let schedule = SnapshotSchedule {
            id: uuid::Uuid::new_v4().to_string(),
            interval: spec.interval,
            retention: spec.retention,
            targets: spec.targets,
            created_at: self.clock.now(),
            snapshots: Vec::new(),
        };

        self.database.store_schedule(&schedule).await?;
        self.schedules
            .write()
            .await
            .insert(schedule.id.clone(), Arc::new(RwLock::new(Some(schedule.clone()))));

        info!(
            "Created snapshot schedule {} (interval {:?}, retention {:?}, targets {})",
            schedule.id,
            schedule.interval,
            schedule.retention,
            schedule
                .targets
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(schedule)
    }

    async fn handle(&self, schedule_id: &str) -> Result<ScheduleHandle> {
        self.schedules
            .read()
            .await
            .get(schedule_id)
            .cloned()
            .ok_or_else(|| not_found(schedule_id))
    }

    pub async fn get_schedule(&self, schedule_id: &str) -> Result<SnapshotSchedule> {
        let handle = self.handle(schedule_id).await?;
        let slot = handle.read().await;
        live(&slot, schedule_id).cloned()
    }

    /// All schedules oldest first, or exactly the one named by `schedule_id`
    pub async fn list_schedules(&self, schedule_id: Option<&str>) -> Result<Vec<SnapshotSchedule>> {
        if let Some(id) = schedule_id {
            return Ok(vec![self.get_schedule(id).await?]);
        }

        let handles: Vec<ScheduleHandle> = self.schedules.read().await.values().cloned().collect();
        let mut schedules = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(schedule) = handle.read().await.as_ref() {
                schedules.push(schedule.clone());
            }
        }
        schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(schedules)
    }

    pub async fn schedule_ids(&self) -> Vec<String> {
        self.schedules.read().await.keys().cloned().collect()
    }

    #[instrument(skip(self))]
    pub async fn delete_schedule(&self, schedule_id: &str) -> Result<()> {
        let mut schedules = self.schedules.write().await;
        let handle = schedules.get(schedule_id).cloned().ok_or_else(|| not_found(schedule_id))?;
        let mut slot = handle.write().await;

        if let Some(active) = self.tracker.get_active(schedule_id).await {
            return Err(ScheduleError::ActiveRestoration {
                schedule_id: schedule_id.to_string(),
                restoration_id: active.restoration_id,
            }
            .into());
        }

        self.database.delete_schedule(schedule_id).await?;
        *slot = None;
        schedules.remove(schedule_id);
        info!("Deleted snapshot schedule {}", schedule_id);
        Ok(())
    }

    /// Append a CREATING record. Its time must follow the last record and it
    /// must link to the last complete one.
    pub async fn append_snapshot(&self, schedule_id: &str, record: SnapshotRecord) -> Result<SnapshotRecord> {
        let handle = self.handle(schedule_id).await?;
        self.append_to(&handle, schedule_id, record).await
    }

    async fn append_to(
        &self,
        handle: &ScheduleHandle,
        schedule_id: &str,
        record: SnapshotRecord,
    ) -> Result<SnapshotRecord> {
        let mut slot = handle.write().await;
        let schedule = live_mut(&mut slot, schedule_id)?;

        let broken = |reason: String| ScheduleError::ChainBroken {
            schedule_id: schedule_id.to_string(),
            reason,
        };
        if record.schedule_id != schedule_id || record.state != SnapshotState::Creating {
            return Err(broken(format!(
                "snapshot {} must be a CREATING record of this schedule",
                record.id
            ))
            .into());
        }
        if let Some(last) = schedule.last_snapshot() {
            if record.snapshot_time <= last.snapshot_time {
                return Err(broken(format!(
                    "snapshot time {} does not follow {}",
                    format_utc(record.snapshot_time),
                    format_utc(last.snapshot_time)
                ))
                .into());
            }
        }
        let expected_previous = schedule.last_complete().map(|s| s.snapshot_time);
        if record.previous_snapshot_time != expected_previous {
            return Err(broken(format!(
                "snapshot {} links to {:?}, expected {:?}",
                record.id, record.previous_snapshot_time, expected_previous
            ))
            .into());
        }

        self.database.store_snapshot_record(&record).await?;
        schedule.snapshots.push(record.clone());
        debug!(
            "Appended snapshot {} at {} to schedule {}",
            record.id,
            format_utc(record.snapshot_time),
            schedule_id
        );
        Ok(record)
    }

    /// Move a CREATING record to COMPLETE or FAILED
    pub async fn update_snapshot_state(
        &self,
        schedule_id: &str,
        snapshot_id: &str,
        state: SnapshotState,
        error_message: Option<String>,
    ) -> Result<SnapshotRecord> {
        let handle = self.handle(schedule_id).await?;
        let mut slot = handle.write().await;
        let schedule = live_mut(&mut slot, schedule_id)?;

        let idx = schedule
            .snapshots
            .iter()
            .position(|s| s.id == snapshot_id)
            .ok_or_else(|| ScheduleError::SnapshotNotFound {
                schedule_id: schedule_id.to_string(),
                snapshot_id: snapshot_id.to_string(),
            })?;

        let current = &schedule.snapshots[idx];
        if current.state.is_terminal() || !state.is_terminal() {
            return Err(ScheduleError::SnapshotTerminal {
                snapshot_id: snapshot_id.to_string(),
                state: if current.state.is_terminal() {
                    current.state.to_string()
                } else {
                    format!("{} (requested {})", current.state, state)
                },
            }
            .into());
        }

        let mut updated = current.clone();
        updated.state = state;
        updated.completed_at = Some(self.clock.now());
        updated.error_message = error_message;

        self.database.store_snapshot_record(&updated).await?;
        schedule.snapshots[idx] = updated.clone();
        Ok(updated)
    }

    /// Drop terminal records older than `cutoff`, keeping any base pinned by
    /// a running restoration and the newest complete record. Returns the
    /// removed snapshot ids.
    pub async fn prune_older_than(&self, schedule_id: &str, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let handle = self.handle(schedule_id).await?;
        let mut slot = handle.write().await;
        let schedule = live_mut(&mut slot, schedule_id)?;
        let mut pinned = self.tracker.pinned_bases(schedule_id).await;
        if let Some(newest) = schedule.last_complete() {
            pinned.insert(newest.id.clone());
        }

        let expired: Vec<String> = schedule
            .snapshots
            .iter()
            .filter(|s| s.state.is_terminal() && s.snapshot_time < cutoff)
            .filter(|s| {
                let keep = pinned.contains(&s.id);
                if keep {
                    debug!("Keeping snapshot {} past retention", s.id);
                }
                !keep
            })
            .map(|s| s.id.clone())
            .collect();

        if expired.is_empty() {
            return Ok(expired);
        }

        self.database.delete_snapshot_records(&expired).await?;
        schedule.snapshots.retain(|s| !expired.contains(&s.id));
        info!(
            "Pruned {} snapshots of schedule {} older than {}",
            expired.len(),
            schedule_id,
            format_utc(cutoff)
        );
        Ok(expired)
    }

    /// Pick the base snapshot for restoring to `target` and claim the schedule
    /// for `restoration_id` in one step, so the base cannot be pruned and the
    /// schedule cannot be deleted in between.
    pub async fn pin_base_for_restore(
        &self,
        schedule_id: &str,
        target: DateTime<Utc>,
        restoration_id: &str,
    ) -> Result<BaseSnapshotRef> {
        let schedules = self.schedules.read().await;
        let handle = schedules.get(schedule_id).ok_or_else(|| not_found(schedule_id))?;
        let slot = handle.write().await;
        let schedule = live(&slot, schedule_id)?;

        let base = schedule
            .restoration_base(target)
            .ok_or_else(|| RestorationError::TimestampTooOld {
                schedule_id: schedule_id.to_string(),
                target: format_utc(target),
                earliest: schedule.earliest_complete().map(|s| format_utc(s.snapshot_time)),
            })?;
        let base = BaseSnapshotRef {
            snapshot_id: base.id.clone(),
            snapshot_time: base.snapshot_time,
        };

        self.tracker
            .try_start_restoration(schedule_id, restoration_id, &base.snapshot_id)
            .await?;
        Ok(base)
    }

    /// Every record still CREATING, for startup recovery
    pub async fn creating_snapshots(&self) -> Vec<SnapshotRecord> {
        let handles: Vec<ScheduleHandle> = self.schedules.read().await.values().cloned().collect();
        let mut creating = Vec::new();
        for handle in handles {
            let slot = handle.read().await;
            let Some(schedule) = slot.as_ref() else {
                continue;
            };
            creating.extend(
                schedule
                    .snapshots
                    .iter()
                    .filter(|s| s.state == SnapshotState::Creating)
                    .cloned(),
            );
        }
        creating
    }
}
