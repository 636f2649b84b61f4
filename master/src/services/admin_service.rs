use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::clock::format_utc;
use crate::errors::Result;
use crate::registry::SnapshotScheduleRegistry;
use crate::restoration::{RestorationFailure, RestorationJob, RestorationOrchestrator};
use crate::scheduler::SnapshotScheduler;
use crate::snapshot::{ScheduleSpec, SnapshotRecord, SnapshotSchedule};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScheduleRequest {
    pub interval_minutes: f64,
    pub retention_minutes: f64,
    /// `namespace` or `namespace.table`, optionally prefixed with `ysql.`/`ycql.`
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: String,
    pub snapshot_time_utc: String,
    pub previous_snapshot_time_utc: Option<String>,
    pub state: String,
    pub completed_at_utc: Option<String>,
    pub error_message: Option<String>,
}

impl From<&SnapshotRecord> for SnapshotInfo {
    fn from(record: &SnapshotRecord) -> Self {
        Self {
            id: record.id.clone(),
            snapshot_time_utc: format_utc(record.snapshot_time),
            previous_snapshot_time_utc: record.previous_snapshot_time.map(format_utc),
            state: record.state.to_string(),
            completed_at_utc: record.completed_at.map(format_utc),
            error_message: record.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleInfo {
    pub id: String,
    pub interval_minutes: f64,
    pub retention_minutes: f64,
    pub targets: Vec<String>,
    pub created_at_utc: String,
    /// Oldest first, most recent last
    pub snapshots: Vec<SnapshotInfo>,
}

impl From<&SnapshotSchedule> for ScheduleInfo {
    fn from(schedule: &SnapshotSchedule) -> Self {
        Self {
            id: schedule.id.clone(),
            interval_minutes: schedule.interval.as_secs_f64() / 60.0,
            retention_minutes: schedule.retention.as_secs_f64() / 60.0,
            targets: schedule.targets.iter().map(ToString::to_string).collect(),
            created_at_utc: format_utc(schedule.created_at),
            snapshots: schedule.snapshots.iter().map(SnapshotInfo::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestorationInfo {
    pub id: String,
    pub schedule_id: String,
    pub restoration_time_utc: String,
    pub state: String,
    pub base_snapshot_id: String,
    pub base_snapshot_time_utc: String,
    pub created_at_utc: String,
    pub completed_at_utc: Option<String>,
    pub tablets_total: u32,
    pub tablets_restored: u32,
    pub failure: Option<RestorationFailure>,
}

impl From<&RestorationJob> for RestorationInfo {
    fn from(job: &RestorationJob) -> Self {
        Self {
            id: job.id.clone(),
            schedule_id: job.schedule_id.clone(),
            restoration_time_utc: format_utc(job.target_timestamp),
            state: job.state.to_string(),
            base_snapshot_id: job.base_snapshot.snapshot_id.clone(),
            base_snapshot_time_utc: format_utc(job.base_snapshot.snapshot_time),
            created_at_utc: format_utc(job.created_at),
            completed_at_utc: job.completed_at.map(format_utc),
            tablets_total: job.tablets_total,
            tablets_restored: job.tablets_restored,
            failure: job.failure.clone(),
        }
    }
}

/// Entry point for every admin operation, shared by the HTTP API and tests
#[derive(Clone)]
pub struct AdminService {
    registry: Arc<SnapshotScheduleRegistry>,
    scheduler: Arc<SnapshotScheduler>,
    orchestrator: RestorationOrchestrator,
}

impl AdminService {
    pub fn new(
        registry: Arc<SnapshotScheduleRegistry>,
        scheduler: Arc<SnapshotScheduler>,
        orchestrator: RestorationOrchestrator,
    ) -> Self {
        Self {
            registry,
            scheduler,
            orchestrator,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_schedule(&self, request: CreateScheduleRequest) -> Result<ScheduleInfo> {
        let spec = ScheduleSpec::from_minutes(
            request.interval_minutes,
            request.retention_minutes,
            &request.targets,
        )?;
        self.scheduler.resolve_targets(&spec.targets).await?;
        let schedule = self.registry.create_schedule(spec).await?;

        self.scheduler.register(&schedule.id).await?;

        info!(
            "Created schedule {} every {:.3} min for {:?}",
            schedule.id, request.interval_minutes, request.targets
        );
        Ok(ScheduleInfo::from(&schedule))
    }

    #[instrument(skip(self))]
    pub async fn delete_schedule(&self, schedule_id: &str) -> Result<()> {
        self.registry.delete_schedule(schedule_id).await?;
        self.scheduler.unregister(schedule_id).await;
        Ok(())
    }

    pub async fn list_schedules(&self, schedule_id: Option<&str>) -> Result<Vec<ScheduleInfo>> {
        Ok(self
            .registry
            .list_schedules(schedule_id)
            .await?
            .iter()
            .map(ScheduleInfo::from)
            .collect())
    }

    pub async fn schedule_snapshots(&self, schedule_id: &str) -> Result<Vec<SnapshotInfo>> {
        let schedule = self.registry.get_schedule(schedule_id).await?;
        Ok(schedule.snapshots.iter().map(SnapshotInfo::from).collect())
    }

    pub async fn restore(&self, schedule_id: &str, target: DateTime<Utc>) -> Result<RestorationInfo> {
        let job = self.orchestrator.restore(schedule_id, target).await?;
        Ok(RestorationInfo::from(&job))
    }

    pub async fn list_restorations(&self, restoration_id: Option<&str>) -> Result<Vec<RestorationInfo>> {
        Ok(self
            .orchestrator
            .list_restorations(restoration_id)
            .await?
            .iter()
            .map(RestorationInfo::from)
            .collect())
    }

    pub async fn wait_for_restoration(&self, restoration_id: &str, timeout: Duration) -> Result<RestorationInfo> {
        let job = self
            .orchestrator
            .wait_for_terminal(restoration_id, timeout)
            .await?;
        Ok(RestorationInfo::from(&job))
    }
}
