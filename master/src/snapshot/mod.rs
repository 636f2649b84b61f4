//! Snapshot schedule data model
//!
//! A schedule owns an ordered history of snapshot records. Each record links to
//! the previous complete record through `previous_snapshot_time`, which is what
//! lets a restoration replay forward from any retained base.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{Result, ScheduleError};

/// A namespace, or a single table inside a namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetObject {
    pub namespace: String,
    pub table: Option<String>,
}

impl TargetObject {
    pub fn namespace(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            table: None,
        }
    }

    pub fn table(namespace: &str, table: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            table: Some(table.to_string()),
        }
    }

    /// Whether `namespace.table` falls under this target
    pub fn covers(&self, namespace: &str, table: &str) -> bool {
        self.namespace == namespace && self.table.as_deref().is_none_or(|t| t == table)
    }
}

impl fmt::Display for TargetObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", self.namespace, table),
            None => write!(f, "{}", self.namespace),
        }
    }
}

impl FromStr for TargetObject {
    type Err = ScheduleError;

    /// Accepts `namespace` or `namespace.table`. A leading `ysql`/`ycql`
    /// qualifier belongs to the namespace, so `ysql.db` is a namespace and
    /// `ysql.db.table` a table inside it.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidTarget {
            target: s.to_string(),
        };
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(invalid());
        }

        let ns_len = if parts.len() > 1 && matches!(parts[0], "ysql" | "ycql") {
            2
        } else {
            1
        };
        let namespace = parts[..ns_len].join(".");
        match &parts[ns_len..] {
            [] => Ok(Self::namespace(&namespace)),
            [table] => Ok(Self::table(&namespace, table)),
            _ => Err(invalid()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotState {
    Creating,
    Complete,
    Failed,
}

impl SnapshotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotState::Creating => "CREATING",
            SnapshotState::Complete => "COMPLETE",
            SnapshotState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SnapshotState::Creating)
    }
}

impl fmt::Display for SnapshotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "CREATING" => Ok(SnapshotState::Creating),
            "COMPLETE" => Ok(SnapshotState::Complete),
            "FAILED" => Ok(SnapshotState::Failed),
            other => Err(anyhow::anyhow!("Unknown snapshot state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub schedule_id: String,
    pub snapshot_time: DateTime<Utc>,
    pub previous_snapshot_time: Option<DateTime<Utc>>,
    pub state: SnapshotState,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl SnapshotRecord {
    pub fn creating(
        schedule_id: &str,
        snapshot_time: DateTime<Utc>,
        previous_snapshot_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            schedule_id: schedule_id.to_string(),
            snapshot_time,
            previous_snapshot_time,
            state: SnapshotState::Creating,
            completed_at: None,
            error_message: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == SnapshotState::Complete
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSchedule {
    pub id: String,
    pub interval: Duration,
    pub retention: Duration,
    pub targets: Vec<TargetObject>,
    pub created_at: DateTime<Utc>,
    /// Ascending by `snapshot_time`
    pub snapshots: Vec<SnapshotRecord>,
}

impl SnapshotSchedule {
    pub fn last_snapshot(&self) -> Option<&SnapshotRecord> {
        self.snapshots.last()
    }

    pub fn last_complete(&self) -> Option<&SnapshotRecord> {
        self.snapshots.iter().rev().find(|s| s.is_complete())
    }

    pub fn earliest_complete(&self) -> Option<&SnapshotRecord> {
        self.snapshots.iter().find(|s| s.is_complete())
    }

    /// Latest complete record at or before `target`
    pub fn restoration_base(&self, target: DateTime<Utc>) -> Option<&SnapshotRecord> {
        self.snapshots
            .iter()
            .rev()
            .find(|s| s.is_complete() && s.snapshot_time <= target)
    }

    pub fn snapshot(&self, snapshot_id: &str) -> Option<&SnapshotRecord> {
        self.snapshots.iter().find(|s| s.id == snapshot_id)
    }

    pub fn has_creating(&self) -> bool {
        self.snapshots
            .iter()
            .any(|s| s.state == SnapshotState::Creating)
    }

    /// Check the ordering and `previous_snapshot_time` links of the history.
    ///
    /// Pruning can remove a record's predecessor: the first retained record,
    /// or a record following a base kept alive by a restoration. A link to a
    /// time that is no longer retained is accepted when it falls between the
    /// last retained complete record and the record itself.
    pub fn verify_chain(&self) -> Result<()> {
        let retained: HashSet<DateTime<Utc>> =
            self.snapshots.iter().map(|s| s.snapshot_time).collect();
        let mut last_time: Option<DateTime<Utc>> = None;
        let mut last_complete: Option<DateTime<Utc>> = None;

        for record in &self.snapshots {
            if let Some(prev) = last_time {
                if record.snapshot_time <= prev {
                    return Err(ScheduleError::ChainBroken {
                        schedule_id: self.id.clone(),
                        reason: format!(
                            "snapshot {} at {} does not follow {}",
                            record.id, record.snapshot_time, prev
                        ),
                    }
                    .into());
                }
            }
            let linked = match (last_complete, record.previous_snapshot_time) {
                (None, _) => true,
                (Some(expected), Some(prev)) if prev == expected => true,
                (Some(expected), Some(prev)) => {
                    prev > expected && prev < record.snapshot_time && !retained.contains(&prev)
                }
                (Some(_), None) => false,
            };
            if !linked {
                return Err(ScheduleError::ChainBroken {
                    schedule_id: self.id.clone(),
                    reason: format!(
                        "snapshot {} links to {:?}, expected {:?}",
                        record.id, record.previous_snapshot_time, last_complete
                    ),
                }
                .into());
            }
            last_time = Some(record.snapshot_time);
            if record.is_complete() {
                last_complete = Some(record.snapshot_time);
            }
        }
        Ok(())
    }
}

/// Parse a fractional number of minutes, the unit used for interval and
/// retention. Rounded to whole microseconds, the resolution of stored times.
pub fn duration_from_minutes(field: &str, minutes: f64) -> Result<Duration> {
    let micros = (minutes * 60_000_000.0).round();
    if !micros.is_finite() || micros < 1.0 {
        return Err(ScheduleError::InvalidInterval {
            reason: format!("{} must be a positive number of minutes, got {}", field, minutes),
        }
        .into());
    }
    if micros > i64::MAX as f64 {
        return Err(ScheduleError::InvalidInterval {
            reason: format!("{} of {} minutes is out of range", field, minutes),
        }
        .into());
    }
    Ok(Duration::from_micros(micros as u64))
}

/// Validated input to schedule creation
#[derive(Debug, Clone)]
pub struct ScheduleSpec {
    pub interval: Duration,
    pub retention: Duration,
    pub targets: Vec<TargetObject>,
}

impl ScheduleSpec {
    pub fn new(interval: Duration, retention: Duration, targets: Vec<TargetObject>) -> Result<Self> {
        if interval.is_zero() {
            return Err(ScheduleError::InvalidInterval {
                reason: "interval must be greater than zero".to_string(),
            }
            .into());
        }
        if retention < interval {
            return Err(ScheduleError::InvalidRetention {
                retention_ms: retention.as_millis(),
                interval_ms: interval.as_millis(),
            }
            .into());
        }
        if targets.is_empty() {
            return Err(ScheduleError::NoTargets.into());
        }

        let mut targets = targets;
        targets.sort();
        targets.dedup();

        Ok(Self {
            interval,
            retention,
            targets,
        })
    }

    pub fn from_minutes(
        interval_minutes: f64,
        retention_minutes: f64,
        targets: &[String],
    ) -> Result<Self> {
        let interval = duration_from_minutes("interval", interval_minutes)?;
        let retention = duration_from_minutes("retention", retention_minutes)?;
        let targets = targets
            .iter()
            .map(|t| t.parse::<TargetObject>().map_err(Into::into))
            .collect::<Result<Vec<_>>>()?;
        Self::new(interval, retention, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn record(schedule: &str, secs: i64, prev: Option<i64>, state: SnapshotState) -> SnapshotRecord {
        let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let mut r = SnapshotRecord::creating(
            schedule,
            base + chrono::Duration::seconds(secs),
            prev.map(|p| base + chrono::Duration::seconds(p)),
        );
        r.state = state;
        r
    }

    fn schedule_with(snapshots: Vec<SnapshotRecord>) -> SnapshotSchedule {
        SnapshotSchedule {
            id: "s1".to_string(),
            interval: Duration::from_secs(6),
            retention: Duration::from_secs(600),
            targets: vec![TargetObject::table("ks", "test_table")],
            created_at: Utc::now(),
            snapshots,
        }
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!(
            "ks.test_table".parse::<TargetObject>().unwrap(),
            TargetObject::table("ks", "test_table")
        );
        assert_eq!(
            "ysql.ybtest".parse::<TargetObject>().unwrap(),
            TargetObject::namespace("ysql.ybtest")
        );
        assert_eq!(
            "ysql.ybtest.test_table".parse::<TargetObject>().unwrap(),
            TargetObject::table("ysql.ybtest", "test_table")
        );
        assert!("a.b.c".parse::<TargetObject>().is_err());
        assert_eq!("ks".parse::<TargetObject>().unwrap(), TargetObject::namespace("ks"));
        assert!("ks..t".parse::<TargetObject>().is_err());
        assert!("".parse::<TargetObject>().is_err());
    }

    #[test]
    fn test_namespace_target_covers_tables() {
        let ns = TargetObject::namespace("ks");
        assert!(ns.covers("ks", "a"));
        assert!(!ns.covers("other", "a"));
        let table = TargetObject::table("ks", "a");
        assert!(table.covers("ks", "a"));
        assert!(!table.covers("ks", "b"));
    }

    #[test]
    fn test_spec_validation() {
        let targets = vec!["ks.t".to_string()];
        let spec = ScheduleSpec::from_minutes(0.1, 10.0, &targets).unwrap();
        assert_eq!(spec.interval, Duration::from_secs(6));
        assert_eq!(spec.retention, Duration::from_secs(600));

        let err = ScheduleSpec::from_minutes(0.0, 10.0, &targets).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = ScheduleSpec::from_minutes(5.0, 1.0, &targets).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = ScheduleSpec::from_minutes(0.1, 10.0, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_restoration_base_skips_failed() {
        let schedule = schedule_with(vec![
            record("s1", 0, None, SnapshotState::Complete),
            record("s1", 6, Some(0), SnapshotState::Failed),
            record("s1", 12, Some(0), SnapshotState::Complete),
        ]);
        let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();

        let chosen = schedule
            .restoration_base(base + chrono::Duration::seconds(8))
            .unwrap();
        assert_eq!(chosen.snapshot_time, base);

        let chosen = schedule
            .restoration_base(base + chrono::Duration::seconds(12))
            .unwrap();
        assert_eq!(chosen.snapshot_time, base + chrono::Duration::seconds(12));

        assert!(schedule
            .restoration_base(base - chrono::Duration::seconds(1))
            .is_none());
        assert!(schedule.verify_chain().is_ok());
    }

    #[test]
    fn test_verify_chain_detects_wrong_link() {
        let schedule = schedule_with(vec![
            record("s1", 0, None, SnapshotState::Complete),
            record("s1", 6, Some(0), SnapshotState::Failed),
            record("s1", 12, Some(6), SnapshotState::Complete),
        ]);
        let err = schedule.verify_chain().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn test_verify_chain_accepts_gap_after_pinned_base() {
        // 6 and 12 were pruned while 0 stayed pinned
        let schedule = schedule_with(vec![
            record("s1", 0, None, SnapshotState::Complete),
            record("s1", 18, Some(12), SnapshotState::Complete),
            record("s1", 24, Some(18), SnapshotState::Complete),
        ]);
        assert!(schedule.verify_chain().is_ok());

        let unlinked = schedule_with(vec![
            record("s1", 0, None, SnapshotState::Complete),
            record("s1", 18, None, SnapshotState::Complete),
        ]);
        assert!(unlinked.verify_chain().is_err());
    }
}
