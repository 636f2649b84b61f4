//! Snapshot schedule and snapshot record operations.

use anyhow::Result;
use sqlx::Row;
use std::collections::HashMap;
use tracing::debug;

use super::{duration_from_micros, duration_to_micros, timestamp_from_micros, Database};
use crate::clock::to_micros;
use crate::snapshot::{SnapshotRecord, SnapshotSchedule, SnapshotState, TargetObject};

impl Database {
    /// Persist schedule configuration; the snapshot history is stored separately
    pub async fn store_schedule(&self, schedule: &SnapshotSchedule) -> Result<()> {
        debug!("Storing snapshot schedule: {}", schedule.id);

        let targets = serde_json::to_string(&schedule.targets)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO snapshot_schedules (
                id, interval_micros, retention_micros, targets, created_at
            ) VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&schedule.id)
        .bind(duration_to_micros(schedule.interval)?)
        .bind(duration_to_micros(schedule.retention)?)
        .bind(targets)
        .bind(to_micros(schedule.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove a schedule together with its whole snapshot history
    pub async fn delete_schedule(&self, schedule_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM snapshot_records WHERE schedule_id = ?")
            .bind(schedule_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM snapshot_schedules WHERE id = ?")
            .bind(schedule_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!("Deleted snapshot schedule {} and its records", schedule_id);
        Ok(())
    }

    pub async fn store_snapshot_record(&self, record: &SnapshotRecord) -> Result<()> {
        debug!(
            "Storing snapshot record {} ({}) for schedule {}",
            record.id, record.state, record.schedule_id
        );

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO snapshot_records (
                id, schedule_id, snapshot_time, previous_snapshot_time,
                state, completed_at, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.schedule_id)
        .bind(to_micros(record.snapshot_time))
        .bind(record.previous_snapshot_time.map(to_micros))
        .bind(record.state.as_str())
        .bind(record.completed_at.map(to_micros))
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_snapshot_records(&self, record_ids: &[String]) -> Result<()> {
        if record_ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for id in record_ids {
            sqlx::query("DELETE FROM snapshot_records WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!("Deleted {} snapshot records", record_ids.len());
        Ok(())
    }

    /// Load every schedule with its snapshot history in ascending time order
    pub async fn load_schedules(&self) -> Result<Vec<SnapshotSchedule>> {
        let rows = sqlx::query(
            r#"
            SELECT id, interval_micros, retention_micros, targets, created_at
            FROM snapshot_schedules
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut history = self.load_snapshot_records().await?;
        let mut schedules = Vec::with_capacity(rows.len());

        for row in rows {
            let id: String = row.try_get("id")?;
            let targets: String = row.try_get("targets")?;
            let targets: Vec<TargetObject> = serde_json::from_str(&targets)
                .map_err(|e| anyhow::anyhow!("Corrupt targets for schedule {}: {}", id, e))?;

            schedules.push(SnapshotSchedule {
                interval: duration_from_micros(row.try_get("interval_micros")?)?,
                retention: duration_from_micros(row.try_get("retention_micros")?)?,
                targets,
                created_at: timestamp_from_micros("created_at", row.try_get("created_at")?)?,
                snapshots: history.remove(&id).unwrap_or_default(),
                id,
            });
        }

        Ok(schedules)
    }

    async fn load_snapshot_records(&self) -> Result<HashMap<String, Vec<SnapshotRecord>>> {
        let rows = sqlx::query(
            r#"
            SELECT id, schedule_id, snapshot_time, previous_snapshot_time,
                   state, completed_at, error_message
            FROM snapshot_records
            ORDER BY schedule_id ASC, snapshot_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_schedule: HashMap<String, Vec<SnapshotRecord>> = HashMap::new();
        for row in rows {
            let state: String = row.try_get("state")?;
            let previous: Option<i64> = row.try_get("previous_snapshot_time")?;
            let completed: Option<i64> = row.try_get("completed_at")?;

            let record = SnapshotRecord {
                id: row.try_get("id")?,
                schedule_id: row.try_get("schedule_id")?,
                snapshot_time: timestamp_from_micros(
                    "snapshot_time",
                    row.try_get("snapshot_time")?,
                )?,
                previous_snapshot_time: previous
                    .map(|p| timestamp_from_micros("previous_snapshot_time", p))
                    .transpose()?,
                state: state.parse::<SnapshotState>()?,
                completed_at: completed
                    .map(|c| timestamp_from_micros("completed_at", c))
                    .transpose()?,
                error_message: row.try_get("error_message")?,
            };
            by_schedule
                .entry(record.schedule_id.clone())
                .or_default()
                .push(record);
        }

        Ok(by_schedule)
    }
}
