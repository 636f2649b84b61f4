//! Restoration job operations.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;

use super::{timestamp_from_micros, Database};
use crate::clock::to_micros;
use crate::restoration::{
    BaseSnapshotRef, RestorationFailure, RestorationJob, RestorationState,
};

impl Database {
    pub async fn store_restoration(&self, job: &RestorationJob) -> Result<()> {
        debug!("Storing restoration {} ({})", job.id, job.state);

        let failure = job.failure.as_ref();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO restorations (
                id, schedule_id, target_timestamp, state,
                base_snapshot_id, base_snapshot_time, created_at, completed_at,
                tablets_total, tablets_restored,
                failed_step, failed_tablet, failed_attempts, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.schedule_id)
        .bind(to_micros(job.target_timestamp))
        .bind(job.state.as_str())
        .bind(&job.base_snapshot.snapshot_id)
        .bind(to_micros(job.base_snapshot.snapshot_time))
        .bind(to_micros(job.created_at))
        .bind(job.completed_at.map(to_micros))
        .bind(i64::from(job.tablets_total))
        .bind(i64::from(job.tablets_restored))
        .bind(failure.map(|f| f.step.clone()))
        .bind(failure.and_then(|f| f.tablet_id.clone()))
        .bind(failure.map(|f| i64::from(f.attempts)))
        .bind(failure.map(|f| f.reason.clone()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn load_restorations(&self) -> Result<Vec<RestorationJob>> {
        let rows = sqlx::query(
            r#"
            SELECT id, schedule_id, target_timestamp, state,
                   base_snapshot_id, base_snapshot_time, created_at, completed_at,
                   tablets_total, tablets_restored,
                   failed_step, failed_tablet, failed_attempts, error_message
            FROM restorations
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let state: String = row.try_get("state")?;
            let completed: Option<i64> = row.try_get("completed_at")?;
            let failed_step: Option<String> = row.try_get("failed_step")?;
            let failed_attempts: Option<i64> = row.try_get("failed_attempts")?;
            let tablets_total: i64 = row.try_get("tablets_total")?;
            let tablets_restored: i64 = row.try_get("tablets_restored")?;

            let failure = match failed_step {
                Some(step) => Some(RestorationFailure {
                    step,
                    tablet_id: row.try_get("failed_tablet")?,
                    attempts: u32::try_from(failed_attempts.unwrap_or(0)).unwrap_or(0),
                    reason: row
                        .try_get::<Option<String>, _>("error_message")?
                        .unwrap_or_default(),
                }),
                None => None,
            };

            jobs.push(RestorationJob {
                id: row.try_get("id")?,
                schedule_id: row.try_get("schedule_id")?,
                target_timestamp: timestamp_from_micros(
                    "target_timestamp",
                    row.try_get("target_timestamp")?,
                )?,
                state: state.parse::<RestorationState>()?,
                base_snapshot: BaseSnapshotRef {
                    snapshot_id: row.try_get("base_snapshot_id")?,
                    snapshot_time: timestamp_from_micros(
                        "base_snapshot_time",
                        row.try_get("base_snapshot_time")?,
                    )?,
                },
                created_at: timestamp_from_micros("created_at", row.try_get("created_at")?)?,
                completed_at: completed
                    .map(|c| timestamp_from_micros("completed_at", c))
                    .transpose()?,
                tablets_total: u32::try_from(tablets_total).unwrap_or(0),
                tablets_restored: u32::try_from(tablets_restored).unwrap_or(0),
                failure,
            });
        }

        Ok(jobs)
    }

    /// Drop terminal restorations that finished before `cutoff`
    pub async fn delete_terminal_restorations_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM restorations
            WHERE state IN ('RESTORED', 'FAILED')
            AND completed_at IS NOT NULL
            AND completed_at < ?
            "#,
        )
        .bind(to_micros(cutoff))
        .fetch_all(&self.pool)
        .await?;

        if ids.is_empty() {
            return Ok(ids);
        }

        sqlx::query(
            r#"
            DELETE FROM restorations
            WHERE state IN ('RESTORED', 'FAILED')
            AND completed_at IS NOT NULL
            AND completed_at < ?
            "#,
        )
        .bind(to_micros(cutoff))
        .execute(&self.pool)
        .await?;

        debug!("Deleted {} terminal restorations", ids.len());
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(state: RestorationState) -> RestorationJob {
        let now = crate::clock::from_micros(1_700_000_000_000_000).unwrap();
        let mut job = RestorationJob::new(
            uuid::Uuid::new_v4().to_string(),
            "schedule-1",
            now,
            BaseSnapshotRef {
                snapshot_id: "snap-1".to_string(),
                snapshot_time: now - chrono::Duration::seconds(6),
            },
            now,
        );
        job.tablets_total = 3;
        if state.is_terminal() {
            let failure = (state == RestorationState::Failed).then(|| RestorationFailure {
                step: "restore_to_image".to_string(),
                tablet_id: Some("tablet-2".to_string()),
                attempts: 4,
                reason: "unreachable".to_string(),
            });
            job.finish(state, failure, now).unwrap();
        }
        job
    }

    #[tokio::test]
    async fn test_restoration_roundtrip_with_failure_detail() {
        let db = Database::new(":memory:").await.unwrap();
        let failed = job(RestorationState::Failed);
        db.store_restoration(&failed).await.unwrap();

        let loaded = db.load_restorations().await.unwrap();
        assert_eq!(loaded, vec![failed]);
    }

    #[tokio::test]
    async fn test_purge_keeps_running_restorations() {
        let db = Database::new(":memory:").await.unwrap();
        let running = job(RestorationState::Restoring);
        let done = job(RestorationState::Restored);
        db.store_restoration(&running).await.unwrap();
        db.store_restoration(&done).await.unwrap();

        let cutoff = done.completed_at.unwrap() + chrono::Duration::seconds(1);
        let removed = db.delete_terminal_restorations_before(cutoff).await.unwrap();
        assert_eq!(removed, vec![done.id.clone()]);

        let remaining = db.load_restorations().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, running.id);
    }
}
