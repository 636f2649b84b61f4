//! Database layer for the snapshot master.
//!
//! This module provides SQLite persistence for:
//! - Snapshot schedules and their snapshot history
//! - Restoration jobs
//!
//! The module is organized into submodules:
//! - `schedules` - Schedule and snapshot record operations
//! - `restorations` - Restoration job operations
//!
//! Timestamps and durations are stored as integer microseconds so that
//! identifiers and snapshot times survive restarts bit-for-bit.

mod restorations;
mod schedules;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Expose pool for integration test queries
    #[allow(dead_code)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn new(database_path: &str) -> Result<Self> {
        info!("Initializing database at {}", database_path);

        let pool = if database_path == ":memory:" {
            // Every in-memory connection is its own database, so pin the pool to one
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await?
        } else {
            if let Some(parent) = Path::new(database_path).parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    error!("Failed to create parent directory {:?}: {}", parent, e);
                    return Err(e.into());
                }
            }

            let database_url = format!("sqlite:{}?mode=rwc", database_path);
            match SqlitePool::connect(&database_url).await {
                Ok(pool) => pool,
                Err(e) => {
                    error!("Failed to connect to database {}: {}", database_url, e);
                    return Err(e.into());
                }
            }
        };

        let database = Self { pool };
        database.initialize_tables().await?;

        info!("Database initialization completed");
        Ok(database)
    }

    async fn initialize_tables(&self) -> Result<()> {
        let schedules_table_sql = r#"
            CREATE TABLE IF NOT EXISTS snapshot_schedules (
                id TEXT PRIMARY KEY,
                interval_micros INTEGER NOT NULL,
                retention_micros INTEGER NOT NULL,
                targets TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
        "#;
        if let Err(e) = sqlx::query(schedules_table_sql).execute(&self.pool).await {
            error!("Failed to create snapshot_schedules table: {}", e);
            return Err(e.into());
        }

        let records_table_sql = r#"
            CREATE TABLE IF NOT EXISTS snapshot_records (
                id TEXT PRIMARY KEY,
                schedule_id TEXT NOT NULL,
                snapshot_time INTEGER NOT NULL,
                previous_snapshot_time INTEGER,
                state TEXT NOT NULL,
                completed_at INTEGER,
                error_message TEXT
            )
        "#;
        if let Err(e) = sqlx::query(records_table_sql).execute(&self.pool).await {
            error!("Failed to create snapshot_records table: {}", e);
            return Err(e.into());
        }

        let records_index_sql = "CREATE INDEX IF NOT EXISTS idx_snapshot_records_schedule ON snapshot_records(schedule_id, snapshot_time ASC)";
        if let Err(e) = sqlx::query(records_index_sql).execute(&self.pool).await {
            error!("Failed to create snapshot_records index: {}", e);
            return Err(e.into());
        }

        let restorations_table_sql = r#"
            CREATE TABLE IF NOT EXISTS restorations (
                id TEXT PRIMARY KEY,
                schedule_id TEXT NOT NULL,
                target_timestamp INTEGER NOT NULL,
                state TEXT NOT NULL,
                base_snapshot_id TEXT NOT NULL,
                base_snapshot_time INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                completed_at INTEGER,
                tablets_total INTEGER NOT NULL DEFAULT 0,
                tablets_restored INTEGER NOT NULL DEFAULT 0,
                failed_step TEXT,
                failed_tablet TEXT,
                failed_attempts INTEGER,
                error_message TEXT
            )
        "#;
        if let Err(e) = sqlx::query(restorations_table_sql)
            .execute(&self.pool)
            .await
        {
            error!("Failed to create restorations table: {}", e);
            return Err(e.into());
        }

        let restorations_index_sql = "CREATE INDEX IF NOT EXISTS idx_restorations_schedule ON restorations(schedule_id, created_at DESC)";
        if let Err(e) = sqlx::query(restorations_index_sql)
            .execute(&self.pool)
            .await
        {
            error!("Failed to create restorations index: {}", e);
            return Err(e.into());
        }

        info!("All database tables and indexes created");
        Ok(())
    }
}

fn duration_to_micros(d: Duration) -> Result<i64> {
    i64::try_from(d.as_micros()).map_err(|_| anyhow::anyhow!("Duration {:?} is too large to store", d))
}

fn duration_from_micros(micros: i64) -> Result<Duration> {
    u64::try_from(micros)
        .map(Duration::from_micros)
        .map_err(|_| anyhow::anyhow!("Negative duration {} in database", micros))
}

fn timestamp_from_micros(column: &str, micros: i64) -> Result<chrono::DateTime<chrono::Utc>> {
    crate::clock::from_micros(micros)
        .ok_or_else(|| anyhow::anyhow!("Timestamp {} in column {} is out of range", micros, column))
}
