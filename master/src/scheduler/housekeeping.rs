use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, instrument, warn};

use crate::clock::{format_utc, Clock};
use crate::config::HousekeepingSettings;
use crate::restoration::RestorationStore;

/// Cron-driven cleanup of finished restorations
pub struct Housekeeper {
    store: Arc<RestorationStore>,
    clock: Arc<dyn Clock>,
    settings: HousekeepingSettings,
    scheduler: Mutex<JobScheduler>,
}

impl Housekeeper {
    pub async fn new(
        store: Arc<RestorationStore>,
        clock: Arc<dyn Clock>,
        settings: HousekeepingSettings,
    ) -> Result<Self> {
        if settings.restoration_retention_hours <= 0 {
            return Err(anyhow!(
                "restoration_retention_hours must be positive, got {}",
                settings.restoration_retention_hours
            ));
        }
        validate_6_field_cron(&settings.schedule)
            .map_err(|e| anyhow!("Invalid 6-field cron schedule '{}': {}", settings.schedule, e))?;

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| anyhow!("Failed to create JobScheduler: {}", e))?;

        Ok(Self {
            store,
            clock,
            settings,
            scheduler: Mutex::new(scheduler),
        })
    }

    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        if !self.settings.enabled {
            info!("Housekeeping disabled, skipping schedule");
            return Ok(());
        }

        let store = self.store.clone();
        let clock = self.clock.clone();
        let retention_hours = self.settings.restoration_retention_hours;

        let job = Job::new_async(self.settings.schedule.as_str(), move |_uuid, _scheduler| {
            let store = store.clone();
            let clock = clock.clone();

            Box::pin(async move {
                if let Err(e) = purge(&store, clock.as_ref(), retention_hours).await {
                    error!("Scheduled restoration cleanup failed: {}", e);
                }
            })
        })
        .map_err(|e| anyhow!("Failed to create housekeeping job for '{}': {}", self.settings.schedule, e))?;

        let scheduler = self.scheduler.lock().await;
        scheduler
            .add(job)
            .await
            .map_err(|e| anyhow!("Failed to add housekeeping job to scheduler: {}", e))?;
        scheduler
            .start()
            .await
            .map_err(|e| anyhow!("Failed to start housekeeping scheduler: {}", e))?;

        info!(
            "Housekeeping scheduled '{}', keeping finished restorations for {}h",
            self.settings.schedule, retention_hours
        );
        Ok(())
    }

    /// Purge once, outside the cron schedule
    pub async fn run_once(&self) -> Result<usize> {
        purge(&self.store, self.clock.as_ref(), self.settings.restoration_retention_hours).await
    }

    pub async fn shutdown(&self) {
        if let Err(e) = self.scheduler.lock().await.shutdown().await {
            warn!("Housekeeping scheduler did not shut down cleanly: {}", e);
        }
    }
}

async fn purge(store: &RestorationStore, clock: &dyn Clock, retention_hours: i64) -> Result<usize> {
    let cutoff = clock.now() - chrono::Duration::hours(retention_hours);
    let purged = store.purge_terminal_older_than(cutoff).await?;
    if purged > 0 {
        info!(
            "Purged {} restorations finished before {}",
            purged,
            format_utc(cutoff)
        );
    }
    Ok(purged)
}

/// tokio-cron-scheduler takes `second minute hour day month dayofweek`
pub fn validate_6_field_cron(schedule: &str) -> Result<()> {
    let parts: Vec<&str> = schedule.split_whitespace().collect();

    if parts.len() != 6 {
        return Err(anyhow!(
            "tokio-cron-scheduler requires exactly 6 fields: second minute hour day month dayofweek. Got {} fields: '{}'",
            parts.len(),
            schedule
        ));
    }

    validate_cron_field(parts[0], "second", 0, 59)?;
    validate_cron_field(parts[1], "minute", 0, 59)?;
    validate_cron_field(parts[2], "hour", 0, 23)?;
    validate_cron_field(parts[3], "day", 1, 31)?;
    validate_cron_field(parts[4], "month", 1, 12)?;
    validate_cron_field(parts[5], "dayofweek", 0, 7)?;

    Ok(())
}

fn validate_cron_field(field: &str, name: &str, min: u32, max: u32) -> Result<()> {
    if field == "*" || field == "?" {
        return Ok(());
    }

    let parse = |value: &str, what: &str| -> Result<u32> {
        let parsed = value
            .parse::<u32>()
            .map_err(|_| anyhow!("Invalid {} {}: {}", name, what, value))?;
        if parsed < min || parsed > max {
            return Err(anyhow!(
                "{} value {} is outside valid range {}-{}",
                name,
                parsed,
                min,
                max
            ));
        }
        Ok(parsed)
    };

    if let Some(step_str) = field.strip_prefix("*/") {
        let step = step_str
            .parse::<u32>()
            .map_err(|_| anyhow!("Invalid {} step value: {}", name, step_str))?;
        if step == 0 {
            return Err(anyhow!("{} step value cannot be 0", name));
        }
        return Ok(());
    }

    if field.contains(',') {
        for part in field.split(',') {
            parse(part, "value in list")?;
        }
        return Ok(());
    }

    if let Some((start, end)) = field.split_once('-') {
        let start = parse(start, "range start")?;
        let end = parse(end, "range end")?;
        if start > end {
            return Err(anyhow!("{} range {}-{} is reversed", name, start, end));
        }
        return Ok(());
    }

    parse(field, "value").map(|_| ())
}
