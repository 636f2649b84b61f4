use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use snapshot_master::config::{Config, ExecutorKind};
use snapshot_master::constants::web::CONFIG_DIR;
use snapshot_master::web::{start_web_server, AppState};
use snapshot_master::{
    AdminService, Clock, ConfigManager, Database, Housekeeper, HttpTabletExecutor,
    MemoryTabletExecutor, RestorationOrchestrator, RestorationStore, RestorationTracker,
    SnapshotScheduleRegistry, SnapshotScheduler, SystemClock, TabletExecutor,
};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive("snapshot_master=info".parse()?)
        .add_directive("tower_http=warn".parse()?)
        .add_directive("tokio_cron_scheduler=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("sqlx=warn".parse()?);

    fmt().with_env_filter(env_filter).init();

    info!("Starting snapshot master");

    let config_dir = std::env::args().nth(1).unwrap_or_else(|| CONFIG_DIR.to_string());
    let config_manager = ConfigManager::new(config_dir).await?;
    let config = config_manager.get_current_config();
    info!(
        "Configuration loaded: {} tablet servers, {} tables, {:?} executor",
        config.servers.len(),
        config.tables.len(),
        config.executor
    );

    let database = Arc::new(Database::new(&config.database_path).await?);
    info!("Database initialized at {}", config.database_path);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let executor = build_executor(&config, clock.clone()).await;
    let tracker = RestorationTracker::new();

    let registry = Arc::new(SnapshotScheduleRegistry::new(
        database.clone(),
        tracker.clone(),
        clock.clone(),
    ));
    let store = Arc::new(RestorationStore::new(database.clone(), tracker.clone()));
    registry.load().await?;
    store.load().await?;

    let scheduler = Arc::new(SnapshotScheduler::new(
        registry.clone(),
        executor.clone(),
        config.retry.clone(),
        clock.clone(),
        config.scheduler.clone(),
    ));
    let orchestrator = RestorationOrchestrator::new(
        registry.clone(),
        store.clone(),
        executor,
        config.retry.clone(),
        clock.clone(),
    );

    // Settle work interrupted by the previous shutdown before new ticks run
    let recovered = scheduler.recover_in_flight().await?;
    if recovered.completed + recovered.failed > 0 {
        info!(
            "Recovered in-flight snapshots: {} complete, {} failed",
            recovered.completed, recovered.failed
        );
    }
    let resumed = orchestrator.resume_in_flight().await?;
    if resumed > 0 {
        info!("Resumed {} in-flight restorations", resumed);
    }

    scheduler.start_all().await?;

    let housekeeper = match Housekeeper::new(store.clone(), clock.clone(), config.housekeeping.clone()).await {
        Ok(housekeeper) => {
            if let Err(e) = housekeeper.start().await {
                error!("Failed to start housekeeping: {}", e);
            }
            Some(housekeeper)
        }
        Err(e) => {
            warn!("Housekeeping not started: {}", e);
            None
        }
    };

    let admin_service = Arc::new(AdminService::new(registry, scheduler.clone(), orchestrator));
    let state = AppState::new(config.clone(), admin_service, tracker);

    info!("Starting web server on {}:{}", config.host, config.port);
    let served = start_web_server(state, shutdown_signal()).await;

    scheduler.stop().await;
    if let Some(housekeeper) = housekeeper {
        housekeeper.shutdown().await;
    }
    info!("Snapshot master stopped");
    served
}

async fn build_executor(config: &Arc<Config>, clock: Arc<dyn Clock>) -> Arc<dyn TabletExecutor> {
    match config.executor {
        ExecutorKind::Http => {
            info!("Using HTTP tablet executor");
            Arc::new(HttpTabletExecutor::new(config.clone()))
        }
        ExecutorKind::Memory => {
            let executor = MemoryTabletExecutor::new(clock);
            for (table, placements) in &config.tables {
                let tablet_ids = placements.iter().map(|p| p.tablet_id.clone()).collect();
                executor.register_table(table, tablet_ids).await;
            }
            warn!("Using in-memory tablet executor; tablet data is not durable");
            Arc::new(executor)
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
