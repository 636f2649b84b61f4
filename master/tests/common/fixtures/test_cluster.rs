//! In-process snapshot master wired to the in-memory tablet executor

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use snapshot_master::config::SchedulerSettings;
use snapshot_master::scheduler::TickOutcome;
use snapshot_master::snapshot::{ScheduleSpec, SnapshotSchedule, TargetObject};
use snapshot_master::{
    AdminService, Clock, Database, ManualClock, MemoryTabletExecutor, RestorationOrchestrator,
    RestorationStore, RestorationTracker, RetryPolicy, SnapshotScheduleRegistry,
    SnapshotScheduler, SystemClock,
};

use super::test_data::*;

pub struct TestCluster {
    pub clock: Arc<dyn Clock>,
    manual_clock: Option<Arc<ManualClock>>,
    pub database: Arc<Database>,
    pub executor: Arc<MemoryTabletExecutor>,
    pub tracker: RestorationTracker,
    pub registry: Arc<SnapshotScheduleRegistry>,
    pub store: Arc<RestorationStore>,
    pub scheduler: Arc<SnapshotScheduler>,
    pub orchestrator: RestorationOrchestrator,
    pub admin: AdminService,
}

pub fn test_retry_policy() -> RetryPolicy {
    RetryPolicy::new(3)
        .with_initial_backoff(Duration::from_millis(1))
        .with_max_backoff(Duration::from_millis(5))
}

impl TestCluster {
    /// Cluster on a manual clock with `ks.test_table` and `other.events`
    pub async fn new() -> Self {
        let manual = Arc::new(ManualClock::new(Utc::now()));
        let database = Arc::new(Database::new(":memory:").await.expect("database"));
        let executor = Arc::new(MemoryTabletExecutor::new(manual.clone()));
        create_tables(&executor).await;
        Self::assemble(manual.clone(), Some(manual), database, executor).await
    }

    /// Cluster on the wall clock, for tests that let the timers run
    pub async fn with_system_clock() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let database = Arc::new(Database::new(":memory:").await.expect("database"));
        let executor = Arc::new(MemoryTabletExecutor::new(clock.clone()));
        create_tables(&executor).await;
        Self::assemble(clock, None, database, executor).await
    }

    async fn assemble(
        clock: Arc<dyn Clock>,
        manual_clock: Option<Arc<ManualClock>>,
        database: Arc<Database>,
        executor: Arc<MemoryTabletExecutor>,
    ) -> Self {
        let tracker = RestorationTracker::new();
        let registry = Arc::new(SnapshotScheduleRegistry::new(
            database.clone(),
            tracker.clone(),
            clock.clone(),
        ));
        let store = Arc::new(RestorationStore::new(database.clone(), tracker.clone()));
        registry.load().await.expect("load schedules");
        store.load().await.expect("load restorations");

        let scheduler = Arc::new(SnapshotScheduler::new(
            registry.clone(),
            executor.clone(),
            test_retry_policy(),
            clock.clone(),
            SchedulerSettings::default(),
        ));
        let orchestrator = RestorationOrchestrator::new(
            registry.clone(),
            store.clone(),
            executor.clone(),
            test_retry_policy(),
            clock.clone(),
        );
        let admin = AdminService::new(registry.clone(), scheduler.clone(), orchestrator.clone());

        Self {
            clock,
            manual_clock,
            database,
            executor,
            tracker,
            registry,
            store,
            scheduler,
            orchestrator,
            admin,
        }
    }

    /// A fresh master process over the same database and tablets
    pub async fn restart(&self) -> Self {
        self.scheduler.stop().await;
        Self::assemble(
            self.clock.clone(),
            self.manual_clock.clone(),
            self.database.clone(),
            self.executor.clone(),
        )
        .await
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance_secs(&self, secs: i64) -> DateTime<Utc> {
        self.manual_clock
            .as_ref()
            .expect("cluster runs on the wall clock")
            .advance(chrono::Duration::seconds(secs))
    }

    /// Registry-level schedule without a timer, driven by [`tick`](Self::tick)
    pub async fn schedule(&self, interval_secs: u64, retention_secs: u64, targets: Vec<TargetObject>) -> SnapshotSchedule {
        let spec = ScheduleSpec::new(
            Duration::from_secs(interval_secs),
            Duration::from_secs(retention_secs),
            targets,
        )
        .expect("valid schedule");
        self.registry.create_schedule(spec).await.expect("create schedule")
    }

    pub async fn test_table_schedule(&self) -> SnapshotSchedule {
        self.schedule(
            INTERVAL_SECS,
            RETENTION_SECS,
            vec![TargetObject::table(TEST_NAMESPACE, TEST_TABLE)],
        )
        .await
    }

    pub async fn tick(&self, schedule_id: &str) -> TickOutcome {
        self.scheduler.tick(schedule_id).await.expect("tick")
    }

    /// Tick once per interval, `count` times
    pub async fn tick_times(&self, schedule_id: &str, count: usize) {
        for _ in 0..count {
            let outcome = self.tick(schedule_id).await;
            assert!(
                matches!(outcome, TickOutcome::Completed(_)),
                "unexpected tick outcome {:?}",
                outcome
            );
            self.advance_secs(INTERVAL_SECS as i64);
        }
    }

    pub async fn read(&self, key: &str) -> Option<String> {
        self.executor
            .read(TEST_TABLE_QUALIFIED, key)
            .await
            .expect("read")
    }

    pub async fn write(&self, key: &str, value: &str) -> DateTime<Utc> {
        self.executor
            .write(TEST_TABLE_QUALIFIED, key, value)
            .await
            .expect("write")
    }
}

async fn create_tables(executor: &MemoryTabletExecutor) {
    executor
        .create_table(TEST_NAMESPACE, TEST_TABLE, TABLETS_PER_TABLE)
        .await;
    executor.create_table(OTHER_NAMESPACE, "events", 1).await;
}
