//! Scheduler and orchestrator driving mock tablet-server agents over HTTP

mod common;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use common::fixtures::test_cluster::test_retry_policy;
use common::fixtures::*;
use snapshot_master::config::SchedulerSettings;
use snapshot_master::restoration::RestorationState;
use snapshot_master::scheduler::TickOutcome;
use snapshot_master::snapshot::{ScheduleSpec, SnapshotRecord, SnapshotState, TargetObject};
use snapshot_master::{
    Clock, ConfigManager, Database, HttpTabletExecutor, ManualClock, RestorationOrchestrator,
    RestorationStore, RestorationTracker, SnapshotScheduleRegistry, SnapshotScheduler,
};

struct HttpCluster {
    clock: Arc<ManualClock>,
    registry: Arc<SnapshotScheduleRegistry>,
    scheduler: SnapshotScheduler,
    orchestrator: RestorationOrchestrator,
    schedule_id: String,
    _config: TestConfig,
}

async fn http_cluster(agent: &MockAgentServer) -> HttpCluster {
    let test_config = TestConfigBuilder::new()
        .with_main_config(|m| m.executor("http"))
        .with_server("ts-1", |s| {
            s.agent(&agent.host(), agent.port())
                .table(TEST_TABLE_QUALIFIED, &["tablet-a", "tablet-b"])
        })
        .build();
    let config = ConfigManager::new(test_config.dir())
        .await
        .unwrap()
        .get_current_config();

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let database = Arc::new(Database::new(":memory:").await.unwrap());
    let executor = Arc::new(HttpTabletExecutor::new(config));
    let tracker = RestorationTracker::new();
    let registry = Arc::new(SnapshotScheduleRegistry::new(
        database.clone(),
        tracker.clone(),
        clock.clone(),
    ));
    let store = Arc::new(RestorationStore::new(database, tracker));

    let scheduler = SnapshotScheduler::new(
        registry.clone(),
        executor.clone(),
        test_retry_policy(),
        clock.clone(),
        SchedulerSettings::default(),
    );
    let orchestrator = RestorationOrchestrator::new(
        registry.clone(),
        store,
        executor,
        test_retry_policy(),
        clock.clone(),
    );

    let spec = ScheduleSpec::new(
        Duration::from_secs(INTERVAL_SECS),
        Duration::from_secs(RETENTION_SECS),
        vec![TargetObject::table(TEST_NAMESPACE, TEST_TABLE)],
    )
    .unwrap();
    let schedule_id = registry.create_schedule(spec).await.unwrap().id;

    HttpCluster {
        clock,
        registry,
        scheduler,
        orchestrator,
        schedule_id,
        _config: test_config,
    }
}

#[tokio::test]
async fn test_snapshot_and_restore_over_http() {
    let agent = MockAgentServer::start().await;
    agent.mock_snapshot_create_success("job-1").await;
    agent.mock_snapshot_restore_success().await;
    let cluster = http_cluster(&agent).await;

    let record = match cluster.scheduler.tick(&cluster.schedule_id).await.unwrap() {
        TickOutcome::Completed(record) => record,
        other => panic!("expected complete snapshot, got {:?}", other),
    };

    let job = cluster
        .orchestrator
        .restore(&cluster.schedule_id, record.snapshot_time)
        .await
        .unwrap();
    let done = cluster
        .orchestrator
        .wait_for_terminal(&job.id, WAIT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(done.state, RestorationState::Restored);
    assert_eq!(done.tablets_restored, 2);

    let creates = agent
        .server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/tablet/snapshot/create")
        .count();
    assert_eq!(creates, 2);
}

#[tokio::test]
async fn test_unavailable_agent_fails_snapshot_after_retries() {
    let agent = MockAgentServer::start().await;
    agent.mock_unavailable().await;
    let cluster = http_cluster(&agent).await;

    let failed = match cluster.scheduler.tick(&cluster.schedule_id).await.unwrap() {
        TickOutcome::Failed(record) => record,
        other => panic!("expected failed snapshot, got {:?}", other),
    };
    let message = failed.error_message.unwrap();
    assert!(message.contains("after 3 attempts"), "{}", message);
    assert!(message.contains("503"), "{}", message);
}

#[tokio::test]
async fn test_rejected_restore_fails_without_retrying() {
    let agent = MockAgentServer::start().await;
    agent.mock_snapshot_create_success("job-2").await;
    agent.mock_snapshot_restore_rejected("base snapshot corrupted").await;
    let cluster = http_cluster(&agent).await;

    cluster.scheduler.tick(&cluster.schedule_id).await.unwrap();
    let job = cluster
        .orchestrator
        .restore(&cluster.schedule_id, cluster.clock.now())
        .await
        .unwrap();
    let done = cluster
        .orchestrator
        .wait_for_terminal(&job.id, WAIT_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(done.state, RestorationState::Failed);
    let failure = done.failure.unwrap();
    assert_eq!(failure.attempts, 1);
    assert_eq!(failure.reason, "base snapshot corrupted");
}

#[tokio::test]
async fn test_recovery_asks_agents_for_snapshot_status() {
    let agent = MockAgentServer::start().await;
    agent.mock_snapshot_status("complete").await;
    let cluster = http_cluster(&agent).await;

    let record = SnapshotRecord::creating(&cluster.schedule_id, cluster.clock.now(), None);
    let record = cluster
        .registry
        .append_snapshot(&cluster.schedule_id, record)
        .await
        .unwrap();

    let report = cluster.scheduler.recover_in_flight().await.unwrap();
    assert_eq!(report.completed, 1);

    let schedule = cluster.registry.get_schedule(&cluster.schedule_id).await.unwrap();
    assert_eq!(schedule.snapshot(&record.id).unwrap().state, SnapshotState::Complete);
}
