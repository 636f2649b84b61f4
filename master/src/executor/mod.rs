//! Tablet operation executors
//!
//! The master never touches tablet data itself. Snapshot creation, restoration
//! and recovery checks are delegated to a [`TabletExecutor`], one call per
//! tablet, fanned out concurrently and retried under a [`RetryPolicy`].
//!
//! Two implementations ship with the crate:
//! - [`HttpTabletExecutor`] drives tablet-server agents over HTTP
//! - [`MemoryTabletExecutor`] keeps multi-version tables in process

pub mod http;
pub mod memory;
pub mod retry;

pub use http::HttpTabletExecutor;
pub use memory::MemoryTabletExecutor;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::errors::{MasterError, Result, TabletError};
use crate::restoration::BaseSnapshotRef;
use crate::snapshot::TargetObject;

/// One tablet of a target table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabletRef {
    /// Qualified `namespace.table` the tablet belongs to
    pub table: String,
    pub tablet_id: String,
    /// Name of the tablet server hosting it, when placement is known
    pub server: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotPresence {
    Complete,
    Missing,
}

/// Every operation must be idempotent: the master retries freely and re-drives
/// interrupted work after a restart.
#[async_trait]
pub trait TabletExecutor: Send + Sync {
    async fn resolve_tablets(&self, targets: &[TargetObject]) -> Result<Vec<TabletRef>>;

    async fn create_snapshot(
        &self,
        tablet: &TabletRef,
        snapshot_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Bring the tablet to its state as of `target`, starting from `base`.
    /// History after `target` must not be replayed.
    async fn restore_to_image(
        &self,
        tablet: &TabletRef,
        base: &BaseSnapshotRef,
        target: DateTime<Utc>,
    ) -> Result<()>;

    async fn snapshot_status(
        &self,
        tablet: &TabletRef,
        snapshot_id: &str,
    ) -> Result<SnapshotPresence>;
}

#[derive(Debug)]
pub struct TabletOutcome<T> {
    pub tablet_id: String,
    pub attempts: u32,
    pub result: Result<T>,
}

/// Outcome of one fan-out step across all tablets
#[derive(Debug)]
pub struct StepReport<T> {
    pub operation: String,
    pub outcomes: Vec<TabletOutcome<T>>,
}

impl<T> StepReport<T> {
    pub fn succeeded(&self) -> u32 {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count() as u32
    }

    pub fn first_failure(&self) -> Option<(&TabletOutcome<T>, &MasterError)> {
        self.outcomes
            .iter()
            .find_map(|o| o.result.as_ref().err().map(|e| (o, e)))
    }

    pub fn is_success(&self) -> bool {
        self.first_failure().is_none()
    }
}

/// The tablet's own explanation of a failure, without the retry wrapping
pub fn tablet_failure_reason(err: &MasterError) -> String {
    match err {
        MasterError::Tablet(TabletError::RetriesExhausted { reason, .. })
        | MasterError::Tablet(TabletError::Unavailable { reason, .. })
        | MasterError::Tablet(TabletError::Rejected { reason, .. }) => reason.clone(),
        other => other.to_string(),
    }
}

/// Run `op` against every tablet concurrently, each under its own retry budget.
/// All tablets are driven to an outcome even when one of them fails.
pub async fn fan_out<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    tablets: &[TabletRef],
    op: F,
) -> StepReport<T>
where
    F: Fn(TabletRef) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let op = &op;
    let runs = tablets.iter().map(|tablet| async move {
        let attempted = policy
            .run(&tablet.tablet_id, operation, || op(tablet.clone()))
            .await;
        TabletOutcome {
            tablet_id: tablet.tablet_id.clone(),
            attempts: attempted.attempts,
            result: attempted.result,
        }
    });

    StepReport {
        operation: operation.to_string(),
        outcomes: join_all(runs).await,
    }
}
