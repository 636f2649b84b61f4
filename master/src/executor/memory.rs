//! In-process multi-version tablet store
//!
//! Every write appends a timestamped version to its key, so any past state of
//! a table can be reconstructed. Restoring a tablet appends new versions that
//! carry each key's value as of the target timestamp; history is never
//! rewritten, which keeps restores idempotent.
//!
//! Used by development deployments (`executor = "memory"`) and by the test
//! suite, which relies on its fault injection and restore gate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use super::{SnapshotPresence, TabletExecutor, TabletRef};
use crate::clock::Clock;
use crate::errors::{Result, TabletError};
use crate::restoration::BaseSnapshotRef;
use crate::snapshot::TargetObject;

#[derive(Debug, Clone)]
struct Version {
    at: DateTime<Utc>,
    /// `None` marks a delete
    value: Option<String>,
}

#[derive(Debug, Default)]
struct TabletState {
    rows: BTreeMap<String, Vec<Version>>,
    snapshots: HashMap<String, DateTime<Utc>>,
    pending_failures: u32,
}

impl TabletState {
    fn value_at(&self, key: &str, at: DateTime<Utc>) -> Option<String> {
        self.rows
            .get(key)
            .and_then(|versions| versions.iter().rev().find(|v| v.at <= at))
            .and_then(|v| v.value.clone())
    }

    fn latest(&self, key: &str) -> Option<String> {
        self.rows
            .get(key)
            .and_then(|versions| versions.last())
            .and_then(|v| v.value.clone())
    }

    fn append(&mut self, key: &str, value: Option<String>, now: DateTime<Utc>) -> DateTime<Utc> {
        let versions = self.rows.entry(key.to_string()).or_default();
        let at = match versions.last() {
            Some(last) if last.at >= now => last.at + chrono::Duration::microseconds(1),
            _ => now,
        };
        versions.push(Version { at, value });
        at
    }

    fn take_injected_failure(&mut self, tablet_id: &str, operation: &str) -> Result<()> {
        if self.pending_failures > 0 {
            self.pending_failures -= 1;
            return Err(TabletError::Unavailable {
                tablet_id: tablet_id.to_string(),
                reason: format!("injected failure during {}", operation),
            }
            .into());
        }
        Ok(())
    }
}

pub struct MemoryTabletExecutor {
    clock: Arc<dyn Clock>,
    /// `namespace.table` -> tablet ids
    tables: RwLock<BTreeMap<String, Vec<String>>>,
    tablets: RwLock<HashMap<String, TabletState>>,
    restore_gate: watch::Sender<bool>,
}

impl MemoryTabletExecutor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (restore_gate, _) = watch::channel(true);
        Self {
            clock,
            tables: RwLock::new(BTreeMap::new()),
            tablets: RwLock::new(HashMap::new()),
            restore_gate,
        }
    }

    /// Create `namespace.table` split into `num_tablets` tablets
    pub async fn create_table(&self, namespace: &str, table: &str, num_tablets: usize) -> Vec<String> {
        let qualified = format!("{}.{}", namespace, table);
        let tablet_ids: Vec<String> = (0..num_tablets.max(1))
            .map(|i| format!("{}-tablet-{}", qualified, i))
            .collect();
        self.register_table(&qualified, tablet_ids.clone()).await;
        tablet_ids
    }

    /// Register a table with explicit tablet ids; existing tablets keep their data
    pub async fn register_table(&self, qualified: &str, tablet_ids: Vec<String>) {
        let mut tablets = self.tablets.write().await;
        for id in &tablet_ids {
            tablets.entry(id.clone()).or_default();
        }
        drop(tablets);

        info!(
            "Registered in-memory table {} with {} tablets",
            qualified,
            tablet_ids.len()
        );
        self.tables
            .write()
            .await
            .insert(qualified.to_string(), tablet_ids);
    }

    pub async fn tablet_ids(&self, table: &str) -> Vec<String> {
        self.tables
            .read()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn write(&self, table: &str, key: &str, value: &str) -> Result<DateTime<Utc>> {
        self.mutate(table, key, Some(value.to_string())).await
    }

    pub async fn delete(&self, table: &str, key: &str) -> Result<DateTime<Utc>> {
        self.mutate(table, key, None).await
    }

    pub async fn read(&self, table: &str, key: &str) -> Result<Option<String>> {
        let tablet_id = self.tablet_for_key(table, key).await?;
        let tablets = self.tablets.read().await;
        Ok(tablets.get(&tablet_id).and_then(|t| t.latest(key)))
    }

    pub async fn read_at(&self, table: &str, key: &str, at: DateTime<Utc>) -> Result<Option<String>> {
        let tablet_id = self.tablet_for_key(table, key).await?;
        let tablets = self.tablets.read().await;
        Ok(tablets.get(&tablet_id).and_then(|t| t.value_at(key, at)))
    }

    /// Make the next `count` operations on `tablet_id` fail as unavailable
    pub async fn inject_failures(&self, tablet_id: &str, count: u32) {
        let mut tablets = self.tablets.write().await;
        tablets.entry(tablet_id.to_string()).or_default().pending_failures = count;
    }

    pub async fn has_snapshot(&self, tablet_id: &str, snapshot_id: &str) -> bool {
        self.tablets
            .read()
            .await
            .get(tablet_id)
            .is_some_and(|t| t.snapshots.contains_key(snapshot_id))
    }

    /// Hold every restore call until [`resume_restores`](Self::resume_restores)
    pub fn pause_restores(&self) {
        self.restore_gate.send_replace(false);
    }

    pub fn resume_restores(&self) {
        self.restore_gate.send_replace(true);
    }

    async fn mutate(&self, table: &str, key: &str, value: Option<String>) -> Result<DateTime<Utc>> {
        let tablet_id = self.tablet_for_key(table, key).await?;
        let now = self.clock.now();
        let mut tablets = self.tablets.write().await;
        let tablet = tablets.entry(tablet_id).or_default();
        Ok(tablet.append(key, value, now))
    }

    async fn tablet_for_key(&self, table: &str, key: &str) -> Result<String> {
        let tables = self.tables.read().await;
        let tablet_ids = tables
            .get(table)
            .filter(|ids| !ids.is_empty())
            .ok_or_else(|| TabletError::UnknownTarget {
                target: table.to_string(),
            })?;

        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % tablet_ids.len() as u64) as usize;
        Ok(tablet_ids[idx].clone())
    }
}

#[async_trait]
impl TabletExecutor for MemoryTabletExecutor {
    async fn resolve_tablets(&self, targets: &[TargetObject]) -> Result<Vec<TabletRef>> {
        let tables = self.tables.read().await;
        let mut resolved = Vec::new();

        for target in targets {
            let mut matched = false;
            for (qualified, tablet_ids) in tables.iter() {
                let Some((namespace, table)) = qualified.rsplit_once('.') else {
                    continue;
                };
                if !target.covers(namespace, table) {
                    continue;
                }
                matched = true;
                resolved.extend(tablet_ids.iter().map(|id| TabletRef {
                    table: qualified.clone(),
                    tablet_id: id.clone(),
                    server: None,
                }));
            }
            if !matched {
                return Err(TabletError::UnknownTarget {
                    target: target.to_string(),
                }
                .into());
            }
        }

        resolved.sort_by(|a, b| a.tablet_id.cmp(&b.tablet_id));
        resolved.dedup();
        Ok(resolved)
    }

    async fn create_snapshot(
        &self,
        tablet: &TabletRef,
        snapshot_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tablets = self.tablets.write().await;
        let state = tablets.entry(tablet.tablet_id.clone()).or_default();
        state.take_injected_failure(&tablet.tablet_id, "create_snapshot")?;

        state.snapshots.entry(snapshot_id.to_string()).or_insert(at);
        debug!(
            "Tablet {} snapshot {} at {}",
            tablet.tablet_id, snapshot_id, at
        );
        Ok(())
    }

    async fn restore_to_image(
        &self,
        tablet: &TabletRef,
        base: &BaseSnapshotRef,
        target: DateTime<Utc>,
    ) -> Result<()> {
        let mut gate = self.restore_gate.subscribe();
        let gate_open = gate.wait_for(|open| *open).await.is_ok();
        if !gate_open {
            return Err(TabletError::Unavailable {
                tablet_id: tablet.tablet_id.clone(),
                reason: "executor shut down".to_string(),
            }
            .into());
        }

        let now = self.clock.now();
        let mut tablets = self.tablets.write().await;
        let state = tablets.entry(tablet.tablet_id.clone()).or_default();
        state.take_injected_failure(&tablet.tablet_id, "restore_to_image")?;

        if !state.snapshots.contains_key(&base.snapshot_id) {
            return Err(TabletError::Rejected {
                tablet_id: tablet.tablet_id.clone(),
                reason: format!("base snapshot {} is not present", base.snapshot_id),
            }
            .into());
        }

        let keys: Vec<String> = state.rows.keys().cloned().collect();
        let mut changed = 0usize;
        for key in keys {
            let wanted = state.value_at(&key, target);
            if state.latest(&key) != wanted {
                state.append(&key, wanted, now);
                changed += 1;
            }
        }

        debug!(
            "Tablet {} restored to {} from snapshot {} ({} keys changed)",
            tablet.tablet_id, target, base.snapshot_id, changed
        );
        Ok(())
    }

    async fn snapshot_status(
        &self,
        tablet: &TabletRef,
        snapshot_id: &str,
    ) -> Result<SnapshotPresence> {
        let mut tablets = self.tablets.write().await;
        let state = tablets.entry(tablet.tablet_id.clone()).or_default();
        state.take_injected_failure(&tablet.tablet_id, "snapshot_status")?;

        Ok(if state.snapshots.contains_key(snapshot_id) {
            SnapshotPresence::Complete
        } else {
            SnapshotPresence::Missing
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::errors::ErrorKind;

    fn executor() -> (Arc<ManualClock>, MemoryTabletExecutor) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let executor = MemoryTabletExecutor::new(clock.clone());
        (clock, executor)
    }

    #[tokio::test]
    async fn test_read_at_sees_history() {
        let (clock, executor) = executor();
        executor.create_table("ks", "t", 2).await;

        let first = executor.write("ks.t", "1", "before").await.unwrap();
        clock.advance(chrono::Duration::seconds(5));
        executor.write("ks.t", "1", "after").await.unwrap();

        assert_eq!(executor.read("ks.t", "1").await.unwrap().as_deref(), Some("after"));
        assert_eq!(
            executor.read_at("ks.t", "1", first).await.unwrap().as_deref(),
            Some("before")
        );
        assert_eq!(
            executor
                .read_at("ks.t", "1", first - chrono::Duration::seconds(1))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_restore_needs_base_and_is_idempotent() {
        let (clock, executor) = executor();
        let tablet_ids = executor.create_table("ks", "t", 1).await;
        let tablet = TabletRef {
            table: "ks.t".to_string(),
            tablet_id: tablet_ids[0].clone(),
            server: None,
        };

        executor.write("ks.t", "1", "before").await.unwrap();
        let snap_at = clock.advance(chrono::Duration::seconds(1));
        let base = BaseSnapshotRef {
            snapshot_id: "snap-1".to_string(),
            snapshot_time: snap_at,
        };

        let err = executor
            .restore_to_image(&tablet, &base, snap_at)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failed);

        executor.create_snapshot(&tablet, "snap-1", snap_at).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));
        executor.write("ks.t", "1", "after").await.unwrap();
        executor.write("ks.t", "2", "new").await.unwrap();

        for _ in 0..2 {
            executor.restore_to_image(&tablet, &base, snap_at).await.unwrap();
            assert_eq!(executor.read("ks.t", "1").await.unwrap().as_deref(), Some("before"));
            assert_eq!(executor.read("ks.t", "2").await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_resolve_namespace_and_unknown_target() {
        let (_, executor) = executor();
        executor.create_table("ks", "a", 2).await;
        executor.create_table("ks", "b", 1).await;
        executor.create_table("ysql.db", "c", 1).await;

        let all = executor
            .resolve_tablets(&[TargetObject::namespace("ks")])
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let qualified = executor
            .resolve_tablets(&[TargetObject::table("ysql.db", "c")])
            .await
            .unwrap();
        assert_eq!(qualified.len(), 1);
        assert_eq!(qualified[0].table, "ysql.db.c");

        let err = executor
            .resolve_tablets(&[TargetObject::table("ks", "missing")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let (clock, executor) = executor();
        let tablet_ids = executor.create_table("ks", "t", 1).await;
        let tablet = TabletRef {
            table: "ks.t".to_string(),
            tablet_id: tablet_ids[0].clone(),
            server: None,
        };

        executor.inject_failures(&tablet.tablet_id, 1).await;
        let err = executor
            .create_snapshot(&tablet, "snap-1", clock.now())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        executor
            .create_snapshot(&tablet, "snap-1", clock.now())
            .await
            .unwrap();
        assert!(executor.has_snapshot(&tablet.tablet_id, "snap-1").await);
    }
}
