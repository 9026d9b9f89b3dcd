//! In-memory backends for tests and `--mock` runs.
//!
//! - [`MockScheduler`] hands out sequential job ids and reports scripted
//!   states, from tokio tasks or from plain OS threads.
//! - [`MockStorage`] keeps epoch-versioned objects per container so snapshot
//!   reads behave like the real thing, and exposes fault switches.
//! - [`MockLogCollector`] records every call.

use crate::errors::{LogCollectError, SchedulerError, StorageError};
use crate::interfaces::{JobNotifier, LogCollector, Scheduler, StorageControl};
use crate::types::{
    CancelStatus, ContainerId, JobId, JobSpec, PoolId, PoolInfo, PoolSpec, RebuildStatus,
    SnapshotHandle,
};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Scheduler ─────────────────────────────────────────────────────────────

/// Scripted behaviour of one submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockJobBehavior {
    /// Report RUNNING, then `state` after `after` (tokio time).
    Finish { state: String, after: Duration },
    /// Report `state` from a separate OS thread.
    FinishFromThread { state: String },
    /// Stay PENDING until cancelled.
    Hang,
    /// Refuse the submission.
    Reject(String),
}

impl MockJobBehavior {
    pub fn completed() -> Self {
        Self::Finish {
            state: "COMPLETED".to_string(),
            after: Duration::ZERO,
        }
    }

    pub fn failed() -> Self {
        Self::Finish {
            state: "FAILED".to_string(),
            after: Duration::ZERO,
        }
    }

    pub fn after(state: &str, after: Duration) -> Self {
        Self::Finish {
            state: state.to_string(),
            after,
        }
    }
}

struct MockJob {
    notifier: Arc<dyn JobNotifier>,
    finished: bool,
}

struct SchedulerInner {
    next_id: AtomicU64,
    script: Mutex<VecDeque<MockJobBehavior>>,
    default_behavior: Mutex<MockJobBehavior>,
    jobs: Mutex<HashMap<JobId, MockJob>>,
    submitted: Mutex<Vec<JobSpec>>,
    cancelled: Mutex<Vec<JobId>>,
    cancel_all_calls: AtomicUsize,
}

/// Scheduler that runs nothing and reports scripted states.
///
/// Behaviours are consumed FIFO; once the script is empty every job gets the
/// default behaviour (`COMPLETED` unless changed).
#[derive(Clone)]
pub struct MockScheduler {
    inner: Arc<SchedulerInner>,
}

impl MockScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                next_id: AtomicU64::new(1),
                script: Mutex::new(VecDeque::new()),
                default_behavior: Mutex::new(MockJobBehavior::completed()),
                jobs: Mutex::new(HashMap::new()),
                submitted: Mutex::new(Vec::new()),
                cancelled: Mutex::new(Vec::new()),
                cancel_all_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Append a scripted behaviour for the next submission.
    pub fn push(&self, behavior: MockJobBehavior) {
        lock(&self.inner.script).push_back(behavior);
    }

    pub fn set_default(&self, behavior: MockJobBehavior) {
        *lock(&self.inner.default_behavior) = behavior;
    }

    /// Specs of every accepted submission, in order.
    pub fn submitted(&self) -> Vec<JobSpec> {
        lock(&self.inner.submitted).clone()
    }

    pub fn cancelled(&self) -> Vec<JobId> {
        lock(&self.inner.cancelled).clone()
    }

    pub fn cancel_all_calls(&self) -> usize {
        self.inner.cancel_all_calls.load(Ordering::SeqCst)
    }

    /// Deliver a state report for `job` as the scheduler would.
    pub fn report(&self, job: JobId, state: &str) {
        let notifier = lock(&self.inner.jobs).get(&job).map(|j| j.notifier.clone());
        if let Some(notifier) = notifier {
            notifier.notify(job, state);
        }
    }

    fn next_behavior(&self) -> MockJobBehavior {
        lock(&self.inner.script)
            .pop_front()
            .unwrap_or_else(|| lock(&self.inner.default_behavior).clone())
    }

    /// Mark `job` finished; false if it already was (e.g. cancelled).
    fn finish(inner: &SchedulerInner, job: JobId) -> bool {
        match lock(&inner.jobs).get_mut(&job) {
            Some(entry) if !entry.finished => {
                entry.finished = true;
                true
            }
            _ => false,
        }
    }
}

impl Default for MockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scheduler for MockScheduler {
    async fn submit(
        &self,
        spec: &JobSpec,
        notifier: Arc<dyn JobNotifier>,
    ) -> Result<JobId, SchedulerError> {
        let behavior = self.next_behavior();
        if let MockJobBehavior::Reject(reason) = &behavior {
            return Err(SchedulerError::Submit(reason.clone()));
        }

        let id = JobId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.inner.submitted).push(spec.clone());
        lock(&self.inner.jobs).insert(
            id,
            MockJob {
                notifier: notifier.clone(),
                finished: false,
            },
        );
        notifier.notify(id, "PENDING");

        match behavior {
            MockJobBehavior::Finish { state, after } => {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    notifier.notify(id, "RUNNING");
                    if !after.is_zero() {
                        tokio::time::sleep(after).await;
                    }
                    if Self::finish(&inner, id) {
                        notifier.notify(id, &state);
                    }
                });
            }
            MockJobBehavior::FinishFromThread { state } => {
                let inner = self.inner.clone();
                std::thread::spawn(move || {
                    if Self::finish(&inner, id) {
                        notifier.notify(id, &state);
                    }
                });
            }
            MockJobBehavior::Hang | MockJobBehavior::Reject(_) => {}
        }

        Ok(id)
    }

    async fn cancel(&self, job: JobId) -> Result<CancelStatus, SchedulerError> {
        lock(&self.inner.cancelled).push(job);
        let notifier = {
            let mut jobs = lock(&self.inner.jobs);
            match jobs.get_mut(&job) {
                Some(entry) if !entry.finished => {
                    entry.finished = true;
                    Some(entry.notifier.clone())
                }
                Some(_) => None,
                None => return Err(SchedulerError::Cancel(format!("unknown job {job}"))),
            }
        };
        match notifier {
            Some(notifier) => {
                notifier.notify(job, "CANCELLED");
                Ok(CancelStatus::Cancelled)
            }
            None => Ok(CancelStatus::NotActive),
        }
    }

    async fn cancel_all(&self) -> Result<(), SchedulerError> {
        self.inner.cancel_all_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Storage ───────────────────────────────────────────────────────────────

/// Fault switches for [`MockStorage`].
#[derive(Debug, Clone, Default)]
pub struct StorageFaults {
    pub fail_pool_create: bool,
    /// `create_pool` fails only for pools with these labels.
    pub fail_pool_labels: Vec<String>,
    pub fail_destroy: bool,
    pub fail_exclude: bool,
    /// Rebuild starts but ends in failure.
    pub fail_rebuild: bool,
    /// Rebuild starts and never finishes.
    pub stall_rebuild: bool,
    /// Snapshot reads return the latest version instead of the snapshot one.
    pub corrupt_snapshot_reads: bool,
    /// Plain reads return altered data.
    pub corrupt_reads: bool,
    /// `create_snapshot` never returns.
    pub hang_snapshot: bool,
}

#[derive(Default)]
struct MockContainer {
    /// Versions per key, ascending by epoch.
    objects: HashMap<String, Vec<(u64, Vec<u8>)>>,
    snapshots: BTreeSet<u64>,
}

struct MockPool {
    info: PoolInfo,
    containers: HashMap<ContainerId, MockContainer>,
    rebuild: RebuildStatus,
    rebuild_polls: u32,
    excluded: Vec<u32>,
    connects: usize,
}

#[derive(Default)]
struct StorageState {
    next_id: u64,
    epoch: u64,
    pools: HashMap<PoolId, MockPool>,
    created: Vec<PoolId>,
    destroyed: Vec<PoolId>,
    faults: StorageFaults,
}

impl StorageState {
    fn pool(&mut self, pool: &PoolId) -> Result<&mut MockPool, StorageError> {
        self.pools
            .get_mut(pool)
            .ok_or_else(|| StorageError::PoolNotFound(pool.to_string()))
    }

    fn container(
        &mut self,
        pool: &PoolId,
        container: &ContainerId,
    ) -> Result<&mut MockContainer, StorageError> {
        self.pool(pool)?
            .containers
            .get_mut(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))
    }
}

/// In-memory storage control plane.
#[derive(Clone, Default)]
pub struct MockStorage {
    state: Arc<Mutex<StorageState>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_faults(&self, faults: StorageFaults) {
        lock(&self.state).faults = faults;
    }

    /// Change fault switches in place.
    pub fn update_faults(&self, f: impl FnOnce(&mut StorageFaults)) {
        f(&mut lock(&self.state).faults);
    }

    /// Pools that exist right now.
    pub fn live_pools(&self) -> Vec<PoolId> {
        let mut pools: Vec<PoolId> = lock(&self.state).pools.keys().cloned().collect();
        pools.sort();
        pools
    }

    pub fn created_pools(&self) -> Vec<PoolId> {
        lock(&self.state).created.clone()
    }

    pub fn destroyed_pools(&self) -> Vec<PoolId> {
        lock(&self.state).destroyed.clone()
    }

    pub fn connect_count(&self, pool: &PoolId) -> usize {
        lock(&self.state)
            .pools
            .get(pool)
            .map_or(0, |p| p.connects)
    }

    pub fn container_count(&self, pool: &PoolId) -> usize {
        lock(&self.state)
            .pools
            .get(pool)
            .map_or(0, |p| p.containers.len())
    }

    /// Live snapshots across all containers of `pool`.
    pub fn snapshot_count(&self, pool: &PoolId) -> usize {
        lock(&self.state).pools.get(pool).map_or(0, |p| {
            p.containers.values().map(|c| c.snapshots.len()).sum()
        })
    }

    pub fn excluded_ranks(&self, pool: &PoolId) -> Vec<u32> {
        lock(&self.state)
            .pools
            .get(pool)
            .map(|p| p.excluded.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StorageControl for MockStorage {
    async fn create_pool(&self, spec: &PoolSpec) -> Result<PoolInfo, StorageError> {
        let mut state = lock(&self.state);
        if state.faults.fail_pool_create || state.faults.fail_pool_labels.contains(&spec.label) {
            return Err(StorageError::Injected(format!(
                "pool create failed for {}",
                spec.label
            )));
        }
        state.next_id += 1;
        let id = PoolId::new(format!("pool-{:04}", state.next_id));
        let info = PoolInfo {
            id: id.clone(),
            label: spec.label.clone(),
            service_ranks: if spec.ranks.is_empty() {
                vec![0, 1, 2]
            } else {
                spec.ranks.clone()
            },
            reserved: false,
        };
        state.pools.insert(
            id.clone(),
            MockPool {
                info: info.clone(),
                containers: HashMap::new(),
                rebuild: RebuildStatus::NotStarted,
                rebuild_polls: 0,
                excluded: Vec::new(),
                connects: 0,
            },
        );
        state.created.push(id);
        Ok(info)
    }

    async fn connect_pool(&self, pool: &PoolId) -> Result<(), StorageError> {
        lock(&self.state).pool(pool)?.connects += 1;
        Ok(())
    }

    async fn destroy_pool(&self, pool: &PoolId, force: bool) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        if state.faults.fail_destroy {
            return Err(StorageError::Injected(format!("destroy failed for {pool}")));
        }
        let entry = state.pool(pool)?;
        if !force && !entry.containers.is_empty() {
            return Err(StorageError::Command(format!(
                "pool {pool} still has {} containers",
                entry.containers.len()
            )));
        }
        state.pools.remove(pool);
        state.destroyed.push(pool.clone());
        Ok(())
    }

    async fn create_container(&self, pool: &PoolId) -> Result<ContainerId, StorageError> {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = ContainerId::new(format!("cont-{:04}", state.next_id));
        state
            .pool(pool)?
            .containers
            .insert(id.clone(), MockContainer::default());
        Ok(id)
    }

    async fn destroy_container(
        &self,
        pool: &PoolId,
        container: &ContainerId,
    ) -> Result<(), StorageError> {
        lock(&self.state)
            .pool(pool)?
            .containers
            .remove(container)
            .map(|_| ())
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))
    }

    async fn write(
        &self,
        pool: &PoolId,
        container: &ContainerId,
        key: &str,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        state.epoch += 1;
        let epoch = state.epoch;
        state
            .container(pool, container)?
            .objects
            .entry(key.to_string())
            .or_default()
            .push((epoch, data.to_vec()));
        Ok(())
    }

    async fn read(
        &self,
        pool: &PoolId,
        container: &ContainerId,
        key: &str,
    ) -> Result<Vec<u8>, StorageError> {
        let mut state = lock(&self.state);
        let corrupt = state.faults.corrupt_reads;
        let mut data = state
            .container(pool, container)?
            .objects
            .get(key)
            .and_then(|versions| versions.last())
            .map(|(_, data)| data.clone())
            .ok_or_else(|| StorageError::KeyNotFound(key.to_string()))?;
        if corrupt {
            if let Some(first) = data.first_mut() {
                *first ^= 0xff;
            }
        }
        Ok(data)
    }

    async fn create_snapshot(
        &self,
        pool: &PoolId,
        container: &ContainerId,
    ) -> Result<SnapshotHandle, StorageError> {
        let hang = lock(&self.state).faults.hang_snapshot;
        if hang {
            std::future::pending::<()>().await;
        }
        let mut state = lock(&self.state);
        let epoch = state.epoch;
        state.container(pool, container)?.snapshots.insert(epoch);
        Ok(SnapshotHandle(epoch))
    }

    async fn read_at_snapshot(
        &self,
        pool: &PoolId,
        container: &ContainerId,
        snapshot: SnapshotHandle,
        key: &str,
    ) -> Result<Vec<u8>, StorageError> {
        let mut state = lock(&self.state);
        let corrupt = state.faults.corrupt_snapshot_reads;
        let cont = state.container(pool, container)?;
        if !cont.snapshots.contains(&snapshot.0) {
            return Err(StorageError::SnapshotNotFound(snapshot.0));
        }
        let versions = cont
            .objects
            .get(key)
            .ok_or_else(|| StorageError::KeyNotFound(key.to_string()))?;
        let found = if corrupt {
            versions.last()
        } else {
            versions.iter().rev().find(|(epoch, _)| *epoch <= snapshot.0)
        };
        found
            .map(|(_, data)| data.clone())
            .ok_or_else(|| StorageError::KeyNotFound(key.to_string()))
    }

    async fn destroy_snapshot(
        &self,
        pool: &PoolId,
        container: &ContainerId,
        snapshot: SnapshotHandle,
    ) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        if state.container(pool, container)?.snapshots.remove(&snapshot.0) {
            Ok(())
        } else {
            Err(StorageError::SnapshotNotFound(snapshot.0))
        }
    }

    async fn exclude_ranks(&self, pool: &PoolId, ranks: &[u32]) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        if state.faults.fail_exclude {
            return Err(StorageError::Injected(format!("exclude failed for {pool}")));
        }
        let entry = state.pool(pool)?;
        entry.excluded.extend_from_slice(ranks);
        entry.rebuild = RebuildStatus::InProgress;
        entry.rebuild_polls = 0;
        Ok(())
    }

    async fn rebuild_status(&self, pool: &PoolId) -> Result<RebuildStatus, StorageError> {
        let mut state = lock(&self.state);
        let faults = state.faults.clone();
        let entry = state.pool(pool)?;
        if entry.rebuild == RebuildStatus::InProgress {
            entry.rebuild_polls += 1;
            if entry.rebuild_polls >= 2 && !faults.stall_rebuild {
                entry.rebuild = if faults.fail_rebuild {
                    RebuildStatus::Failed(format!("rebuild of {pool} failed"))
                } else {
                    RebuildStatus::Completed
                };
            }
            // The first poll always observes the rebuild as started.
            if entry.rebuild_polls == 1 {
                return Ok(RebuildStatus::InProgress);
            }
        }
        Ok(entry.rebuild.clone())
    }
}

// ── Log collection ────────────────────────────────────────────────────────

/// A recorded [`LogCollector`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogCall {
    Prepare { nodes: Vec<String>, remote: PathBuf },
    Clean { nodes: Vec<String>, remote: PathBuf },
    Collect {
        nodes: Vec<String>,
        remote: PathBuf,
        local: PathBuf,
    },
}

/// Log collector that records calls and optionally fails collection.
#[derive(Clone, Default)]
pub struct MockLogCollector {
    calls: Arc<Mutex<Vec<LogCall>>>,
    fail_collect: Arc<Mutex<bool>>,
}

impl MockLogCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let collector = Self::default();
        *lock(&collector.fail_collect) = true;
        collector
    }

    pub fn calls(&self) -> Vec<LogCall> {
        lock(&self.calls).clone()
    }

    pub fn collect_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| matches!(c, LogCall::Collect { .. }))
            .count()
    }
}

#[async_trait]
impl LogCollector for MockLogCollector {
    async fn prepare(&self, nodes: &[String], remote_dir: &Path) -> Result<(), LogCollectError> {
        lock(&self.calls).push(LogCall::Prepare {
            nodes: nodes.to_vec(),
            remote: remote_dir.to_path_buf(),
        });
        Ok(())
    }

    async fn clean(&self, nodes: &[String], remote_dir: &Path) -> Result<(), LogCollectError> {
        lock(&self.calls).push(LogCall::Clean {
            nodes: nodes.to_vec(),
            remote: remote_dir.to_path_buf(),
        });
        Ok(())
    }

    async fn collect(
        &self,
        nodes: &[String],
        remote_dir: &Path,
        local_dir: &Path,
    ) -> Result<(), LogCollectError> {
        lock(&self.calls).push(LogCall::Collect {
            nodes: nodes.to_vec(),
            remote: remote_dir.to_path_buf(),
            local: local_dir.to_path_buf(),
        });
        if *lock(&self.fail_collect) {
            return Err(LogCollectError::Nodes(nodes.to_vec()));
        }
        Ok(())
    }
}
