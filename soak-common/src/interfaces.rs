//! Traits for the external systems the harness drives.

use crate::errors::{LogCollectError, SchedulerError, StorageError};
use crate::types::{
    CancelStatus, ContainerId, JobId, JobSpec, PoolId, PoolInfo, PoolSpec, RebuildStatus,
    SnapshotHandle,
};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Receives job state reports from a scheduler.
///
/// Called from arbitrary threads, possibly outside the tokio runtime, and
/// possibly out of order.
pub trait JobNotifier: Send + Sync {
    fn notify(&self, job: JobId, state: &str);
}

/// Batch job scheduler.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Submit a job. State reports for the returned id go to `notifier`.
    async fn submit(
        &self,
        spec: &JobSpec,
        notifier: Arc<dyn JobNotifier>,
    ) -> Result<JobId, SchedulerError>;

    async fn cancel(&self, job: JobId) -> Result<CancelStatus, SchedulerError>;

    /// Cancel every job of the current user in the configured partition.
    async fn cancel_all(&self) -> Result<(), SchedulerError> {
        Ok(())
    }
}

/// Storage control plane.
#[async_trait]
pub trait StorageControl: Send + Sync {
    async fn create_pool(&self, spec: &PoolSpec) -> Result<PoolInfo, StorageError>;

    /// Establish a handle to an existing pool.
    async fn connect_pool(&self, pool: &PoolId) -> Result<(), StorageError>;

    async fn destroy_pool(&self, pool: &PoolId, force: bool) -> Result<(), StorageError>;

    async fn create_container(&self, pool: &PoolId) -> Result<ContainerId, StorageError>;

    async fn destroy_container(
        &self,
        pool: &PoolId,
        container: &ContainerId,
    ) -> Result<(), StorageError>;

    async fn write(
        &self,
        pool: &PoolId,
        container: &ContainerId,
        key: &str,
        data: &[u8],
    ) -> Result<(), StorageError>;

    async fn read(
        &self,
        pool: &PoolId,
        container: &ContainerId,
        key: &str,
    ) -> Result<Vec<u8>, StorageError>;

    async fn create_snapshot(
        &self,
        pool: &PoolId,
        container: &ContainerId,
    ) -> Result<SnapshotHandle, StorageError>;

    async fn read_at_snapshot(
        &self,
        pool: &PoolId,
        container: &ContainerId,
        snapshot: SnapshotHandle,
        key: &str,
    ) -> Result<Vec<u8>, StorageError>;

    async fn destroy_snapshot(
        &self,
        pool: &PoolId,
        container: &ContainerId,
        snapshot: SnapshotHandle,
    ) -> Result<(), StorageError>;

    /// Exclude server ranks from a pool, triggering rebuild.
    async fn exclude_ranks(&self, pool: &PoolId, ranks: &[u32]) -> Result<(), StorageError>;

    async fn rebuild_status(&self, pool: &PoolId) -> Result<RebuildStatus, StorageError>;
}

/// Best-effort retrieval of job logs from cluster nodes.
#[async_trait]
pub trait LogCollector: Send + Sync {
    /// Create `remote_dir` on every node.
    async fn prepare(&self, nodes: &[String], remote_dir: &Path) -> Result<(), LogCollectError>;

    /// Remove `remote_dir` from every node.
    async fn clean(&self, nodes: &[String], remote_dir: &Path) -> Result<(), LogCollectError>;

    /// Copy non-empty files from `remote_dir` on every node into `local_dir`.
    async fn collect(
        &self,
        nodes: &[String],
        remote_dir: &Path,
        local_dir: &Path,
    ) -> Result<(), LogCollectError>;
}
