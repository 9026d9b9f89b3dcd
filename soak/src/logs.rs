//! Log collector used when no remote log retrieval is configured.

use async_trait::async_trait;
use soak_common::{LogCollectError, LogCollector};
use std::path::Path;
use tracing::debug;

/// Leaves job logs where the jobs wrote them and only creates the local
/// per-pass directory, so the report layout is the same for every backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogCollector;

#[async_trait]
impl LogCollector for NoopLogCollector {
    async fn prepare(&self, _nodes: &[String], remote_dir: &Path) -> Result<(), LogCollectError> {
        debug!(dir = %remote_dir.display(), "Remote log directory left to the jobs");
        Ok(())
    }

    async fn clean(&self, _nodes: &[String], _remote_dir: &Path) -> Result<(), LogCollectError> {
        Ok(())
    }

    async fn collect(
        &self,
        _nodes: &[String],
        remote_dir: &Path,
        local_dir: &Path,
    ) -> Result<(), LogCollectError> {
        tokio::fs::create_dir_all(local_dir).await?;
        debug!(
            remote = %remote_dir.display(),
            local = %local_dir.display(),
            "Logs not retrieved"
        );
        Ok(())
    }
}
