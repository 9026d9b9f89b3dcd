//! Pool lifecycle: one reserved pool for the run, fresh pools per pass.

use soak_common::{
    ErrorCode, PoolId, PoolInfo, PoolSpec, SoakError, StorageControl, StorageError,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Owns the reserved pool and the current pass's pools.
pub struct PoolManager {
    storage: Arc<dyn StorageControl>,
    reserved: Option<PoolInfo>,
    pass_pools: Vec<PoolInfo>,
}

impl PoolManager {
    pub fn new(storage: Arc<dyn StorageControl>) -> Self {
        Self {
            storage,
            reserved: None,
            pass_pools: Vec::new(),
        }
    }

    /// Create and connect the reserved pool. Later calls return the same pool.
    pub async fn create_reserved(&mut self, spec: &PoolSpec) -> Result<PoolInfo, SoakError> {
        if let Some(reserved) = &self.reserved {
            return Ok(reserved.clone());
        }
        let mut info = self.storage.create_pool(spec).await?;
        info.reserved = true;
        self.storage.connect_pool(&info.id).await?;
        info!(pool = %info.id, label = %info.label, "Reserved pool created");
        self.reserved = Some(info.clone());
        Ok(info)
    }

    pub fn reserved(&self) -> Option<&PoolInfo> {
        self.reserved.as_ref()
    }

    pub fn pass_pools(&self) -> &[PoolInfo] {
        &self.pass_pools
    }

    /// Create this pass's pools.
    ///
    /// Fails if the previous pass's pools were not destroyed. On a partial
    /// failure the pools already created stay tracked so teardown removes them.
    pub async fn create_pass_pools(
        &mut self,
        specs: &[PoolSpec],
    ) -> Result<&[PoolInfo], SoakError> {
        if !self.pass_pools.is_empty() {
            return Err(SoakError::config(format!(
                "{} pools from the previous pass are still present",
                self.pass_pools.len()
            )));
        }
        for spec in specs {
            let info = self.storage.create_pool(spec).await?;
            info!(pool = %info.id, label = %info.label, "Pass pool created");
            self.pass_pools.push(info);
        }
        Ok(&self.pass_pools)
    }

    /// Force-destroy every pass pool. The reserved pool is never touched.
    ///
    /// The pass pool set is always cleared; failures are returned so they can
    /// be recorded.
    pub async fn destroy_pass_pools(&mut self) -> Vec<(PoolId, StorageError)> {
        let mut failures = Vec::new();
        for pool in std::mem::take(&mut self.pass_pools) {
            if self.reserved.as_ref().is_some_and(|r| r.id == pool.id) {
                continue;
            }
            match self.storage.destroy_pool(&pool.id, true).await {
                Ok(()) => info!(pool = %pool.id, "Pass pool destroyed"),
                Err(e) => {
                    warn!(
                        pool = %pool.id,
                        code = %ErrorCode::StoragePoolTeardownFailed,
                        "Failed to destroy pass pool: {e}"
                    );
                    failures.push((pool.id, e));
                }
            }
        }
        failures
    }
}
