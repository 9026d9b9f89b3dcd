//! Expands configured workloads into per-pass job specs.

use soak_common::util::{render_command, sanitize_name};
use soak_common::{ErrorCode, JobFamily, JobPlan, JobSpec, PoolInfo, SoakError};
use std::path::{Path, PathBuf};

/// Builds the job specs of one pass.
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    test_name: String,
    log_dir: PathBuf,
}

impl BatchBuilder {
    /// `log_dir` is the remote log root; each pass writes under `passN`.
    pub fn new(test_name: impl Into<String>, log_dir: &Path) -> Self {
        Self {
            test_name: test_name.into(),
            log_dir: log_dir.to_path_buf(),
        }
    }

    /// One pool per plan, in order. `ior` plans expand over every
    /// nodes-per-job × tasks-per-node pair; `fio` plans yield one single-node,
    /// single-task job.
    pub fn build(
        &self,
        pass: u32,
        plans: &[JobPlan],
        pools: &[PoolInfo],
    ) -> Result<Vec<JobSpec>, SoakError> {
        if pools.len() < plans.len() {
            return Err(SoakError::config_with(
                ErrorCode::ConfigInsufficientPools,
                format!(
                    "There are not enough pools to run this pass: {} pools for {} jobs",
                    pools.len(),
                    plans.len()
                ),
            ));
        }

        let log_dir = self.log_dir.join(format!("pass{pass}"));
        let mut specs = Vec::new();
        for (plan, pool) in plans.iter().zip(pools) {
            match &plan.family {
                JobFamily::Ior {
                    nodes_per_job,
                    tasks_per_node,
                } => {
                    for &nodes in nodes_per_job {
                        for &ppn in tasks_per_node {
                            let index = specs.len();
                            specs.push(self.spec(pass, plan, pool, (nodes, ppn), index, &log_dir));
                        }
                    }
                }
                JobFamily::Fio => {
                    let index = specs.len();
                    specs.push(self.spec(pass, plan, pool, (1, 1), index, &log_dir));
                }
            }
        }
        Ok(specs)
    }

    fn spec(
        &self,
        pass: u32,
        plan: &JobPlan,
        pool: &PoolInfo,
        (nodes, ppn): (usize, u32),
        index: usize,
        log_dir: &Path,
    ) -> JobSpec {
        let nprocs = nodes * ppn as usize;
        let command = render_command(
            &plan.command,
            &[
                ("pool", pool.id.to_string()),
                ("svc", pool.service_list()),
                ("nprocs", nprocs.to_string()),
                ("nodes", nodes.to_string()),
                ("ppn", ppn.to_string()),
                ("log_dir", log_dir.display().to_string()),
            ],
        );
        let log_name = sanitize_name(&format!(
            "{}_pass{pass}_{}_{nodes}x{ppn}_{index}",
            self.test_name, plan.name
        ));
        JobSpec {
            job_name: plan.name.clone(),
            family: plan.family.label().to_string(),
            pool: pool.id.clone(),
            nodes,
            tasks_per_node: ppn,
            command,
            log_name,
            log_dir: log_dir.to_path_buf(),
        }
    }
}
