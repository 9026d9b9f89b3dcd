use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// A config file in a scratch directory whose output lands next to it.
pub struct TestConfig {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TestConfig {
    /// Mock-scheduler config with two pools and two workloads.
    pub fn mock() -> Self {
        Self::with_jobs(2)
    }

    /// Same as [`TestConfig::mock`] but with `jobs` workloads, which makes
    /// the config invalid once it exceeds the two pools.
    pub fn with_jobs(jobs: usize) -> Self {
        Self::build(jobs, "mock")
    }

    /// Two-workload config that selects the Slurm scheduler.
    pub fn slurm() -> Self {
        Self::build(2, "slurm")
    }

    fn build(jobs: usize, scheduler: &str) -> Self {
        crate::test_log!(
            "FIXTURE: Creating soak config with {} jobs on {}",
            jobs,
            scheduler
        );

        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("soak.toml");
        let mut contents = format!(
            r#"[soak]
name = "soak_cli"
test_timeout = "5m"
poll_interval = "100ms"
output_dir = "{out}"
log_dir = "/tmp/soak-cli-logs"
harassers = ["snapshot"]

[cluster]
servers = ["srv1"]
clients = ["cli1", "cli2"]

[backend]
scheduler = "{scheduler}"

[[pools]]
label = "pool_a"

[[pools]]
label = "pool_b"
"#,
            out = dir.path().join("out").display()
        );
        for idx in 0..jobs {
            contents.push_str(&format!(
                "\n[[jobs]]\nname = \"ior_{idx}\"\ncommand = \"ior -np {{nprocs}} --dfs.pool {{pool}}\"\n"
            ));
        }
        fs::write(&path, contents).expect("Failed to write config");
        Self { dir, path }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }
}
