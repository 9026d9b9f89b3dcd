//! Soak run configuration.
//!
//! Loaded from a TOML file, overridden by `SOAK_*` environment variables and
//! validated as a whole so every problem is reported in one go.
//!
//! ```toml
//! [soak]
//! name = "soak_smoke"
//! test_timeout = "1h"
//! harassers = ["rebuild", "snapshot"]
//!
//! [cluster]
//! servers = ["srv1", "srv2"]
//! clients = ["cli1", "cli2"]
//!
//! [reserved_pool]
//! label = "pool_reserved"
//!
//! [[pools]]
//! label = "pool_jobs"
//!
//! [[jobs]]
//! name = "ior_easy"
//! command = "ior -a DFS --dfs.pool {pool} --dfs.svcl {svc}"
//! nodes_per_job = [1, -1]
//! tasks_per_node = [1, 4]
//! ```

pub mod env;

pub use env::{EnvError, EnvParser};

use crate::errors::{ErrorCode, SoakError};
use crate::types::{HarasserKind, JobFamily, JobPlan, PoolSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete soak configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoakConfig {
    #[serde(default)]
    pub soak: RunConfig,
    pub cluster: ClusterConfig,
    #[serde(default = "default_reserved_pool")]
    pub reserved_pool: PoolSpec,
    /// Per-pass pools; one per configured job.
    #[serde(default)]
    pub pools: Vec<PoolSpec>,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
    #[serde(default)]
    pub rebuild: RebuildConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Run-wide timing and behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Run name; a name containing "smoke" enables smoke mode.
    #[serde(default = "default_name")]
    pub name: String,
    /// Wall-clock length of the whole run.
    #[serde(default = "default_test_timeout", with = "duration_str")]
    pub test_timeout: Duration,
    /// Scheduler time limit for a single job.
    #[serde(default = "default_job_timeout", with = "duration_str")]
    pub job_timeout: Duration,
    /// Upper bound for joining the harassers of a pass.
    #[serde(default = "default_harasser_timeout", with = "duration_str")]
    pub harasser_timeout: Duration,
    /// Sleep between completion polls.
    #[serde(default = "default_poll_interval", with = "duration_str")]
    pub poll_interval: Duration,
    #[serde(default)]
    pub harassers: Vec<String>,
    #[serde(default)]
    pub smoke: bool,
    /// Remote directory jobs write their logs to (per-pass subdirectories).
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Local directory for collected logs and the run report.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Number of objects written to the reserved container.
    #[serde(default = "default_reserved_objects")]
    pub reserved_objects: usize,
    /// Size of each random payload in bytes.
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
    /// Optional JSONL file receiving run events.
    #[serde(default)]
    pub events_file: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            test_timeout: default_test_timeout(),
            job_timeout: default_job_timeout(),
            harasser_timeout: default_harasser_timeout(),
            poll_interval: default_poll_interval(),
            harassers: Vec::new(),
            smoke: false,
            log_dir: default_log_dir(),
            output_dir: default_output_dir(),
            reserved_objects: default_reserved_objects(),
            payload_size: default_payload_size(),
            events_file: None,
        }
    }
}

/// Cluster node layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub clients: Vec<String>,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub reservation: Option<String>,
    /// Nodes the scheduler must never place jobs on.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// A configured workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    /// "ior" or "fio"; inferred from the name when absent.
    #[serde(default)]
    pub family: Option<String>,
    /// Command template with `{pool}`, `{svc}`, `{nprocs}`, `{nodes}`, `{ppn}`.
    pub command: String,
    /// Node counts per job; -1 means every eligible client.
    #[serde(default = "default_nodes_per_job")]
    pub nodes_per_job: Vec<i64>,
    #[serde(default = "default_tasks_per_node")]
    pub tasks_per_node: Vec<u32>,
}

/// Rebuild harasser settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildConfig {
    /// Server ranks to exclude.
    #[serde(default = "default_rebuild_ranks")]
    pub ranks: Vec<u32>,
    /// Bound for each rebuild wait.
    #[serde(default = "default_rebuild_timeout", with = "duration_str")]
    pub timeout: Duration,
    #[serde(default = "default_rebuild_poll", with = "duration_str")]
    pub poll_interval: Duration,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            ranks: default_rebuild_ranks(),
            timeout: default_rebuild_timeout(),
            poll_interval: default_rebuild_poll(),
        }
    }
}

/// Scheduler backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    #[default]
    Slurm,
    Mock,
}

/// Backend adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub scheduler: SchedulerKind,
    /// Where batch scripts are written; defaults to `<output_dir>/soak/scripts`.
    #[serde(default)]
    pub script_dir: Option<PathBuf>,
    /// Interval between `sacct` polls of a submitted job.
    #[serde(default = "default_watch_interval", with = "duration_str")]
    pub watch_interval: Duration,
    /// Timeout for individual scheduler commands.
    #[serde(default = "default_command_timeout", with = "duration_str")]
    pub command_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::default(),
            script_dir: None,
            watch_interval: default_watch_interval(),
            command_timeout: default_command_timeout(),
        }
    }
}

fn default_name() -> String {
    "soak".to_string()
}

fn default_test_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_harasser_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/tmp/soak")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("soak-output")
}

fn default_reserved_objects() -> usize {
    4
}

fn default_payload_size() -> usize {
    500
}

fn default_reserved_pool() -> PoolSpec {
    PoolSpec {
        label: "pool_reserved".to_string(),
        scm_size: "1G".to_string(),
        nvme_size: None,
        ranks: Vec::new(),
    }
}

fn default_nodes_per_job() -> Vec<i64> {
    vec![1]
}

fn default_tasks_per_node() -> Vec<u32> {
    vec![1]
}

fn default_rebuild_ranks() -> Vec<u32> {
    vec![1]
}

fn default_rebuild_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_rebuild_poll() -> Duration {
    Duration::from_secs(2)
}

fn default_watch_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(120)
}

impl SoakConfig {
    /// Load and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, SoakError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SoakError::config_with(
                ErrorCode::ConfigReadError,
                format!("failed to read {}: {e}", path.display()),
            )
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, SoakError> {
        toml::from_str(contents).map_err(|e| {
            SoakError::config_with(ErrorCode::ConfigParseError, format!("invalid TOML: {e}"))
        })
    }

    /// Apply `SOAK_*` overrides. Returns every invalid variable as one error.
    pub fn apply_env_overrides(&mut self, env: &mut EnvParser) -> Result<(), SoakError> {
        if let Some(d) = env.get_duration("TEST_TIMEOUT") {
            self.soak.test_timeout = d;
        }
        if let Some(d) = env.get_duration("JOB_TIMEOUT") {
            self.soak.job_timeout = d;
        }
        if let Some(d) = env.get_duration("HARASSER_TIMEOUT") {
            self.soak.harasser_timeout = d;
        }
        if let Some(list) = env.get_string_list("HARASSERS") {
            self.soak.harassers = list;
        }
        if let Some(smoke) = env.get_bool("SMOKE") {
            self.soak.smoke = smoke;
        }
        if let Some(dir) = env.get_optional_path("LOG_DIR") {
            self.soak.log_dir = dir;
        }
        if let Some(dir) = env.get_optional_path("OUTPUT_DIR") {
            self.soak.output_dir = dir;
        }
        if let Some(partition) = env.get_optional_string("PARTITION") {
            self.cluster.partition = Some(partition);
        }

        let errors = env.take_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
            Err(SoakError::config_with(
                ErrorCode::ConfigEnvError,
                joined.join("; "),
            ))
        }
    }

    /// Collect every configuration problem.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let timings = [
            ("soak.test_timeout", self.soak.test_timeout),
            ("soak.job_timeout", self.soak.job_timeout),
            ("soak.harasser_timeout", self.soak.harasser_timeout),
            ("soak.poll_interval", self.soak.poll_interval),
            ("rebuild.timeout", self.rebuild.timeout),
            ("rebuild.poll_interval", self.rebuild.poll_interval),
        ];
        for (field, value) in timings {
            if value.is_zero() {
                errors.push(format!("{field} must be greater than zero"));
            }
        }
        if self.soak.reserved_objects == 0 {
            errors.push("soak.reserved_objects must be at least 1".to_string());
        }
        if self.soak.payload_size == 0 {
            errors.push("soak.payload_size must be at least 1".to_string());
        }

        match self.harasser_kinds() {
            Ok(kinds) => {
                if kinds.contains(&HarasserKind::Rebuild) && self.rebuild.ranks.is_empty() {
                    errors.push("rebuild.ranks must not be empty when rebuild is enabled".into());
                }
            }
            Err(e) => errors.push(inner_message(e)),
        }

        if self.jobs.is_empty() {
            errors.push("at least one [[jobs]] entry is required".to_string());
        }
        if self.pools.len() < self.jobs.len() {
            errors.push(format!(
                "There are not enough pools to run this pass: {} pools for {} jobs",
                self.pools.len(),
                self.jobs.len()
            ));
        }

        match self.eligible_clients() {
            Ok(_) => {
                if let Err(e) = self.job_plans() {
                    errors.push(inner_message(e));
                }
            }
            Err(e) => errors.push(inner_message(e)),
        }

        errors
    }

    /// Validate and fold every problem into one configuration error.
    pub fn ensure_valid(&self) -> Result<(), SoakError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SoakError::config(errors.join("; ")))
        }
    }

    /// Clients that are not also servers.
    pub fn eligible_clients(&self) -> Result<Vec<String>, SoakError> {
        let clients: Vec<String> = self
            .cluster
            .clients
            .iter()
            .filter(|c| !self.cluster.servers.contains(c))
            .cloned()
            .collect();
        if clients.is_empty() {
            return Err(SoakError::config_with(
                ErrorCode::ConfigNoClients,
                "There are no nodes that are client only",
            ));
        }
        Ok(clients)
    }

    /// Nodes the scheduler must avoid: configured excludes plus servers that
    /// were listed as clients.
    pub fn scheduler_exclude(&self) -> Vec<String> {
        let mut exclude = self.cluster.exclude.clone();
        for server in &self.cluster.servers {
            if self.cluster.clients.contains(server) && !exclude.contains(server) {
                exclude.push(server.clone());
            }
        }
        exclude
    }

    /// Enabled harassers, resolved once.
    pub fn harasser_kinds(&self) -> Result<Vec<HarasserKind>, SoakError> {
        let mut kinds = Vec::new();
        for name in &self.soak.harassers {
            let kind: HarasserKind = name.parse().map_err(SoakError::config)?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(kinds)
    }

    /// Resolve every configured job into a plan with concrete node counts.
    pub fn job_plans(&self) -> Result<Vec<JobPlan>, SoakError> {
        let available = self.eligible_clients()?.len();
        self.jobs
            .iter()
            .map(|job| job.resolve(available))
            .collect()
    }

    /// Smoke mode: the flag, or a run name containing "smoke".
    pub fn is_smoke(&self) -> bool {
        self.soak.smoke || self.soak.name.to_lowercase().contains("smoke")
    }

    /// Directory for rendered batch scripts.
    pub fn script_dir(&self) -> PathBuf {
        self.backend
            .script_dir
            .clone()
            .unwrap_or_else(|| self.soak.output_dir.join("soak").join("scripts"))
    }

    /// Remote log directory of a pass.
    pub fn pass_log_dir(&self, pass: u32) -> PathBuf {
        self.soak.log_dir.join(format!("pass{pass}"))
    }

    /// Local directory collected pass logs land in.
    pub fn pass_output_dir(&self, pass: u32) -> PathBuf {
        self.soak.output_dir.join("soak").join(format!("pass{pass}"))
    }

    pub fn report_path(&self) -> PathBuf {
        self.soak.output_dir.join("soak").join("report.json")
    }
}

impl JobConfig {
    fn family_name(&self) -> Option<&'static str> {
        let source = self
            .family
            .as_deref()
            .unwrap_or(self.name.as_str())
            .to_lowercase();
        if source.contains("ior") {
            Some("ior")
        } else if source.contains("fio") {
            Some("fio")
        } else {
            None
        }
    }

    fn resolve(&self, available: usize) -> Result<JobPlan, SoakError> {
        if self.command.trim().is_empty() {
            return Err(SoakError::config(format!("job {} has an empty command", self.name)));
        }
        let family = match self.family_name() {
            Some("ior") => {
                if self.nodes_per_job.is_empty() || self.tasks_per_node.is_empty() {
                    return Err(SoakError::config(format!(
                        "job {} needs nodes_per_job and tasks_per_node",
                        self.name
                    )));
                }
                if self.tasks_per_node.contains(&0) {
                    return Err(SoakError::config(format!(
                        "job {} has tasks_per_node of 0",
                        self.name
                    )));
                }
                let mut nodes = Vec::with_capacity(self.nodes_per_job.len());
                for &npj in &self.nodes_per_job {
                    let resolved = match npj {
                        -1 => available,
                        n if n >= 1 => n as usize,
                        n => {
                            return Err(SoakError::config(format!(
                                "job {} has invalid nodes_per_job {n}",
                                self.name
                            )));
                        }
                    };
                    if resolved > available {
                        return Err(SoakError::config_with(
                            ErrorCode::ConfigInsufficientNodes,
                            format!(
                                "job {} requires {resolved} client nodes but only {available} are available",
                                self.name
                            ),
                        ));
                    }
                    nodes.push(resolved);
                }
                JobFamily::Ior {
                    nodes_per_job: nodes,
                    tasks_per_node: self.tasks_per_node.clone(),
                }
            }
            Some(_) => JobFamily::Fio,
            None => {
                return Err(SoakError::config(format!(
                    "job family for {} is not supported",
                    self.name
                )));
            }
        };
        Ok(JobPlan {
            name: self.name.clone(),
            command: self.command.clone(),
            family,
        })
    }
}

fn inner_message(err: SoakError) -> String {
    match err {
        SoakError::Configuration { message, .. } => message,
        other => other.to_string(),
    }
}

/// Serde adapter for humantime durations ("90s", "1h 30m").
pub mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[soak]
name = "soak_long"
test_timeout = "2h"
harassers = ["rebuild", "snapshot"]

[cluster]
servers = ["srv1", "srv2"]
clients = ["cli1", "cli2", "cli3", "srv1"]
partition = "normal"

[[pools]]
label = "pool_ior"

[[pools]]
label = "pool_fio"

[[jobs]]
name = "ior_easy"
command = "ior --dfs.pool {pool}"
nodes_per_job = [1, -1]
tasks_per_node = [1, 4]

[[jobs]]
name = "fio_small"
command = "fio --pool {pool}"
"#;

    fn sample() -> SoakConfig {
        SoakConfig::from_toml_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_parse_with_defaults() {
        let config = sample();
        assert_eq!(config.soak.test_timeout, Duration::from_secs(7200));
        assert_eq!(config.soak.poll_interval, Duration::from_secs(5));
        assert_eq!(config.reserved_pool.label, "pool_reserved");
        assert_eq!(config.backend.scheduler, SchedulerKind::Slurm);
        assert!(config.validate().is_empty(), "{:?}", config.validate());
    }

    #[test]
    fn test_servers_removed_from_clients() {
        let config = sample();
        assert_eq!(config.eligible_clients().unwrap(), vec!["cli1", "cli2", "cli3"]);
        assert_eq!(config.scheduler_exclude(), vec!["srv1"]);
    }

    #[test]
    fn test_no_client_only_nodes() {
        let mut config = sample();
        config.cluster.clients = vec!["srv1".into(), "srv2".into()];
        let err = config.eligible_clients().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigNoClients);
        assert!(!config.validate().is_empty());
    }

    #[test]
    fn test_job_plans_resolve_all_clients() {
        let plans = sample().job_plans().unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(
            plans[0].family,
            JobFamily::Ior {
                nodes_per_job: vec![1, 3],
                tasks_per_node: vec![1, 4],
            }
        );
        assert_eq!(plans[1].family, JobFamily::Fio);
    }

    #[test]
    fn test_job_needing_too_many_nodes() {
        let mut config = sample();
        config.jobs[0].nodes_per_job = vec![8];
        let err = config.job_plans().unwrap_err();
        assert!(err.to_string().contains("client nodes"));
        assert_eq!(err.code(), ErrorCode::ConfigInsufficientNodes);
    }

    #[test]
    fn test_unknown_family_and_harasser() {
        let mut config = sample();
        config.jobs[1].name = "mdtest_hard".into();
        config.soak.harassers.push("reboot".into());
        let errors = config.validate();
        assert_eq!(errors.len(), 2, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("reboot")));
        assert!(errors.iter().any(|e| e.contains("mdtest_hard")));
    }

    #[test]
    fn test_not_enough_pools() {
        let mut config = sample();
        config.pools.pop();
        let err = config.ensure_valid().unwrap_err();
        assert!(err.to_string().contains("not enough pools"));
    }

    #[test]
    fn test_smoke_inferred_from_name() {
        let mut config = sample();
        assert!(!config.is_smoke());
        config.soak.name = "soak_smoke".into();
        assert!(config.is_smoke());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = sample();
        let mut env = EnvParser::from_pairs([
            ("SOAK_TEST_TIMEOUT", "30m"),
            ("SOAK_HARASSERS", "snapshot"),
            ("SOAK_SMOKE", "yes"),
            ("SOAK_PARTITION", "debug"),
        ]);
        config.apply_env_overrides(&mut env).unwrap();
        assert_eq!(config.soak.test_timeout, Duration::from_secs(1800));
        assert_eq!(config.harasser_kinds().unwrap(), vec![HarasserKind::Snapshot]);
        assert!(config.is_smoke());
        assert_eq!(config.cluster.partition.as_deref(), Some("debug"));
    }

    #[test]
    fn test_env_overrides_report_all_errors() {
        let mut config = sample();
        let mut env =
            EnvParser::from_pairs([("SOAK_TEST_TIMEOUT", "forever"), ("SOAK_SMOKE", "perhaps")]);
        let err = config.apply_env_overrides(&mut env).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("SOAK_TEST_TIMEOUT"));
        assert!(msg.contains("SOAK_SMOKE"));
        assert_eq!(err.code(), ErrorCode::ConfigEnvError);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("soak.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = SoakConfig::load(&path).unwrap();
        assert_eq!(config.soak.name, "soak_long");
        let missing = SoakConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert_eq!(missing.code(), ErrorCode::ConfigReadError);
        let garbled = SoakConfig::from_toml_str("[soak\nname =").unwrap_err();
        assert_eq!(garbled.code(), ErrorCode::ConfigParseError);
    }

    #[test]
    fn test_pass_directories() {
        let config = sample();
        assert_eq!(config.pass_log_dir(3), PathBuf::from("/tmp/soak/pass3"));
        assert_eq!(
            config.pass_output_dir(1),
            PathBuf::from("soak-output/soak/pass1")
        );
    }
}
