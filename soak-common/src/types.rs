//! Common types used across soak components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Scheduler-assigned identifier of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a submitted job.
///
/// States only move forward: `Pending` → `Running` → one of the terminal
/// states. Terminal states may overwrite each other (last report wins) but
/// never fall back to a non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Whether this state is final.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed | Self::Cancelled => 2,
        }
    }

    /// Whether an entry currently in `self` may be overwritten with `next`.
    pub fn accepts(self, next: JobState) -> bool {
        next.rank() >= self.rank()
    }

    /// Map a scheduler state string onto a job state.
    ///
    /// Slurm reports cancellations as `CANCELLED by <uid>`, so only the first
    /// word is considered. Anything that is not recognised as pending, running,
    /// completed or cancelled counts as a failure.
    pub fn from_scheduler(raw: &str) -> Self {
        let word = raw
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .trim_end_matches('+')
            .to_ascii_uppercase();
        match word.as_str() {
            "PENDING" | "CONFIGURING" | "REQUEUED" | "RESV_DEL_HOLD" => Self::Pending,
            "RUNNING" | "COMPLETING" | "SUSPENDED" | "STAGE_OUT" => Self::Running,
            "COMPLETED" => Self::Completed,
            "CANCELLED" => Self::Cancelled,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelStatus {
    /// The scheduler accepted the cancellation.
    Cancelled,
    /// The job was no longer queued or running.
    NotActive,
}

/// Storage pool identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(pub String);

impl PoolId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Container identifier within a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a container snapshot (the snapshot epoch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotHandle(pub u64);

/// Requested shape of a storage pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSpec {
    /// Human label used in logs.
    pub label: String,
    /// Storage-class-memory size (e.g. "1G").
    #[serde(default = "default_scm_size")]
    pub scm_size: String,
    /// Optional NVMe size.
    #[serde(default)]
    pub nvme_size: Option<String>,
    /// Server ranks to place the pool on (empty = all).
    #[serde(default)]
    pub ranks: Vec<u32>,
}

fn default_scm_size() -> String {
    "1G".to_string()
}

/// A pool as created by the storage control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub id: PoolId,
    pub label: String,
    /// Ranks running the pool service.
    pub service_ranks: Vec<u32>,
    /// The reserved pool lives for the whole run.
    pub reserved: bool,
}

impl PoolInfo {
    /// Service ranks in `a:b:c` form, as job command lines expect them.
    pub fn service_list(&self) -> String {
        self.service_ranks
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Progress of a pool rebuild after ranks were excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed(String),
}

/// Fault-injection routine run alongside jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarasserKind {
    /// Exclude server ranks and wait for pool rebuild.
    Rebuild,
    /// Snapshot consistency check on the reserved pool.
    Snapshot,
}

impl HarasserKind {
    pub const ALL: [HarasserKind; 2] = [HarasserKind::Rebuild, HarasserKind::Snapshot];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rebuild => "rebuild",
            Self::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for HarasserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HarasserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rebuild" => Ok(Self::Rebuild),
            "snapshot" => Ok(Self::Snapshot),
            other => Err(format!("harasser '{other}' is not supported")),
        }
    }
}

/// Workload family of a configured job, resolved once from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum JobFamily {
    /// Parallel I/O benchmark; one job per nodes-per-job × tasks-per-node.
    Ior {
        nodes_per_job: Vec<usize>,
        tasks_per_node: Vec<u32>,
    },
    /// Single-node file I/O workload.
    Fio,
}

impl JobFamily {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ior { .. } => "ior",
            Self::Fio => "fio",
        }
    }
}

/// A configured workload after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPlan {
    pub name: String,
    /// Command template; see [`crate::util::render_command`].
    pub command: String,
    pub family: JobFamily,
}

/// One workload instance, ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_name: String,
    pub family: String,
    pub pool: PoolId,
    pub nodes: usize,
    pub tasks_per_node: u32,
    pub command: String,
    /// Unique stem for script and output file names.
    pub log_name: String,
    /// Remote directory the job writes its output to.
    pub log_dir: PathBuf,
}

impl JobSpec {
    pub fn total_tasks(&self) -> usize {
        self.nodes * self.tasks_per_node as usize
    }
}
