//! Slurm adapter: `sbatch`, `sacct` and `scancel` driven through
//! `tokio::process`.

use async_trait::async_trait;
use soak_common::{
    CancelStatus, JobId, JobNotifier, JobSpec, JobState, Scheduler, SchedulerError, SoakConfig,
};
use std::path::PathBuf;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Extra time a state watcher keeps polling past the job time limit.
const WATCH_MARGIN: Duration = Duration::from_secs(300);

/// Settings the adapter needs from the run configuration.
#[derive(Debug, Clone)]
pub struct SlurmSettings {
    pub partition: Option<String>,
    pub reservation: Option<String>,
    pub exclude: Vec<String>,
    pub time_limit: Duration,
    pub script_dir: PathBuf,
    pub watch_interval: Duration,
    pub command_timeout: Duration,
}

impl SlurmSettings {
    pub fn from_config(config: &SoakConfig) -> Self {
        Self {
            partition: config.cluster.partition.clone(),
            reservation: config.cluster.reservation.clone(),
            exclude: config.scheduler_exclude(),
            time_limit: config.soak.job_timeout,
            script_dir: config.script_dir(),
            watch_interval: config.backend.watch_interval,
            command_timeout: config.backend.command_timeout,
        }
    }

    /// How long a watcher follows one job before giving up.
    fn max_watch(&self) -> Duration {
        self.time_limit + WATCH_MARGIN
    }
}

/// Scheduler backed by a Slurm controller reachable from this host.
pub struct SlurmScheduler {
    settings: Arc<SlurmSettings>,
}

impl SlurmScheduler {
    pub fn new(settings: SlurmSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

#[async_trait]
impl Scheduler for SlurmScheduler {
    async fn submit(
        &self,
        spec: &JobSpec,
        notifier: Arc<dyn JobNotifier>,
    ) -> Result<JobId, SchedulerError> {
        let script = render_script(spec, &self.settings);
        tokio::fs::create_dir_all(&self.settings.script_dir).await?;
        let path = self.settings.script_dir.join(format!("{}.sh", spec.log_name));
        tokio::fs::write(&path, script).await?;

        let output = run_command(
            "sbatch",
            &["--parsable".to_string(), path.display().to_string()],
            self.settings.command_timeout,
        )
        .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SchedulerError::Submit(stderr.trim().to_string()));
        }
        let job = parse_sbatch_output(&String::from_utf8_lossy(&output.stdout))?;
        info!(job = %job, script = %path.display(), "Submitted batch script");

        notifier.notify(job, "PENDING");
        tokio::spawn(watch_job(job, self.settings.clone(), notifier));
        Ok(job)
    }

    async fn cancel(&self, job: JobId) -> Result<CancelStatus, SchedulerError> {
        let output = run_command(
            "scancel",
            &[job.to_string()],
            self.settings.command_timeout,
        )
        .await?;
        if output.status.success() {
            return Ok(CancelStatus::Cancelled);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_inactive_job_error(&stderr) {
            Ok(CancelStatus::NotActive)
        } else {
            Err(SchedulerError::Cancel(format!("{job}: {}", stderr.trim())))
        }
    }

    async fn cancel_all(&self) -> Result<(), SchedulerError> {
        let user = std::env::var("USER")
            .map_err(|_| SchedulerError::Command("USER is not set".to_string()))?;
        let args = cancel_all_args(&user, self.settings.partition.as_deref());
        let output = run_command("scancel", &args, self.settings.command_timeout).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SchedulerError::Cancel(stderr.trim().to_string()));
        }
        info!(user = %user, "Cancelled remaining jobs");
        Ok(())
    }
}

/// Poll `sacct` for `job` and forward every state change until it is
/// terminal or the watch window closes.
async fn watch_job(job: JobId, settings: Arc<SlurmSettings>, notifier: Arc<dyn JobNotifier>) {
    let started = tokio::time::Instant::now();
    let mut last: Option<String> = None;
    loop {
        tokio::time::sleep(settings.watch_interval).await;

        let args = [
            "-j".to_string(),
            job.to_string(),
            "-X".to_string(),
            "-n".to_string(),
            "-P".to_string(),
            "-o".to_string(),
            "State".to_string(),
        ];
        match run_command("sacct", &args, settings.command_timeout).await {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                if let Some(state) = parse_sacct_state(&stdout) {
                    if last.as_deref() != Some(state.as_str()) {
                        debug!(job = %job, state = %state, "Job state changed");
                        notifier.notify(job, &state);
                    }
                    if JobState::from_scheduler(&state).is_terminal() {
                        return;
                    }
                    last = Some(state);
                }
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(job = %job, "sacct failed: {}", stderr.trim());
            }
            Err(e) => warn!(job = %job, "sacct failed: {e}"),
        }

        if started.elapsed() >= settings.max_watch() {
            warn!(job = %job, "Stopped watching job; no terminal state reported");
            return;
        }
    }
}

async fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<Output, SchedulerError> {
    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);
    debug!(program, ?args, "Running scheduler command");
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(SchedulerError::Command(format!(
            "{program} timed out after {}",
            humantime::format_duration(timeout)
        ))),
    }
}

// ── Pure helpers ──────────────────────────────────────────────────────────

/// Render the batch script for one job.
pub fn render_script(spec: &JobSpec, settings: &SlurmSettings) -> String {
    let log_dir = spec.log_dir.display();
    let mut lines = vec![
        "#!/bin/bash".to_string(),
        format!("#SBATCH --job-name={}", spec.log_name),
        format!("#SBATCH --nodes={}", spec.nodes),
        format!("#SBATCH --ntasks-per-node={}", spec.tasks_per_node),
        format!("#SBATCH --time={}", format_time_limit(settings.time_limit)),
        format!("#SBATCH --output={log_dir}/{}.out", spec.log_name),
        format!("#SBATCH --error={log_dir}/{}.err", spec.log_name),
    ];
    if let Some(partition) = &settings.partition {
        lines.push(format!("#SBATCH --partition={partition}"));
    }
    if let Some(reservation) = &settings.reservation {
        lines.push(format!("#SBATCH --reservation={reservation}"));
    }
    if !settings.exclude.is_empty() {
        lines.push(format!("#SBATCH --exclude={}", settings.exclude.join(",")));
    }
    lines.push(String::new());
    lines.push(format!("mkdir -p {log_dir}"));
    lines.push(spec.command.clone());
    lines.push("status=$?".to_string());
    lines.push(format!(
        "echo \"{} exited with status $status\"",
        spec.log_name
    ));
    lines.push("exit $status".to_string());
    lines.push(String::new());
    lines.join("\n")
}

/// Slurm `--time` value: `D-HH:MM:SS`, rounded up to whole seconds.
pub fn format_time_limit(limit: Duration) -> String {
    let mut secs = limit.as_secs();
    if limit.subsec_nanos() > 0 {
        secs += 1;
    }
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;
    format!("{days}-{hours:02}:{minutes:02}:{:02}", secs % 60)
}

/// Parse `sbatch --parsable` output: `<id>` or `<id>;<cluster>`.
pub fn parse_sbatch_output(stdout: &str) -> Result<JobId, SchedulerError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| SchedulerError::Parse("empty sbatch output".to_string()))?;
    let id = line.split(';').next().unwrap_or(line);
    id.parse::<u64>()
        .map(JobId)
        .map_err(|_| SchedulerError::Parse(format!("sbatch output {line:?}")))
}

/// First state reported by `sacct -X -n -P -o State`.
///
/// Cancellation shows as `CANCELLED by <uid>`; only the first word is kept.
pub fn parse_sacct_state(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.split_whitespace().next())
        .map(|s| s.trim_end_matches('+').to_string())
}

fn is_inactive_job_error(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("invalid job id") || lower.contains("already complet")
}

fn cancel_all_args(user: &str, partition: Option<&str>) -> Vec<String> {
    let mut args = vec!["--user".to_string(), user.to_string()];
    if let Some(partition) = partition {
        args.push("--partition".to_string());
        args.push(partition.to_string());
    }
    args
}
