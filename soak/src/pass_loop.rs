//! Top-level soak loop.
//!
//! A run sets up the reserved pool and its known data once, then repeats
//! passes until the deadline (or once in smoke mode):
//!
//! 1. create the pass pools
//! 2. build and submit the job batch
//! 3. from the second pass on, run the enabled harassers alongside the jobs
//! 4. wait for the jobs, cancelling stragglers at the deadline
//! 5. destroy the pass pools and collect logs
//!
//! After the loop the reserved data is read back and compared. Teardown runs
//! on every exit path.

use crate::aggregator::ResultAggregator;
use crate::batch::BatchBuilder;
use crate::events::{
    EventBus, HARASSER_FAILED, JOB_FAILED, JOBS_SUBMITTED, PASS_COMPLETED, PASS_STARTED,
    SOAK_FINISHED, SOAK_STARTED, STATE_CHANGED,
};
use crate::harasser::{HarasserCoordinator, HarasserPlan, HarasserVerdict};
use crate::pools::PoolManager;
use crate::report::SoakReport;
use crate::result_store::ResultStore;
use crate::tracker::JobTracker;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use soak_common::util::{format_ddhhmmss, random_payload};
use soak_common::{
    Clock, ContainerId, Deadline, ErrorCode, HarasserKind, JobPlan, LogCollector, PoolInfo,
    Scheduler, SoakConfig, SoakError, StorageControl,
};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// ── Backends ─────────────────────────────────────────────────────────────

/// External systems a run drives.
#[derive(Clone)]
pub struct SoakBackends {
    pub scheduler: Arc<dyn Scheduler>,
    pub storage: Arc<dyn StorageControl>,
    pub logs: Arc<dyn LogCollector>,
    pub clock: Arc<dyn Clock>,
}

// ── Soak State ───────────────────────────────────────────────────────────

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SoakState {
    Init,
    RunningPass,
    Harassing,
    AwaitingCompletion,
    Cleanup,
    Done,
}

impl fmt::Display for SoakState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::RunningPass => write!(f, "running_pass"),
            Self::Harassing => write!(f, "harassing"),
            Self::AwaitingCompletion => write!(f, "awaiting_completion"),
            Self::Cleanup => write!(f, "cleanup"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Result of a whole run.
pub struct SoakOutcome {
    pub report: SoakReport,
    pub result: Result<(), SoakError>,
}

/// Whether a pass got as far as running jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassOutcome {
    Ran,
    /// Pool creation failed; nothing was submitted.
    Skipped,
}

struct ReservedData {
    pool: PoolInfo,
    container: ContainerId,
    objects: Vec<(String, Vec<u8>)>,
}

// ── Runner ───────────────────────────────────────────────────────────────

/// Drives one soak run.
pub struct SoakRunner {
    config: SoakConfig,
    backends: SoakBackends,
    events: EventBus,
    state: SoakState,
    tracker: JobTracker,
    pools: PoolManager,
    harassers: HarasserCoordinator,
    aggregator: ResultAggregator,
    batch: BatchBuilder,
    enabled: Vec<HarasserKind>,
    plans: Vec<JobPlan>,
    clients: Vec<String>,
    reserved: Option<ReservedData>,
    pass: u32,
    passes_completed: u32,
}

impl SoakRunner {
    pub fn new(config: SoakConfig, backends: SoakBackends, events: EventBus) -> Self {
        let tracker = JobTracker::new(
            backends.scheduler.clone(),
            Arc::new(ResultStore::new()),
            backends.clock.clone(),
            config.soak.poll_interval,
        );
        let pools = PoolManager::new(backends.storage.clone());
        let harassers = HarasserCoordinator::new(backends.storage.clone(), backends.clock.clone());
        let batch = BatchBuilder::new(config.soak.name.clone(), &config.soak.log_dir);
        Self {
            config,
            backends,
            events,
            state: SoakState::Init,
            tracker,
            pools,
            harassers,
            aggregator: ResultAggregator::new(),
            batch,
            enabled: Vec::new(),
            plans: Vec::new(),
            clients: Vec::new(),
            reserved: None,
            pass: 0,
            passes_completed: 0,
        }
    }

    pub fn state(&self) -> SoakState {
        self.state
    }

    fn transition(&mut self, next: SoakState) {
        if self.state == next {
            return;
        }
        debug!(from = %self.state, to = %next, pass = self.pass, "Soak state change");
        self.events.emit(
            STATE_CHANGED,
            &json!({ "from": self.state, "to": next, "pass": self.pass }),
        );
        self.state = next;
    }

    /// Run to completion. Teardown always runs, and the report is written
    /// to `<output_dir>/soak/report.json`.
    pub async fn run(mut self) -> SoakOutcome {
        let started_at = Utc::now();
        let clock = self.backends.clock.clone();
        let start = clock.now();
        let deadline = Deadline::after(clock.as_ref(), self.config.soak.test_timeout);

        info!(
            name = %self.config.soak.name,
            duration = %format_ddhhmmss(self.config.soak.test_timeout),
            smoke = self.config.is_smoke(),
            "<<SOAK test started>>"
        );
        self.events.emit(
            SOAK_STARTED,
            &json!({
                "name": self.config.soak.name,
                "test_timeout_secs": self.config.soak.test_timeout.as_secs(),
                "smoke": self.config.is_smoke(),
                "harassers": self.config.soak.harassers,
            }),
        );

        let executed = self.execute(deadline).await;
        self.teardown().await;

        let elapsed = clock.now().saturating_duration_since(start);
        let mut report = SoakReport::new(
            &self.config.soak.name,
            started_at,
            elapsed,
            self.passes_completed,
            &self.aggregator,
        );
        let result = match executed {
            Err(e) => {
                error!(code = %e.code(), "Soak run aborted: {e}");
                report = report.with_error(&e);
                Err(e)
            }
            Ok(()) => match self.aggregator.summary() {
                Some(summary) => {
                    error!("SOAK FAILED: {summary}");
                    Err(SoakError::RunFailed(summary))
                }
                None => Ok(()),
            },
        };

        let report_path = self.config.report_path();
        if let Err(e) = report.write_json(&report_path) {
            warn!(path = %report_path.display(), "Failed to write soak report: {e}");
        }

        self.transition(SoakState::Done);
        self.events.emit(
            SOAK_FINISHED,
            &json!({
                "passed": result.is_ok(),
                "passes_completed": self.passes_completed,
                "elapsed": report.elapsed,
            }),
        );
        info!(
            passes = self.passes_completed,
            elapsed = %report.elapsed,
            passed = result.is_ok(),
            "<<SOAK test finished>>"
        );

        SoakOutcome { report, result }
    }

    async fn execute(&mut self, deadline: Deadline) -> Result<(), SoakError> {
        self.config.ensure_valid()?;
        self.clients = self.config.eligible_clients()?;
        self.plans = self.config.job_plans()?;
        self.enabled = self.config.harasser_kinds()?;
        info!(clients = ?self.clients, "<<Updated client list>>");

        self.clean_log_dirs().await;
        self.setup_reserved().await?;

        let clock = self.backends.clock.clone();
        while !deadline.is_expired(clock.as_ref()) {
            self.pass += 1;
            if self.run_pass(deadline).await? == PassOutcome::Ran {
                self.passes_completed += 1;
            }
            if self.config.is_smoke() {
                info!("Smoke run: exiting after one pass");
                break;
            }
        }

        self.verify_reserved().await
    }

    async fn clean_log_dirs(&self) {
        let logs = &self.backends.logs;
        if let Err(e) = logs.clean(&self.clients, &self.config.soak.log_dir).await {
            warn!("Failed to clean remote log directories: {e}");
        }
        let local = self.config.soak.output_dir.join("soak");
        match tokio::fs::remove_dir_all(&local).await {
            Ok(()) => debug!(path = %local.display(), "Removed previous soak output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %local.display(), "Failed to clean soak output: {e}"),
        }
    }

    /// Create the reserved pool and write its known data exactly once.
    async fn setup_reserved(&mut self) -> Result<(), SoakError> {
        let storage = self.backends.storage.clone();
        let pool = self.pools.create_reserved(&self.config.reserved_pool).await?;
        let container = storage.create_container(&pool.id).await?;

        let mut objects = Vec::with_capacity(self.config.soak.reserved_objects);
        for idx in 0..self.config.soak.reserved_objects {
            let key = format!("reserved_{idx:04}");
            let data = random_payload(self.config.soak.payload_size);
            storage.write(&pool.id, &container, &key, &data).await?;
            objects.push((key, data));
        }
        info!(
            pool = %pool.id,
            container = %container,
            objects = objects.len(),
            "Reserved data written"
        );
        self.reserved = Some(ReservedData {
            pool,
            container,
            objects,
        });
        Ok(())
    }

    async fn run_pass(&mut self, deadline: Deadline) -> Result<PassOutcome, SoakError> {
        let clock = self.backends.clock.clone();
        let pass = self.pass;
        let pass_start = clock.now();
        self.transition(SoakState::RunningPass);
        info!(
            pass,
            remaining = %format_ddhhmmss(deadline.remaining(clock.as_ref())),
            "<<PASS {pass}: started>>"
        );
        let remaining_secs = deadline.remaining(clock.as_ref()).as_secs();
        self.events.emit(
            PASS_STARTED,
            &json!({ "pass": pass, "remaining_secs": remaining_secs }),
        );

        let remote_logs = self.config.pass_log_dir(pass);
        if let Err(e) = self.backends.logs.prepare(&self.clients, &remote_logs).await {
            warn!(pass, "Failed to create pass log directories: {e}");
        }

        let pool_infos = match self.pools.create_pass_pools(&self.config.pools).await {
            Ok(pools) => pools.to_vec(),
            Err(e) => {
                error!(pass, "Pass pool creation failed: {e}");
                self.aggregator
                    .record_pool_failure(pass, "create", e.to_string());
                self.destroy_pass_pools(pass).await;
                if e.is_fatal() {
                    return Err(e);
                }
                let backoff = self
                    .config
                    .soak
                    .poll_interval
                    .min(deadline.remaining(clock.as_ref()));
                clock.sleep(backoff).await;
                return Ok(PassOutcome::Skipped);
            }
        };

        let specs = match self.batch.build(pass, &self.plans, &pool_infos) {
            Ok(specs) => specs,
            Err(e) => {
                self.destroy_pass_pools(pass).await;
                return Err(e);
            }
        };

        let job_ids = match self.tracker.submit(&specs, deadline).await {
            Ok(ids) => ids,
            Err(SoakError::Scheduler { message, submitted }) => {
                self.aggregator.record_submitted(&submitted);
                self.aggregator.record_submission_failure(pass, message);
                self.tracker.cancel_jobs(&submitted).await;
                self.aggregator.record_forced_cancellation(pass, &submitted);
                self.tracker.store().remove(&submitted);
                self.finish_pass(pass, pass_start, &[]).await;
                return Ok(PassOutcome::Ran);
            }
            Err(e) => {
                self.destroy_pass_pools(pass).await;
                return Err(e);
            }
        };
        self.aggregator.record_submitted(&job_ids);
        self.events.emit(
            JOBS_SUBMITTED,
            &json!({ "pass": pass, "jobs": job_ids, "count": job_ids.len() }),
        );

        let harass = pass > 1 && !self.enabled.is_empty();
        let mut verdict = HarasserVerdict::default();
        let mut ran = Vec::new();
        if harass {
            self.transition(SoakState::Harassing);
            let plans = self.harasser_plans(&pool_infos);
            ran = plans.iter().map(HarasserPlan::kind).collect();
            self.harassers.launch(plans);
            verdict = self.harassers.join(self.config.soak.harasser_timeout).await;
        }

        self.transition(SoakState::AwaitingCompletion);
        let summary = self.tracker.await_completion(&job_ids, deadline).await;
        self.aggregator.record_completion(pass, &summary);
        for (job, state) in &summary.failed {
            warn!(pass, job = %job, state = ?state, "Job did not complete");
            self.events
                .emit(JOB_FAILED, &json!({ "pass": pass, "job": job, "state": state }));
        }

        if harass {
            self.aggregator.record_harassers(pass, &verdict);
            for (kind, status) in verdict.outcomes.iter().filter(|(_, s)| !s.is_success()) {
                let err = status.to_error(*kind);
                error!(pass, code = %err.code(), "{err}");
                self.events.emit(
                    HARASSER_FAILED,
                    &json!({ "pass": pass, "harasser": kind, "reason": status.to_string() }),
                );
            }
            if verdict.succeeded(HarasserKind::Rebuild) {
                self.enabled.retain(|k| *k != HarasserKind::Rebuild);
                info!(pass, "Rebuild harasser succeeded; disabled for the rest of the run");
            }
        }

        self.finish_pass(pass, pass_start, &ran).await;

        match verdict.corruption() {
            Some((kind, reason)) => Err(SoakError::snapshot_mismatch(format!(
                "{kind} harasser: {reason}"
            ))),
            None => Ok(PassOutcome::Ran),
        }
    }

    fn harasser_plans(&self, pass_pools: &[PoolInfo]) -> Vec<HarasserPlan> {
        self.enabled
            .iter()
            .filter_map(|kind| match kind {
                HarasserKind::Rebuild => Some(HarasserPlan::Rebuild {
                    pools: pass_pools.iter().map(|p| p.id.clone()).collect(),
                    ranks: self.config.rebuild.ranks.clone(),
                    timeout: self.config.rebuild.timeout,
                    poll_interval: self.config.rebuild.poll_interval,
                }),
                HarasserKind::Snapshot => self.reserved.as_ref().map(|r| HarasserPlan::Snapshot {
                    pool: r.pool.id.clone(),
                    payload_size: self.config.soak.payload_size,
                }),
            })
            .collect()
    }

    async fn finish_pass(
        &mut self,
        pass: u32,
        pass_start: tokio::time::Instant,
        harassers: &[HarasserKind],
    ) {
        self.transition(SoakState::Cleanup);
        self.destroy_pass_pools(pass).await;
        self.collect_logs(
            &self.config.pass_log_dir(pass),
            &self.config.pass_output_dir(pass),
        )
        .await;

        let took = self
            .backends
            .clock
            .now()
            .saturating_duration_since(pass_start);
        info!(pass, took = %format_ddhhmmss(took), "<<PASS {pass}: completed>>");
        self.events.emit(
            PASS_COMPLETED,
            &json!({
                "pass": pass,
                "duration": format_ddhhmmss(took),
                "harassers": harassers,
                "failures": self.aggregator.failures().len(),
            }),
        );
    }

    async fn destroy_pass_pools(&mut self, pass: u32) {
        for (pool, e) in self.pools.destroy_pass_pools().await {
            self.aggregator
                .record_pool_failure(pass, pool.to_string(), e.to_string());
        }
    }

    async fn collect_logs(&self, remote: &Path, local: &Path) {
        if let Err(e) = self.backends.logs.collect(&self.clients, remote, local).await {
            warn!(
                remote = %remote.display(),
                code = %ErrorCode::RunLogRetrievalFailed,
                "Log collection failed: {e}"
            );
        }
    }

    async fn verify_reserved(&self) -> Result<(), SoakError> {
        let Some(reserved) = &self.reserved else {
            return Ok(());
        };
        let storage = &self.backends.storage;
        for (key, expected) in &reserved.objects {
            let actual = storage
                .read(&reserved.pool.id, &reserved.container, key)
                .await
                .map_err(|e| {
                    SoakError::reserved_mismatch(format!(
                        "failed to read reserved object {key}: {e}"
                    ))
                })?;
            if &actual != expected {
                return Err(SoakError::reserved_mismatch(format!(
                    "Data verification error on reserved pool after soak completed: object {key} differs"
                )));
            }
        }
        info!(
            pool = %reserved.pool.id,
            objects = reserved.objects.len(),
            "Reserved pool data verified"
        );
        Ok(())
    }

    /// Cancel leftovers, remove pools and fetch logs. Never fails.
    async fn teardown(&mut self) {
        self.transition(SoakState::Cleanup);

        let outstanding = self.aggregator.outstanding();
        if !outstanding.is_empty() {
            warn!(count = outstanding.len(), "Cancelling jobs still outstanding at teardown");
            self.tracker.cancel_jobs(&outstanding).await;
            self.aggregator
                .record_forced_cancellation(self.pass, &outstanding);
            self.tracker.store().remove(&outstanding);
        }
        if let Err(e) = self.backends.scheduler.cancel_all().await {
            warn!("Scheduler cleanup failed: {e}");
        }

        if !self.pools.pass_pools().is_empty() {
            self.destroy_pass_pools(self.pass).await;
        }
        if let Some(reserved) = &self.reserved {
            let storage = &self.backends.storage;
            if let Err(e) = storage
                .destroy_container(&reserved.pool.id, &reserved.container)
                .await
            {
                warn!(pool = %reserved.pool.id, "Failed to destroy reserved container: {e}");
            }
        }
        if let Some(pool) = self.pools.reserved() {
            if let Err(e) = self.backends.storage.destroy_pool(&pool.id, true).await {
                warn!(pool = %pool.id, "Failed to destroy reserved pool: {e}");
            }
        }

        let local = self.config.soak.output_dir.join("soak");
        self.collect_logs(&self.config.soak.log_dir, &local).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Verdict;
    use soak_common::TokioClock;
    use soak_common::mock::{
        MockJobBehavior, MockLogCollector, MockScheduler, MockStorage, StorageFaults,
    };
    use std::time::Duration;

    struct Harness {
        scheduler: MockScheduler,
        storage: MockStorage,
        logs: MockLogCollector,
        events: EventBus,
        _dir: tempfile::TempDir,
        config: SoakConfig,
    }

    fn harness(soak_section: &str) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let toml = format!(
            r#"
[soak]
output_dir = "{out}"
log_dir = "/tmp/soak-logs"
poll_interval = "5s"
harasser_timeout = "60s"
{soak_section}

[cluster]
servers = ["srv1", "srv2"]
clients = ["cli1", "cli2"]

[rebuild]
ranks = [2]
timeout = "30s"
poll_interval = "1s"

[[pools]]
label = "pool_ior"

[[pools]]
label = "pool_fio"

[[jobs]]
name = "ior_easy"
command = "ior -np {{nprocs}} --dfs.pool {{pool}} --dfs.svcl {{svc}}"
nodes_per_job = [1, -1]
tasks_per_node = [2]

[[jobs]]
name = "fio_small"
command = "fio --pool {{pool}}"
"#,
            out = dir.path().display()
        );
        Harness {
            scheduler: MockScheduler::new(),
            storage: MockStorage::new(),
            logs: MockLogCollector::new(),
            events: EventBus::new(4096),
            config: SoakConfig::from_toml_str(&toml).unwrap(),
            _dir: dir,
        }
    }

    impl Harness {
        fn runner(&self) -> SoakRunner {
            SoakRunner::new(
                self.config.clone(),
                SoakBackends {
                    scheduler: Arc::new(self.scheduler.clone()),
                    storage: Arc::new(self.storage.clone()),
                    logs: Arc::new(self.logs.clone()),
                    clock: Arc::new(TokioClock),
                },
                self.events.clone(),
            )
        }
    }

    fn drain(
        rx: &mut tokio::sync::broadcast::Receiver<String>,
        event: &str,
    ) -> Vec<serde_json::Value> {
        let mut found = Vec::new();
        while let Ok(line) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&line).unwrap();
            if value["event"] == event {
                found.push(value["data"].clone());
            }
        }
        found
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserved_pool_stable_across_passes() {
        let h = harness(r#"test_timeout = "1m""#);
        let outcome = h.runner().run().await;

        assert!(outcome.result.is_ok(), "{:?}", outcome.result.err());
        assert!(outcome.report.passes_completed >= 3);

        let reserved = h.storage.created_pools()[0].clone();
        let submitted = h.scheduler.submitted();
        assert!(!submitted.is_empty());
        assert!(submitted.iter().all(|spec| spec.pool != reserved));

        let destroyed = h.storage.destroyed_pools();
        assert_eq!(destroyed.iter().filter(|p| **p == reserved).count(), 1);
        assert_eq!(destroyed.last(), Some(&reserved));
        assert!(h.storage.live_pools().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_smoke_runs_one_pass_and_writes_report() {
        let h = harness(
            r#"name = "soak_smoke"
test_timeout = "1h""#,
        );
        let outcome = h.runner().run().await;

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.report.passes_completed, 1);
        assert_eq!(outcome.report.verdict, Verdict::Passed);
        // ior grid (2 node counts × 1 ppn) plus one fio job
        assert_eq!(h.scheduler.submitted().len(), 3);
        assert!(h.config.report_path().is_file());
        assert_eq!(h.logs.collect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_removed_after_success() {
        let h = harness(
            r#"test_timeout = "1m"
harassers = ["rebuild", "snapshot"]"#,
        );
        let mut rx = h.events.subscribe();
        let outcome = h.runner().run().await;
        assert!(outcome.result.is_ok(), "{:?}", outcome.result.err());

        let passes = drain(&mut rx, PASS_COMPLETED);
        assert!(passes.len() >= 3);
        let harassers: Vec<Vec<String>> = passes
            .iter()
            .map(|p| serde_json::from_value(p["harassers"].clone()).unwrap())
            .collect();
        assert!(harassers[0].is_empty());
        assert_eq!(harassers[1], vec!["rebuild", "snapshot"]);
        for later in &harassers[2..] {
            assert_eq!(later, &vec!["snapshot".to_string()]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rebuild_stays_enabled() {
        let h = harness(
            r#"test_timeout = "1m"
harassers = ["rebuild"]"#,
        );
        h.storage.set_faults(StorageFaults {
            fail_rebuild: true,
            ..Default::default()
        });
        let mut rx = h.events.subscribe();
        let outcome = h.runner().run().await;

        match &outcome.result {
            Err(SoakError::RunFailed(summary)) => assert!(summary.contains("rebuild")),
            other => panic!("unexpected result {other:?}"),
        }
        let passes = drain(&mut rx, PASS_COMPLETED);
        assert!(passes.len() >= 3);
        for pass in &passes[1..] {
            let harassers: Vec<String> =
                serde_json::from_value(pass["harassers"].clone()).unwrap();
            assert_eq!(harassers, vec!["rebuild"]);
        }
        assert!(outcome.report.failed_harassers.len() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_create_failure_does_not_count_as_pass() {
        let h = harness(r#"test_timeout = "30s""#);
        h.storage.set_faults(StorageFaults {
            fail_pool_labels: vec!["pool_fio".into()],
            ..Default::default()
        });
        let outcome = h.runner().run().await;

        assert!(matches!(outcome.result, Err(SoakError::RunFailed(_))));
        assert_eq!(outcome.report.passes_completed, 0);
        assert!(h.scheduler.submitted().is_empty());
        assert!(h.storage.live_pools().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_pending_jobs_and_fails_run() {
        let h = harness(r#"test_timeout = "2m""#);
        h.scheduler.set_default(MockJobBehavior::Hang);
        let outcome = h.runner().run().await;

        let ids: Vec<_> = (1..=3).map(soak_common::JobId).collect();
        assert!(matches!(outcome.result, Err(SoakError::RunFailed(_))));
        assert_eq!(outcome.report.passes_completed, 1);
        assert_eq!(outcome.report.failed_jobs, ids);
        assert_eq!(outcome.report.cancelled_jobs, ids);
        assert_eq!(h.scheduler.cancelled(), ids);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_failure_recorded_and_run_continues() {
        let h = harness(r#"test_timeout = "30s""#);
        h.scheduler.push(MockJobBehavior::Hang);
        h.scheduler
            .push(MockJobBehavior::Reject("sbatch: error: invalid partition".into()));
        let outcome = h.runner().run().await;

        match &outcome.result {
            Err(SoakError::RunFailed(summary)) => assert!(summary.contains("invalid partition")),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(outcome.report.passes_completed >= 2);
        assert_eq!(outcome.report.failed_jobs, vec![soak_common::JobId(1)]);
        assert!(h.scheduler.cancelled().contains(&soak_common::JobId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_corruption_ends_run_after_cleanup() {
        let h = harness(
            r#"test_timeout = "10m"
harassers = ["snapshot"]"#,
        );
        h.storage.set_faults(StorageFaults {
            corrupt_snapshot_reads: true,
            ..Default::default()
        });
        let outcome = h.runner().run().await;

        match &outcome.result {
            Err(e @ SoakError::Verification { .. }) => {
                assert_eq!(e.code(), soak_common::ErrorCode::VerificationSnapshotMismatch);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(outcome.report.passes_completed, 1);
        assert_eq!(outcome.report.failed_harassers.len(), 1);
        assert_eq!(h.scheduler.cancel_all_calls(), 1);
        assert!(h.storage.live_pools().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserved_data_mismatch_is_fatal() {
        let h = harness(r#"name = "soak_smoke""#);
        h.storage.set_faults(StorageFaults {
            corrupt_reads: true,
            ..Default::default()
        });
        let outcome = h.runner().run().await;

        match &outcome.result {
            Err(e @ SoakError::Verification { message, .. }) => {
                assert!(message.contains("reserved"));
                assert_eq!(e.code(), soak_common::ErrorCode::VerificationReservedMismatch);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(outcome.report.error_code.as_deref(), Some("SOAK-E400"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserved_pool_failure_is_fatal_and_teardown_runs() {
        let h = harness(r#"test_timeout = "5m""#);
        h.storage.set_faults(StorageFaults {
            fail_pool_create: true,
            ..Default::default()
        });
        let outcome = h.runner().run().await;

        assert!(matches!(outcome.result, Err(SoakError::Storage(_))));
        assert_eq!(outcome.report.passes_completed, 0);
        assert!(h.scheduler.submitted().is_empty());
        assert_eq!(h.scheduler.cancel_all_calls(), 1);
        assert_eq!(h.logs.collect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_teardown_failure_recorded() {
        let h = harness(r#"name = "soak_smoke""#);
        let storage = h.storage.clone();
        let mut rx = h.events.subscribe();
        let runner = h.runner();
        let run = tokio::spawn(runner.run());
        // Fail destroys once jobs are submitted.
        loop {
            if !drain(&mut rx, JOBS_SUBMITTED).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        storage.update_faults(|f| f.fail_destroy = true);
        let outcome = run.await.unwrap();

        match &outcome.result {
            Err(SoakError::RunFailed(summary)) => assert!(summary.contains("pool")),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_client_only_nodes_is_config_error() {
        let mut h = harness(r#"name = "soak_smoke""#);
        h.config.cluster.clients = vec!["srv1".into()];
        let outcome = h.runner().run().await;

        assert!(matches!(outcome.result, Err(SoakError::Configuration { .. })));
        assert!(h.scheduler.submitted().is_empty());
        assert!(h.storage.created_pools().is_empty());
    }
}
