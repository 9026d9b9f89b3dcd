//! Fault-injection routines run alongside a pass's jobs.
//!
//! Each harasser runs as its own tokio task and reports one outcome over a
//! channel created per launch. `join` waits for the outcomes up to a timeout;
//! tasks still running after that are left detached and counted as failed.

use serde::Serialize;
use soak_common::util::random_payload;
use soak_common::{
    Clock, ContainerId, ErrorCode, HarasserKind, PoolId, RebuildStatus, SoakError,
    StorageControl, StorageError,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// One harasser to run, with everything it needs resolved up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarasserPlan {
    /// Exclude `ranks` on each pool in turn and wait for rebuild.
    Rebuild {
        pools: Vec<PoolId>,
        ranks: Vec<u32>,
        timeout: Duration,
        poll_interval: Duration,
    },
    /// Snapshot consistency check in a temporary container on `pool`.
    Snapshot { pool: PoolId, payload_size: usize },
}

impl HarasserPlan {
    pub fn kind(&self) -> HarasserKind {
        match self {
            Self::Rebuild { .. } => HarasserKind::Rebuild,
            Self::Snapshot { .. } => HarasserKind::Snapshot,
        }
    }
}

/// Final status of one harasser in a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum HarasserStatus {
    Passed,
    Failed(String),
    /// Still running when the join timeout expired.
    TimedOut,
    /// The task ended without reporting.
    Crashed,
    /// Data read back did not match what was written.
    Corrupted(String),
}

impl HarasserStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Catalog code for a non-passing status. Only a join timeout counts as
    /// `HarasserTimedOut`; timeouts inside the routine are plain failures.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::TimedOut => ErrorCode::HarasserTimedOut,
            Self::Corrupted(_) => ErrorCode::VerificationSnapshotMismatch,
            Self::Passed | Self::Failed(_) | Self::Crashed => ErrorCode::HarasserFailed,
        }
    }

    pub fn to_error(&self, kind: HarasserKind) -> SoakError {
        SoakError::harasser(self.error_code(), kind.to_string(), self.to_string())
    }
}

impl fmt::Display for HarasserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Crashed => write!(f, "task ended without reporting"),
            Self::Corrupted(reason) => write!(f, "data corruption: {reason}"),
        }
    }
}

/// Outcomes of every harasser launched for a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarasserVerdict {
    pub outcomes: BTreeMap<HarasserKind, HarasserStatus>,
}

impl HarasserVerdict {
    /// True when every harasser reported success in time.
    pub fn passed(&self) -> bool {
        self.outcomes.values().all(HarasserStatus::is_success)
    }

    pub fn succeeded(&self, kind: HarasserKind) -> bool {
        self.outcomes
            .get(&kind)
            .is_some_and(HarasserStatus::is_success)
    }

    /// First corruption reported, if any.
    pub fn corruption(&self) -> Option<(HarasserKind, &str)> {
        self.outcomes.iter().find_map(|(kind, status)| match status {
            HarasserStatus::Corrupted(reason) => Some((*kind, reason.as_str())),
            _ => None,
        })
    }

    pub fn failures(&self) -> Vec<(HarasserKind, String)> {
        self.outcomes
            .iter()
            .filter(|(_, status)| !status.is_success())
            .map(|(kind, status)| (*kind, status.to_string()))
            .collect()
    }
}

type Outcome = (HarasserKind, HarasserStatus);

/// Sends the task's outcome; reports `Crashed` if dropped without one, which
/// covers panics inside the harasser.
struct OutcomeReporter {
    kind: HarasserKind,
    tx: Option<mpsc::UnboundedSender<Outcome>>,
}

impl OutcomeReporter {
    fn report(mut self, status: HarasserStatus) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send((self.kind, status));
        }
    }
}

impl Drop for OutcomeReporter {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send((self.kind, HarasserStatus::Crashed));
        }
    }
}

struct Launched {
    kinds: Vec<HarasserKind>,
    rx: mpsc::UnboundedReceiver<Outcome>,
}

/// Launches harassers and folds their outcomes into a verdict.
pub struct HarasserCoordinator {
    storage: Arc<dyn StorageControl>,
    clock: Arc<dyn Clock>,
    launched: Option<Launched>,
}

impl HarasserCoordinator {
    pub fn new(storage: Arc<dyn StorageControl>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            launched: None,
        }
    }

    /// Spawn one task per plan. A fresh channel is used per launch, so late
    /// reports from earlier passes are never mistaken for current ones.
    pub fn launch(&mut self, plans: Vec<HarasserPlan>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut kinds = Vec::with_capacity(plans.len());

        for plan in plans {
            let kind = plan.kind();
            kinds.push(kind);
            let reporter = OutcomeReporter {
                kind,
                tx: Some(tx.clone()),
            };
            let storage = self.storage.clone();
            let clock = self.clock.clone();
            info!(harasser = %kind, "Launching harasser");
            tokio::spawn(async move {
                let status = run_plan(plan, storage.as_ref(), clock.as_ref()).await;
                reporter.report(status);
            });
        }

        self.launched = Some(Launched { kinds, rx });
    }

    pub fn is_running(&self) -> bool {
        self.launched.is_some()
    }

    /// Wait for every launched harasser, at most `timeout`.
    pub async fn join(&mut self, timeout: Duration) -> HarasserVerdict {
        let mut verdict = HarasserVerdict::default();
        let Some(Launched { kinds, mut rx }) = self.launched.take() else {
            return verdict;
        };

        let mut pending = kinds;
        let mut expired = false;
        let sleep = self.clock.sleep(timeout);
        tokio::pin!(sleep);

        while !pending.is_empty() {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some((kind, status)) => {
                        pending.retain(|k| *k != kind);
                        debug!(harasser = %kind, %status, "Harasser reported");
                        verdict.outcomes.insert(kind, status);
                    }
                    None => break,
                },
                _ = &mut sleep => {
                    expired = true;
                    break;
                }
            }
        }

        for kind in pending {
            let status = if expired {
                HarasserStatus::TimedOut
            } else {
                HarasserStatus::Crashed
            };
            warn!(
                harasser = %kind,
                %status,
                "Harasser did not report in time; leaving it detached"
            );
            verdict.outcomes.insert(kind, status);
        }
        verdict
    }
}

async fn run_plan(
    plan: HarasserPlan,
    storage: &dyn StorageControl,
    clock: &dyn Clock,
) -> HarasserStatus {
    match plan {
        HarasserPlan::Rebuild {
            pools,
            ranks,
            timeout,
            poll_interval,
        } => rebuild(storage, clock, &pools, &ranks, timeout, poll_interval).await,
        HarasserPlan::Snapshot { pool, payload_size } => {
            snapshot(storage, &pool, payload_size).await
        }
    }
}

// ── Rebuild ───────────────────────────────────────────────────────────────

async fn rebuild(
    storage: &dyn StorageControl,
    clock: &dyn Clock,
    pools: &[PoolId],
    ranks: &[u32],
    timeout: Duration,
    poll_interval: Duration,
) -> HarasserStatus {
    for pool in pools {
        info!(pool = %pool, ?ranks, "Excluding ranks to start rebuild");
        if let Err(e) = storage.exclude_ranks(pool, ranks).await {
            error!(pool = %pool, "Rank exclusion failed: {e}");
            return HarasserStatus::Failed(format!("exclude on {pool}: {e}"));
        }

        let started = wait_for_rebuild(storage, clock, pool, timeout, poll_interval, |status| {
            matches!(status, RebuildStatus::InProgress | RebuildStatus::Completed)
        });
        if let Err(reason) = started.await {
            return HarasserStatus::Failed(format!("rebuild did not start on {pool}: {reason}"));
        }
        debug!(pool = %pool, "Rebuild started");

        let done = wait_for_rebuild(storage, clock, pool, timeout, poll_interval, |status| {
            matches!(status, RebuildStatus::Completed)
        });
        if let Err(reason) = done.await {
            return HarasserStatus::Failed(format!("rebuild did not complete on {pool}: {reason}"));
        }
        info!(pool = %pool, "Rebuild completed");
    }
    HarasserStatus::Passed
}

async fn wait_for_rebuild(
    storage: &dyn StorageControl,
    clock: &dyn Clock,
    pool: &PoolId,
    timeout: Duration,
    poll_interval: Duration,
    reached: impl Fn(&RebuildStatus) -> bool,
) -> Result<(), String> {
    let end = clock.now() + timeout;
    loop {
        match storage.rebuild_status(pool).await {
            Ok(RebuildStatus::Failed(reason)) => return Err(reason),
            Ok(status) if reached(&status) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
        if clock.now() >= end {
            return Err(format!("timed out after {}", humantime::format_duration(timeout)));
        }
        clock.sleep(poll_interval).await;
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────

async fn snapshot(
    storage: &dyn StorageControl,
    pool: &PoolId,
    payload_size: usize,
) -> HarasserStatus {
    let container = match storage.create_container(pool).await {
        Ok(container) => container,
        Err(e) => return HarasserStatus::Failed(format!("create container: {e}")),
    };

    let status = snapshot_round_trip(storage, pool, &container, payload_size).await;

    if let Err(e) = storage.destroy_container(pool, &container).await {
        warn!(pool = %pool, container = %container, "Failed to destroy snapshot container: {e}");
        if status.is_success() {
            return HarasserStatus::Failed(format!("destroy container: {e}"));
        }
    }
    status
}

async fn snapshot_round_trip(
    storage: &dyn StorageControl,
    pool: &PoolId,
    container: &ContainerId,
    payload_size: usize,
) -> HarasserStatus {
    let key = format!(
        "{}/{}",
        String::from_utf8_lossy(&random_payload(5)),
        String::from_utf8_lossy(&random_payload(5))
    );
    let original = random_payload(payload_size);

    if let Err(e) = storage.write(pool, container, &key, &original).await {
        return HarasserStatus::Failed(format!("write original: {e}"));
    }
    let handle = match storage.create_snapshot(pool, container).await {
        Ok(handle) => handle,
        Err(e) => return HarasserStatus::Failed(format!("create snapshot: {e}")),
    };
    debug!(pool = %pool, container = %container, epoch = handle.0, "Snapshot created");

    let status = async {
        let mut newer = random_payload(payload_size);
        while newer == original {
            newer = random_payload(payload_size);
        }
        storage.write(pool, container, &key, &newer).await?;
        let seen = storage.read_at_snapshot(pool, container, handle, &key).await?;
        Ok::<_, StorageError>(if seen == original {
            HarasserStatus::Passed
        } else if seen == newer {
            HarasserStatus::Corrupted(
                "snapshot read returned data written after the snapshot".into(),
            )
        } else {
            HarasserStatus::Corrupted("snapshot read returned unexpected data".into())
        })
    }
    .await
    .unwrap_or_else(|e| HarasserStatus::Failed(format!("snapshot check: {e}")));

    if let Err(e) = storage.destroy_snapshot(pool, container, handle).await {
        warn!(pool = %pool, container = %container, "Failed to destroy snapshot: {e}");
        if status.is_success() {
            return HarasserStatus::Failed(format!("destroy snapshot: {e}"));
        }
    }
    if let HarasserStatus::Corrupted(reason) = &status {
        error!(pool = %pool, "{reason}");
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use soak_common::mock::{MockStorage, StorageFaults};
    use soak_common::{PoolSpec, TokioClock};

    async fn storage_with_pool() -> (MockStorage, PoolId) {
        let storage = MockStorage::new();
        let pool = storage
            .create_pool(&PoolSpec {
                label: "pool_reserved".into(),
                scm_size: "1G".into(),
                nvme_size: None,
                ranks: Vec::new(),
            })
            .await
            .unwrap()
            .id;
        (storage, pool)
    }

    fn coordinator(storage: &MockStorage) -> HarasserCoordinator {
        HarasserCoordinator::new(Arc::new(storage.clone()), Arc::new(TokioClock))
    }

    fn rebuild_plan(pool: &PoolId) -> HarasserPlan {
        HarasserPlan::Rebuild {
            pools: vec![pool.clone()],
            ranks: vec![1],
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reads_original_payload() {
        let (storage, pool) = storage_with_pool().await;
        let mut coordinator = coordinator(&storage);
        coordinator.launch(vec![HarasserPlan::Snapshot {
            pool: pool.clone(),
            payload_size: 500,
        }]);
        let verdict = coordinator.join(Duration::from_secs(30)).await;

        assert!(verdict.passed(), "{verdict:?}");
        assert!(verdict.succeeded(HarasserKind::Snapshot));
        assert_eq!(storage.container_count(&pool), 0);
        assert_eq!(storage.snapshot_count(&pool), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_corruption_detected_and_cleaned_up() {
        let (storage, pool) = storage_with_pool().await;
        storage.set_faults(StorageFaults {
            corrupt_snapshot_reads: true,
            ..Default::default()
        });
        let mut coordinator = coordinator(&storage);
        coordinator.launch(vec![HarasserPlan::Snapshot {
            pool: pool.clone(),
            payload_size: 64,
        }]);
        let verdict = coordinator.join(Duration::from_secs(30)).await;

        assert!(!verdict.passed());
        let (kind, reason) = verdict.corruption().unwrap();
        assert_eq!(kind, HarasserKind::Snapshot);
        assert!(reason.contains("after the snapshot"));
        assert_eq!(storage.container_count(&pool), 0);
        assert_eq!(storage.snapshot_count(&pool), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_harasser_times_out_without_blocking() {
        let (storage, pool) = storage_with_pool().await;
        storage.set_faults(StorageFaults {
            hang_snapshot: true,
            ..Default::default()
        });
        let mut coordinator = coordinator(&storage);
        let start = tokio::time::Instant::now();
        coordinator.launch(vec![
            HarasserPlan::Snapshot {
                pool: pool.clone(),
                payload_size: 16,
            },
            rebuild_plan(&pool),
        ]);
        let verdict = coordinator.join(Duration::from_secs(30)).await;

        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(31));
        assert_eq!(
            verdict.outcomes.get(&HarasserKind::Snapshot),
            Some(&HarasserStatus::TimedOut)
        );
        assert_eq!(
            HarasserStatus::TimedOut.to_error(HarasserKind::Snapshot).code(),
            ErrorCode::HarasserTimedOut
        );
        assert!(verdict.succeeded(HarasserKind::Rebuild));
        assert!(!verdict.passed());
        assert!(!coordinator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_failure_reported() {
        let (storage, pool) = storage_with_pool().await;
        storage.set_faults(StorageFaults {
            fail_rebuild: true,
            ..Default::default()
        });
        let mut coordinator = coordinator(&storage);
        coordinator.launch(vec![rebuild_plan(&pool)]);
        let verdict = coordinator.join(Duration::from_secs(120)).await;

        let failures = verdict.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, HarasserKind::Rebuild);
        assert!(failures[0].1.contains("did not complete"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_failure_skips_remaining_pools() {
        let (storage, first) = storage_with_pool().await;
        let second = storage
            .create_pool(&PoolSpec {
                label: "pool_ior".into(),
                scm_size: "1G".into(),
                nvme_size: None,
                ranks: Vec::new(),
            })
            .await
            .unwrap()
            .id;
        storage.set_faults(StorageFaults {
            fail_rebuild: true,
            ..Default::default()
        });
        let mut coordinator = coordinator(&storage);
        coordinator.launch(vec![HarasserPlan::Rebuild {
            pools: vec![first.clone(), second.clone()],
            ranks: vec![1],
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
        }]);
        let verdict = coordinator.join(Duration::from_secs(120)).await;

        match verdict.outcomes.get(&HarasserKind::Rebuild) {
            Some(status @ HarasserStatus::Failed(reason)) => {
                assert!(reason.contains(&first.to_string()), "{reason}");
                assert_eq!(status.error_code(), ErrorCode::HarasserFailed);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(
            storage.rebuild_status(&second).await.unwrap(),
            RebuildStatus::NotStarted
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_rebuild_hits_its_own_timeout() {
        let (storage, pool) = storage_with_pool().await;
        storage.set_faults(StorageFaults {
            stall_rebuild: true,
            ..Default::default()
        });
        let mut coordinator = coordinator(&storage);
        coordinator.launch(vec![rebuild_plan(&pool)]);
        let verdict = coordinator.join(Duration::from_secs(300)).await;

        match verdict.outcomes.get(&HarasserKind::Rebuild) {
            Some(status @ HarasserStatus::Failed(reason)) => {
                assert!(reason.contains("timed out"));
                // A timeout inside the routine is not a join timeout.
                assert_eq!(status.error_code(), ErrorCode::HarasserFailed);
                assert_eq!(
                    status.to_error(HarasserKind::Rebuild).code(),
                    ErrorCode::HarasserFailed
                );
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_without_launch_is_empty() {
        let (storage, _) = storage_with_pool().await;
        let mut coordinator = coordinator(&storage);
        let verdict = coordinator.join(Duration::from_secs(1)).await;
        assert!(verdict.outcomes.is_empty());
        assert!(verdict.passed());
    }
}
