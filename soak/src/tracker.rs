//! Job submission and completion tracking.

use crate::result_store::ResultStore;
use soak_common::{
    CancelStatus, Clock, Deadline, ErrorCode, JobId, JobNotifier, JobSpec, JobState, Scheduler,
    SoakError,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of waiting for a batch of jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionSummary {
    pub completed: Vec<JobId>,
    /// Jobs that did not complete, with the last state seen (None if the
    /// scheduler never reported one).
    pub failed: Vec<(JobId, Option<JobState>)>,
    /// Jobs cancelled because the deadline passed.
    pub cancelled: Vec<JobId>,
    pub timed_out: bool,
}

impl CompletionSummary {
    pub fn failed_ids(&self) -> Vec<JobId> {
        self.failed.iter().map(|(id, _)| *id).collect()
    }
}

/// Submits job specs and waits for them against the run deadline.
pub struct JobTracker {
    scheduler: Arc<dyn Scheduler>,
    store: Arc<ResultStore>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl JobTracker {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        store: Arc<ResultStore>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            store,
            clock,
            poll_interval,
        }
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// Submit every spec, stopping at the first failure.
    ///
    /// The error carries the ids accepted before the failure. Nothing is
    /// submitted once the deadline has passed.
    pub async fn submit(
        &self,
        specs: &[JobSpec],
        deadline: Deadline,
    ) -> Result<Vec<JobId>, SoakError> {
        if deadline.is_expired(self.clock.as_ref()) {
            warn!("Soak deadline reached; no jobs submitted");
            return Ok(Vec::new());
        }

        let notifier: Arc<dyn JobNotifier> = self.store.clone();
        let mut submitted = Vec::with_capacity(specs.len());
        for spec in specs {
            match self.scheduler.submit(spec, notifier.clone()).await {
                Ok(id) => {
                    debug!(job = %id, name = %spec.job_name, pool = %spec.pool, "Job submitted");
                    submitted.push(id);
                }
                Err(e) => {
                    warn!(
                        name = %spec.job_name,
                        accepted = submitted.len(),
                        "Job submission failed: {e}"
                    );
                    return Err(SoakError::scheduler(
                        format!("failed to submit {}: {e}", spec.job_name),
                        submitted,
                    ));
                }
            }
        }
        info!(count = submitted.len(), "Submitted jobs");
        Ok(submitted)
    }

    /// Poll until every job is terminal or the deadline passes.
    ///
    /// On expiry every unresolved job is cancelled and counted as failed.
    /// The ids are removed from the store before returning.
    pub async fn await_completion(&self, jobs: &[JobId], deadline: Deadline) -> CompletionSummary {
        let clock = self.clock.as_ref();
        let mut summary = CompletionSummary::default();

        loop {
            if self.store.all_terminal(jobs) {
                break;
            }
            if deadline.is_expired(clock) {
                summary.timed_out = true;
                break;
            }
            let wait = self.poll_interval.min(deadline.remaining(clock));
            clock.sleep(wait).await;
        }

        if summary.timed_out {
            let unresolved = self.store.unresolved(jobs);
            warn!(
                count = unresolved.len(),
                code = %ErrorCode::SchedulerJobTimedOut,
                "Deadline reached; cancelling unfinished jobs"
            );
            self.cancel_jobs(&unresolved).await;
            summary.cancelled = unresolved;
        }

        for &job in jobs {
            let state = self.store.state(job);
            if state == Some(JobState::Completed) && !summary.cancelled.contains(&job) {
                summary.completed.push(job);
            } else {
                summary.failed.push((job, state));
            }
        }
        self.store.remove(jobs);
        summary
    }

    /// Request cancellation of every id. Failures are logged, not returned.
    pub async fn cancel_jobs(&self, jobs: &[JobId]) -> Vec<JobId> {
        let mut cancelled = Vec::new();
        for &job in jobs {
            match self.scheduler.cancel(job).await {
                Ok(CancelStatus::Cancelled) => {
                    info!(job = %job, "Job cancelled");
                    cancelled.push(job);
                }
                Ok(CancelStatus::NotActive) => debug!(job = %job, "Job no longer active"),
                Err(e) => warn!(
                    job = %job,
                    code = %ErrorCode::SchedulerCancelFailed,
                    "Failed to cancel job: {e}"
                ),
            }
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soak_common::mock::{MockJobBehavior, MockScheduler};
    use soak_common::{ManualClock, PoolId, TokioClock};

    fn spec(name: &str) -> JobSpec {
        JobSpec {
            job_name: name.to_string(),
            family: "ior".to_string(),
            pool: PoolId::new("pool-1"),
            nodes: 1,
            tasks_per_node: 2,
            command: "ior".to_string(),
            log_name: name.to_string(),
            log_dir: std::path::PathBuf::from("/tmp/soak/pass1"),
        }
    }

    fn tracker(scheduler: &MockScheduler, clock: Arc<dyn Clock>) -> JobTracker {
        JobTracker::new(
            Arc::new(scheduler.clone()),
            Arc::new(ResultStore::new()),
            clock,
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_output_lists_only_failed_job() {
        let scheduler = MockScheduler::new();
        scheduler.push(MockJobBehavior::completed());
        scheduler.push(MockJobBehavior::failed());
        scheduler.push(MockJobBehavior::completed());
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let tracker = tracker(&scheduler, clock.clone());
        let deadline = Deadline::after(clock.as_ref(), Duration::from_secs(600));

        let ids = tracker
            .submit(&[spec("a"), spec("b"), spec("c")], deadline)
            .await
            .unwrap();
        assert_eq!(ids, vec![JobId(1), JobId(2), JobId(3)]);

        let summary = tracker.await_completion(&ids, deadline).await;
        assert_eq!(summary.failed_ids(), vec![JobId(2)]);
        assert_eq!(summary.completed, vec![JobId(1), JobId(3)]);
        assert!(!summary.timed_out);
        assert!(tracker.store().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_cancels_pending_jobs() {
        let scheduler = MockScheduler::new();
        scheduler.set_default(MockJobBehavior::Hang);
        let clock = Arc::new(ManualClock::new());
        let tracker = tracker(&scheduler, clock.clone());
        let deadline = Deadline::after(clock.as_ref(), Duration::from_secs(60));

        let ids = tracker.submit(&[spec("a"), spec("b")], deadline).await.unwrap();
        let summary = tracker.await_completion(&ids, deadline).await;

        assert!(summary.timed_out);
        assert_eq!(summary.cancelled, ids);
        assert_eq!(summary.failed_ids(), ids);
        assert_eq!(scheduler.cancelled(), ids);
        assert!(deadline.is_expired(clock.as_ref()));

        // The scheduler confirms the cancellation after aggregation.
        tracker.store().notify(ids[0], "CANCELLED");
        assert!(tracker.store().is_empty());
    }

    #[tokio::test]
    async fn test_submit_failure_carries_accepted_ids() {
        let scheduler = MockScheduler::new();
        scheduler.push(MockJobBehavior::completed());
        scheduler.push(MockJobBehavior::Reject("sbatch: invalid partition".into()));
        let clock = Arc::new(ManualClock::new());
        let tracker = tracker(&scheduler, clock.clone());
        let deadline = Deadline::after(clock.as_ref(), Duration::from_secs(60));

        let err = tracker
            .submit(&[spec("a"), spec("b"), spec("c")], deadline)
            .await
            .unwrap_err();
        match err {
            SoakError::Scheduler { submitted, .. } => assert_eq!(submitted, vec![JobId(1)]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(scheduler.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_after_deadline_is_empty() {
        let scheduler = MockScheduler::new();
        let clock = Arc::new(ManualClock::new());
        let tracker = tracker(&scheduler, clock.clone());
        let deadline = Deadline::after(clock.as_ref(), Duration::from_secs(1));
        clock.advance(Duration::from_secs(2));

        let ids = tracker.submit(&[spec("a")], deadline).await.unwrap();
        assert!(ids.is_empty());
        assert!(scheduler.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_reports_from_foreign_threads_resolve_jobs() {
        let scheduler = MockScheduler::new();
        scheduler.set_default(MockJobBehavior::FinishFromThread {
            state: "COMPLETED".into(),
        });
        let clock = Arc::new(ManualClock::new());
        let tracker = tracker(&scheduler, clock.clone());
        let deadline = Deadline::after(clock.as_ref(), Duration::from_secs(3600));

        let ids = tracker
            .submit(&[spec("a"), spec("b"), spec("c")], deadline)
            .await
            .unwrap();
        // Threads finish in real time; the manual clock only bounds polling.
        for _ in 0..200 {
            if tracker.store().all_terminal(&ids) {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let summary = tracker.await_completion(&ids, deadline).await;
        assert_eq!(summary.completed, ids);
        assert!(summary.failed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_k_jobs_resolve_or_cancel_in_bounded_time() {
        let scheduler = MockScheduler::new();
        for i in 0..6u64 {
            if i % 3 == 0 {
                scheduler.push(MockJobBehavior::Hang);
            } else {
                scheduler.push(MockJobBehavior::after("COMPLETED", Duration::from_secs(10 * i)));
            }
        }
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let tracker = tracker(&scheduler, clock.clone());
        let start = clock.now();
        let deadline = Deadline::after(clock.as_ref(), Duration::from_secs(120));
        let specs: Vec<_> = (0..6).map(|i| spec(&format!("job{i}"))).collect();

        let ids = tracker.submit(&specs, deadline).await.unwrap();
        let summary = tracker.await_completion(&ids, deadline).await;

        assert_eq!(summary.completed.len() + summary.failed.len(), 6);
        assert_eq!(summary.cancelled, vec![JobId(1), JobId(4)]);
        assert!(clock.now() - start <= Duration::from_secs(125));
    }
}
