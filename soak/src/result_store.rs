//! Shared job-state map written by scheduler callbacks and read by the loop.

use soak_common::{JobId, JobNotifier, JobState};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

/// Mapping from job id to its latest accepted state.
///
/// Uses a std mutex so schedulers may report from threads outside the tokio
/// runtime. Every update is one read-modify-write under the lock.
#[derive(Debug, Default)]
pub struct ResultStore {
    inner: Mutex<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    states: HashMap<JobId, JobState>,
    /// Ids already aggregated. Late reports for them are dropped.
    retired: HashSet<JobId>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a state for `job`. Returns false when the update was ignored
    /// because it would move the job backwards or the job was already removed.
    pub fn record(&self, job: JobId, state: JobState) -> bool {
        let mut entries = self.lock();
        if entries.retired.contains(&job) {
            trace!(job = %job, ignored = %state, "Report for removed job ignored");
            return false;
        }
        match entries.states.get(&job) {
            Some(current) if !current.accepts(state) => {
                trace!(job = %job, current = %current, ignored = %state, "Stale job state ignored");
                false
            }
            _ => {
                entries.states.insert(job, state);
                true
            }
        }
    }

    pub fn state(&self, job: JobId) -> Option<JobState> {
        self.lock().states.get(&job).copied()
    }

    /// Whether every id has a terminal entry.
    pub fn all_terminal(&self, jobs: &[JobId]) -> bool {
        let entries = self.lock();
        jobs.iter()
            .all(|job| entries.states.get(job).is_some_and(|s| s.is_terminal()))
    }

    /// Ids without a terminal entry.
    pub fn unresolved(&self, jobs: &[JobId]) -> Vec<JobId> {
        let entries = self.lock();
        jobs.iter()
            .filter(|job| !entries.states.get(job).is_some_and(|s| s.is_terminal()))
            .copied()
            .collect()
    }

    /// Drop entries once they have been aggregated. Any later report for
    /// these ids is ignored.
    pub fn remove(&self, jobs: &[JobId]) {
        let mut entries = self.lock();
        for job in jobs {
            entries.states.remove(job);
            entries.retired.insert(*job);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().states.is_empty()
    }
}

impl JobNotifier for ResultStore {
    fn notify(&self, job: JobId, state: &str) {
        let mapped = JobState::from_scheduler(state);
        if self.record(job, mapped) {
            debug!(job = %job, raw = state, state = %mapped, "Job state updated");
        }
    }
}
