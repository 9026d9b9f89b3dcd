//! Run-wide failure accounting.

use serde::Serialize;
use soak_common::{HarasserKind, JobId, JobState};
use std::collections::BTreeSet;

use crate::harasser::HarasserVerdict;
use crate::tracker::CompletionSummary;

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureRecord {
    Job {
        pass: u32,
        job: JobId,
        state: Option<JobState>,
    },
    Harasser {
        pass: u32,
        harasser: HarasserKind,
        reason: String,
    },
    Submission {
        pass: u32,
        message: String,
    },
    Pool {
        pass: u32,
        pool: String,
        message: String,
    },
}

/// Accumulates failures across passes and tracks jobs still at the scheduler.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    failures: Vec<FailureRecord>,
    outstanding: BTreeSet<JobId>,
    cancelled: BTreeSet<JobId>,
    jobs_completed: usize,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track ids that the scheduler accepted.
    pub fn record_submitted(&mut self, jobs: &[JobId]) {
        self.outstanding.extend(jobs.iter().copied());
    }

    /// Fold a completion summary in; its ids are no longer outstanding.
    pub fn record_completion(&mut self, pass: u32, summary: &CompletionSummary) {
        for job in &summary.completed {
            self.outstanding.remove(job);
        }
        self.jobs_completed += summary.completed.len();
        for (job, state) in &summary.failed {
            self.outstanding.remove(job);
            self.failures.push(FailureRecord::Job {
                pass,
                job: *job,
                state: *state,
            });
        }
        self.cancelled.extend(summary.cancelled.iter().copied());
    }

    pub fn record_harassers(&mut self, pass: u32, verdict: &HarasserVerdict) {
        for (harasser, reason) in verdict.failures() {
            self.failures.push(FailureRecord::Harasser {
                pass,
                harasser,
                reason,
            });
        }
    }

    pub fn record_submission_failure(&mut self, pass: u32, message: impl Into<String>) {
        self.failures.push(FailureRecord::Submission {
            pass,
            message: message.into(),
        });
    }

    pub fn record_pool_failure(
        &mut self,
        pass: u32,
        pool: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.failures.push(FailureRecord::Pool {
            pass,
            pool: pool.into(),
            message: message.into(),
        });
    }

    /// Ids submitted but never aggregated; cancelled at teardown.
    pub fn outstanding(&self) -> Vec<JobId> {
        self.outstanding.iter().copied().collect()
    }

    /// Mark teardown-cancelled jobs as failed.
    pub fn record_forced_cancellation(&mut self, pass: u32, jobs: &[JobId]) {
        for job in jobs {
            if self.outstanding.remove(job) {
                self.cancelled.insert(*job);
                self.failures.push(FailureRecord::Job {
                    pass,
                    job: *job,
                    state: Some(JobState::Cancelled),
                });
            }
        }
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_job_ids(&self) -> Vec<JobId> {
        self.failures
            .iter()
            .filter_map(|f| match f {
                FailureRecord::Job { job, .. } => Some(*job),
                _ => None,
            })
            .collect()
    }

    pub fn failed_harassers(&self) -> Vec<String> {
        self.failures
            .iter()
            .filter_map(|f| match f {
                FailureRecord::Harasser {
                    pass,
                    harasser,
                    reason,
                } => Some(format!("pass {pass}: {harasser}: {reason}")),
                _ => None,
            })
            .collect()
    }

    pub fn cancelled(&self) -> Vec<JobId> {
        self.cancelled.iter().copied().collect()
    }

    pub fn jobs_completed(&self) -> usize {
        self.jobs_completed
    }

    /// One-line-per-problem summary, or None when the run was clean.
    pub fn summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let mut lines = Vec::new();
        let jobs = self.failed_job_ids();
        if !jobs.is_empty() {
            let ids: Vec<String> = jobs.iter().map(ToString::to_string).collect();
            lines.push(format!("The following jobs failed: {}", ids.join(", ")));
        }
        lines.extend(self.failed_harassers());
        for failure in &self.failures {
            match failure {
                FailureRecord::Submission { pass, message } => {
                    lines.push(format!("pass {pass}: submission: {message}"));
                }
                FailureRecord::Pool {
                    pass,
                    pool,
                    message,
                } => lines.push(format!("pass {pass}: pool {pool}: {message}")),
                _ => {}
            }
        }
        Some(lines.join("\n"))
    }
}
