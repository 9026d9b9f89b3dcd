//! Final run report.

use crate::aggregator::{FailureRecord, ResultAggregator};
use chrono::{DateTime, Utc};
use serde::Serialize;
use soak_common::JobId;
use soak_common::util::format_ddhhmmss;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Pass/fail verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
}

/// Summary written to `<output_dir>/soak/report.json` and printed at exit.
#[derive(Debug, Clone, Serialize)]
pub struct SoakReport {
    pub run_id: Uuid,
    pub name: String,
    pub verdict: Verdict,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Wall time in `N Day(s) HH:MM:SS` form.
    pub elapsed: String,
    pub passes_completed: u32,
    pub jobs_completed: usize,
    pub failed_jobs: Vec<JobId>,
    pub failed_harassers: Vec<String>,
    pub cancelled_jobs: Vec<JobId>,
    pub failures: Vec<FailureRecord>,
    /// Fatal error that ended the run early, if any.
    pub error: Option<String>,
    pub error_code: Option<String>,
}

impl SoakReport {
    pub fn new(
        name: &str,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        passes_completed: u32,
        aggregator: &ResultAggregator,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            name: name.to_string(),
            verdict: if aggregator.is_clean() {
                Verdict::Passed
            } else {
                Verdict::Failed
            },
            started_at,
            finished_at: Utc::now(),
            elapsed: format_ddhhmmss(elapsed),
            passes_completed,
            jobs_completed: aggregator.jobs_completed(),
            failed_jobs: aggregator.failed_job_ids(),
            failed_harassers: aggregator.failed_harassers(),
            cancelled_jobs: aggregator.cancelled(),
            failures: aggregator.failures().to_vec(),
            error: None,
            error_code: None,
        }
    }

    /// Mark the run failed because of a fatal error.
    pub fn with_error(mut self, error: &soak_common::SoakError) -> Self {
        self.verdict = Verdict::Failed;
        self.error = Some(error.to_string());
        self.error_code = Some(error.code().code_string());
        self
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    /// Human-readable summary for the terminal.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Soak {} ({}): {} after {} passes, elapsed {}\n",
            self.name,
            self.run_id,
            match self.verdict {
                Verdict::Passed => "PASSED",
                Verdict::Failed => "FAILED",
            },
            self.passes_completed,
            self.elapsed
        );
        if !self.failed_jobs.is_empty() {
            let ids: Vec<String> = self.failed_jobs.iter().map(ToString::to_string).collect();
            out.push_str(&format!("  failed jobs: {}\n", ids.join(", ")));
        }
        for harasser in &self.failed_harassers {
            out.push_str(&format!("  harasser {harasser}\n"));
        }
        if let (Some(code), Some(error)) = (&self.error_code, &self.error) {
            out.push_str(&format!("  [{code}] {error}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::CompletionSummary;
    use soak_common::{JobState, SoakError};

    #[test]
    fn test_report_from_failed_run() {
        let mut agg = ResultAggregator::new();
        agg.record_submitted(&[JobId(1), JobId(2)]);
        agg.record_completion(
            1,
            &CompletionSummary {
                completed: vec![JobId(1)],
                failed: vec![(JobId(2), Some(JobState::Failed))],
                cancelled: Vec::new(),
                timed_out: false,
            },
        );
        let report = SoakReport::new("soak", Utc::now(), Duration::from_secs(3661), 1, &agg);
        assert!(!report.passed());
        assert_eq!(report.failed_jobs, vec![JobId(2)]);
        assert_eq!(report.elapsed, "0 Days 01:01:01");
        assert!(report.render().contains("failed jobs: 2"));
    }

    #[test]
    fn test_fatal_error_fails_clean_run() {
        let agg = ResultAggregator::new();
        let report = SoakReport::new("soak", Utc::now(), Duration::ZERO, 0, &agg)
            .with_error(&SoakError::reserved_mismatch("reserved data mismatch"));
        assert!(!report.passed());
        assert_eq!(report.error_code.as_deref(), Some("SOAK-E400"));
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("soak/report.json");
        let agg = ResultAggregator::new();
        let report = SoakReport::new("soak_smoke", Utc::now(), Duration::from_secs(5), 1, &agg);
        report.write_json(&path).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["verdict"], "passed");
        assert_eq!(parsed["passes_completed"], 1);
        assert!(parsed["run_id"].as_str().is_some());
    }
}
