//! Error catalog for the soak harness.
//!
//! Every failure the harness can report maps to a stable `SOAK-Exxx` code
//! with a message and remediation steps, so run reports and logs can be
//! grepped across long campaigns.
//!
//! # Error Code Ranges
//!
//! | Range      | Category     | Description                                |
//! |------------|--------------|--------------------------------------------|
//! | E001-E099  | Config       | Configuration and node/pool eligibility    |
//! | E100-E199  | Scheduler    | Job submission, tracking and cancellation  |
//! | E200-E299  | Storage      | Storage control-plane operations           |
//! | E300-E399  | Harasser     | Fault-injection routines                   |
//! | E400-E499  | Verification | Data integrity checks                      |
//! | E500-E599  | Run          | Aggregated run results and teardown        |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering every soak failure scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E099)
    // =========================================================================
    /// Configuration file could not be read
    ConfigReadError,
    /// Configuration file contains invalid TOML
    ConfigParseError,
    /// Configuration contains invalid values
    ConfigValidationError,
    /// Environment override has an invalid value
    ConfigEnvError,
    /// No client-only nodes remain after removing servers
    ConfigNoClients,
    /// A job needs more client nodes than available
    ConfigInsufficientNodes,
    /// More job families than pools in a pass
    ConfigInsufficientPools,

    // =========================================================================
    // Scheduler Errors (E100-E199)
    // =========================================================================
    /// Batch submission failed
    SchedulerSubmitFailed,
    /// Cancellation request failed
    SchedulerCancelFailed,
    /// Job did not finish before the run deadline
    SchedulerJobTimedOut,

    // =========================================================================
    // Storage Errors (E200-E299)
    // =========================================================================
    /// Control-plane operation failed
    StorageOperationFailed,
    /// Pool teardown failed
    StoragePoolTeardownFailed,

    // =========================================================================
    // Harasser Errors (E300-E399)
    // =========================================================================
    /// Harasser reported a failed outcome
    HarasserFailed,
    /// Harasser did not finish within its timeout
    HarasserTimedOut,

    // =========================================================================
    // Verification Errors (E400-E499)
    // =========================================================================
    /// Reserved container data changed during the run
    VerificationReservedMismatch,
    /// Snapshot returned data written after the snapshot
    VerificationSnapshotMismatch,

    // =========================================================================
    // Run Errors (E500-E599)
    // =========================================================================
    /// One or more jobs or harassers failed during the run
    RunFailed,
    /// Remote log retrieval failed
    RunLogRetrievalFailed,
}

impl ErrorCode {
    /// Returns the numeric error code (without prefix).
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::ConfigReadError => 1,
            Self::ConfigParseError => 2,
            Self::ConfigValidationError => 3,
            Self::ConfigEnvError => 4,
            Self::ConfigNoClients => 5,
            Self::ConfigInsufficientNodes => 6,
            Self::ConfigInsufficientPools => 7,

            Self::SchedulerSubmitFailed => 100,
            Self::SchedulerCancelFailed => 101,
            Self::SchedulerJobTimedOut => 102,

            Self::StorageOperationFailed => 200,
            Self::StoragePoolTeardownFailed => 201,

            Self::HarasserFailed => 300,
            Self::HarasserTimedOut => 301,

            Self::VerificationReservedMismatch => 400,
            Self::VerificationSnapshotMismatch => 401,

            Self::RunFailed => 500,
            Self::RunLogRetrievalFailed => 501,
        }
    }

    /// Returns the formatted error code string (e.g., "SOAK-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("SOAK-E{:03}", self.code_number())
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Scheduler,
            200..=299 => ErrorCategory::Storage,
            300..=399 => ErrorCategory::Harasser,
            400..=499 => ErrorCategory::Verification,
            _ => ErrorCategory::Run,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Returns the error message template.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ConfigReadError => "Failed to read the soak configuration file",
            Self::ConfigParseError => "Soak configuration contains invalid TOML",
            Self::ConfigValidationError => "Soak configuration contains invalid values",
            Self::ConfigEnvError => "Environment override has an invalid value",
            Self::ConfigNoClients => "There are no nodes that are client only",
            Self::ConfigInsufficientNodes => "A job requires more client nodes than available",
            Self::ConfigInsufficientPools => "There are not enough pools to run this pass",

            Self::SchedulerSubmitFailed => "Scheduler failed to submit a job batch",
            Self::SchedulerCancelFailed => "Scheduler could not cancel a job",
            Self::SchedulerJobTimedOut => "Job did not finish before the soak deadline",

            Self::StorageOperationFailed => "Storage control-plane operation failed",
            Self::StoragePoolTeardownFailed => "Pass pool could not be destroyed",

            Self::HarasserFailed => "Harasser reported a failure",
            Self::HarasserTimedOut => "Harasser did not finish within its timeout",

            Self::VerificationReservedMismatch => {
                "Data verification error on reserved pool after soak completed"
            }
            Self::VerificationSnapshotMismatch => "Snapshot data does not match the original write",

            Self::RunFailed => "Soak run finished with failed jobs or harassers",
            Self::RunLogRetrievalFailed => "Remote log files could not be retrieved",
        }
    }

    /// Returns remediation steps for the error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigReadError | Self::ConfigParseError => &[
                "Check the path passed with --config",
                "Validate the file with `soak validate --config <file>`",
            ],
            Self::ConfigValidationError | Self::ConfigEnvError => &[
                "Run `soak validate --config <file>` to list every invalid value",
                "Check SOAK_* environment overrides",
            ],
            Self::ConfigNoClients => &[
                "Add client-only nodes to cluster.clients",
                "Check whether the client partition also contains server nodes",
            ],
            Self::ConfigInsufficientNodes => &[
                "Lower nodes_per_job for the job",
                "Use -1 to run on all client nodes",
            ],
            Self::ConfigInsufficientPools => &["Add [[pools]] entries, one per configured job"],
            Self::SchedulerSubmitFailed => &[
                "Check the partition and reservation names",
                "Inspect the generated batch script in the pass log directory",
            ],
            Self::SchedulerCancelFailed => &["Cancel leftover jobs manually with scancel"],
            Self::SchedulerJobTimedOut => &["Increase soak.test_timeout or lower job_timeout"],
            Self::StorageOperationFailed | Self::StoragePoolTeardownFailed => &[
                "Check the storage servers are up",
                "Look for leaked pools and destroy them before the next run",
            ],
            Self::HarasserFailed => &["Inspect the harasser log lines for the failing step"],
            Self::HarasserTimedOut => &[
                "Increase soak.harasser_timeout",
                "Check whether rebuild is stuck on the storage servers",
            ],
            Self::VerificationReservedMismatch | Self::VerificationSnapshotMismatch => &[
                "Treat as a storage data-integrity bug",
                "Preserve the server logs from the run",
            ],
            Self::RunFailed => &["Inspect the per-job output files in the pass log directories"],
            Self::RunLogRetrievalFailed => &[
                "Check that the pass log directory is readable from this host",
                "Logs may still be present in soak.log_dir on the nodes",
            ],
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code_string())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Configuration errors (E001-E099)
    Config,
    /// Scheduler errors (E100-E199)
    Scheduler,
    /// Storage control-plane errors (E200-E299)
    Storage,
    /// Harasser errors (E300-E399)
    Harasser,
    /// Data verification errors (E400-E499)
    Verification,
    /// Run-level errors (E500-E599)
    Run,
}

impl ErrorCategory {
    /// Returns a human-readable name for the category.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Scheduler => "Scheduler",
            Self::Storage => "Storage",
            Self::Harasser => "Harasser",
            Self::Verification => "Verification",
            Self::Run => "Run",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "SOAK-E001")
    pub code: String,
    /// Error category
    pub category: ErrorCategory,
    /// Human-readable error message
    pub message: String,
    /// Steps to remediate the error
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("\nRemediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }

    /// Formats the error as a single line.
    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_brief())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_string_format() {
        assert_eq!(ErrorCode::ConfigReadError.code_string(), "SOAK-E001");
        assert_eq!(ErrorCode::HarasserTimedOut.code_string(), "SOAK-E301");
        assert_eq!(ErrorCode::RunFailed.to_string(), "SOAK-E500");
    }

    #[test]
    fn test_categories_follow_ranges() {
        assert_eq!(ErrorCode::ConfigNoClients.category(), ErrorCategory::Config);
        assert_eq!(
            ErrorCode::SchedulerSubmitFailed.category(),
            ErrorCategory::Scheduler
        );
        assert_eq!(
            ErrorCode::StoragePoolTeardownFailed.category(),
            ErrorCategory::Storage
        );
        assert_eq!(
            ErrorCode::VerificationSnapshotMismatch.category(),
            ErrorCategory::Verification
        );
        assert_eq!(ErrorCode::RunLogRetrievalFailed.category(), ErrorCategory::Run);
    }

    #[test]
    fn test_entry_carries_remediation() {
        let entry = ErrorCode::ConfigInsufficientPools.entry();
        assert_eq!(entry.code, "SOAK-E007");
        assert!(!entry.remediation.is_empty());
        let full = entry.format_full();
        assert!(full.contains("Remediation steps:"));
        assert!(full.starts_with("[SOAK-E007]"));
    }
}
