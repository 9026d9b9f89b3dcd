//! Error types for the soak harness.
//!
//! Every error maps to a catalog code (see [`catalog`]) so that reports and
//! log lines carry a stable identifier.
//!
//! # Error Code Ranges
//!
//! | Range      | Category     | Description                          |
//! |------------|--------------|--------------------------------------|
//! | E001-E099  | Config       | Configuration and eligibility        |
//! | E100-E199  | Scheduler    | Batch scheduler interaction          |
//! | E200-E299  | Storage      | Storage control plane                |
//! | E300-E399  | Harasser     | Fault injection                      |
//! | E400-E499  | Verification | Data integrity                       |
//! | E500-E599  | Run          | Aggregated run results               |

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

use crate::types::JobId;
use thiserror::Error;

/// Top-level error returned by soak operations.
///
/// Variants that span several catalog entries carry their [`ErrorCode`],
/// fixed where the error is raised.
#[derive(Debug, Error)]
pub enum SoakError {
    /// Invalid configuration or node/pool eligibility problem.
    #[error("configuration error: {message}")]
    Configuration { code: ErrorCode, message: String },

    /// Submission or cancellation failed. `submitted` holds the ids that the
    /// scheduler accepted before the failure; they must still be tracked.
    #[error("scheduler error: {message}")]
    Scheduler {
        message: String,
        submitted: Vec<JobId>,
    },

    /// A harasser reported failure or timed out.
    #[error("harasser {name} failed: {reason}")]
    Harasser {
        code: ErrorCode,
        name: String,
        reason: String,
    },

    /// Storage control-plane failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Data read back does not match what was written.
    #[error("verification error: {message}")]
    Verification { code: ErrorCode, message: String },

    /// The run finished with failures.
    #[error("soak failed: {0}")]
    RunFailed(String),
}

impl SoakError {
    /// Generic configuration problem.
    pub fn config(message: impl Into<String>) -> Self {
        Self::config_with(ErrorCode::ConfigValidationError, message)
    }

    pub fn config_with(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Configuration {
            code,
            message: message.into(),
        }
    }

    /// Scheduler failure with the ids accepted before it happened.
    pub fn scheduler(message: impl Into<String>, submitted: Vec<JobId>) -> Self {
        Self::Scheduler {
            message: message.into(),
            submitted,
        }
    }

    pub fn harasser(code: ErrorCode, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Harasser {
            code,
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Reserved container data changed during the run.
    pub fn reserved_mismatch(message: impl Into<String>) -> Self {
        Self::Verification {
            code: ErrorCode::VerificationReservedMismatch,
            message: message.into(),
        }
    }

    /// A snapshot returned data written after it was taken.
    pub fn snapshot_mismatch(message: impl Into<String>) -> Self {
        Self::Verification {
            code: ErrorCode::VerificationSnapshotMismatch,
            message: message.into(),
        }
    }

    /// Catalog code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration { code, .. }
            | Self::Harasser { code, .. }
            | Self::Verification { code, .. } => *code,
            Self::Scheduler { .. } => ErrorCode::SchedulerSubmitFailed,
            Self::Storage(_) => ErrorCode::StorageOperationFailed,
            Self::RunFailed(_) => ErrorCode::RunFailed,
        }
    }

    /// Errors that end the run instead of being recorded and survived.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Verification { .. })
    }
}

/// Storage control-plane errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("pool {0} not found")]
    PoolNotFound(String),

    #[error("container {0} not found")]
    ContainerNotFound(String),

    #[error("key {0} not found")]
    KeyNotFound(String),

    #[error("snapshot {0} not found")]
    SnapshotNotFound(u64),

    #[error("storage command failed: {0}")]
    Command(String),

    #[error("storage operation timed out")]
    Timeout,

    /// Fault injected by a mock backend.
    #[error("injected fault: {0}")]
    Injected(String),
}

/// Batch scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job submission failed: {0}")]
    Submit(String),

    #[error("job cancellation failed: {0}")]
    Cancel(String),

    #[error("scheduler command failed: {0}")]
    Command(String),

    #[error("unexpected scheduler output: {0}")]
    Parse(String),

    #[error("scheduler I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote log collection errors.
#[derive(Debug, Error)]
pub enum LogCollectError {
    /// Collection failed on the listed nodes.
    #[error("log collection failed on {}", .0.join(","))]
    Nodes(Vec<String>),

    #[error("log collection I/O error: {0}")]
    Io(#[from] std::io::Error),
}
