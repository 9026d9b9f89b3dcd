//! Shared building blocks for the soak harness.
//!
//! This crate holds everything the orchestration engine and its backends
//! agree on: identifiers and job/pool types, the error taxonomy, run
//! configuration, logging setup, the external-interface traits (scheduler,
//! storage control plane, log collection) and in-memory mock backends.

#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod errors;
pub mod interfaces;
pub mod logging;
pub mod mock;
pub mod types;
pub mod util;

pub use clock::{Clock, Deadline, ManualClock, TokioClock};
pub use config::{
    BackendConfig, ClusterConfig, JobConfig, RebuildConfig, RunConfig, SchedulerKind, SoakConfig,
};
pub use errors::{
    ErrorCategory, ErrorCode, ErrorEntry, LogCollectError, SchedulerError, SoakError,
    StorageError,
};
pub use interfaces::{JobNotifier, LogCollector, Scheduler, StorageControl};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use types::{
    CancelStatus, ContainerId, HarasserKind, JobFamily, JobId, JobPlan, JobSpec, JobState,
    PoolId, PoolInfo, PoolSpec, RebuildStatus, SnapshotHandle,
};
pub use util::{format_ddhhmmss, random_payload};
