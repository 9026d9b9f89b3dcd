//! Soak endurance-test orchestration.
//!
//! [`pass_loop::SoakRunner`] drives repeated passes of scheduler jobs against
//! fresh storage pools while harassers inject faults, then checks that data
//! written before the run is still intact.

#![forbid(unsafe_code)]

pub mod aggregator;
pub mod batch;
pub mod events;
pub mod harasser;
pub mod logs;
pub mod pass_loop;
pub mod pools;
pub mod report;
pub mod result_store;
pub mod slurm;
pub mod tracker;

pub use pass_loop::{SoakBackends, SoakOutcome, SoakRunner, SoakState};
pub use report::{SoakReport, Verdict};
