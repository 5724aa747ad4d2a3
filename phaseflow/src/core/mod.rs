//! Core domain model types for phaseflow.
//!
//! This module contains the fundamental types shared by both executors:
//! - The [`Phase`] enum and step naming
//! - Per-action timing records
//! - The [`PipelineResult`] returned by every run

mod phase;
mod result;
#[cfg(test)]
mod result_tests;

pub use phase::{step_name, Phase};
pub use result::{ActionTiming, PipelineResult};
