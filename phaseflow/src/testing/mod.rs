//! Testing utilities for phaseflow pipelines.
//!
//! This module provides:
//! - Mock actions that count, fail or jump
//! - A resettable probe that detects concurrent or unreset reuse
//! - A sleeper that records delays instead of blocking
//! - Assertions over pipeline results

mod assertions;
mod mocks;

pub use assertions::{
    assert_error_at, assert_error_steps, assert_short_circuited, assert_succeeded,
    assert_timings_in_order,
};
pub use mocks::{
    CountingAction, FailingAction, JumpingAction, ProbeStats, RecordingSleeper, ResettableProbe,
};
