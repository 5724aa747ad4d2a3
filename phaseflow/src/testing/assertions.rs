//! Test assertions for pipeline results.

use crate::core::{Phase, PipelineResult};

/// Asserts that the run finished without errors or short-circuit.
pub fn assert_succeeded<C>(result: &PipelineResult<C>) {
    assert!(
        result.is_success(),
        "Expected success, got short_circuited={} errors={:?}",
        result.short_circuited,
        result.errors.iter().map(ToString::to_string).collect::<Vec<_>>()
    );
}

/// Asserts that the run was short-circuited.
pub fn assert_short_circuited<C>(result: &PipelineResult<C>) {
    assert!(
        result.short_circuited,
        "Expected the run to be short-circuited, but it ran to completion"
    );
}

/// Asserts that exactly one error was recorded, at `phase`/`index`.
pub fn assert_error_at<C>(result: &PipelineResult<C>, phase: Phase, index: usize) {
    assert_eq!(
        result.errors.len(),
        1,
        "Expected exactly one error, got {:?}",
        result.errors.iter().map(ToString::to_string).collect::<Vec<_>>()
    );
    let error = &result.errors[0];
    assert_eq!(
        (error.phase, error.index),
        (phase, index),
        "Expected the error at {phase}#{index}, got {}#{}",
        error.phase,
        error.index
    );
}

/// Asserts the step names of the recorded errors, in order.
pub fn assert_error_steps<C>(result: &PipelineResult<C>, expected: &[&str]) {
    let actual: Vec<&str> = result.errors.iter().map(|e| e.step_name.as_str()).collect();
    assert_eq!(actual, expected, "Unexpected error steps");
}

/// Asserts the step names of the recorded timings, in order.
pub fn assert_timings_in_order<C>(result: &PipelineResult<C>, expected: &[&str]) {
    let actual: Vec<&str> = result.timings.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(actual, expected, "Unexpected execution order");
}
