//! Tests for `PipelineResult` and `ActionTiming`.

use super::*;
use crate::errors::{ActionError, RecordedError};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn result_with(errors: Vec<RecordedError>, short_circuited: bool) -> PipelineResult<i32> {
    PipelineResult {
        context: 7,
        short_circuited,
        errors,
        timings: vec![ActionTiming {
            phase: Phase::Main,
            index: 0,
            name: "s0".to_string(),
            elapsed_nanos: 1_500,
            success: true,
        }],
        elapsed: Duration::from_micros(3),
    }
}

#[test]
fn test_clean_result_is_success() {
    let result = result_with(Vec::new(), false);
    assert!(result.is_success());
    assert!(!result.has_errors());
    assert_eq!(result.elapsed_nanos(), 3_000);
}

#[test]
fn test_short_circuited_result_is_not_success() {
    let result = result_with(Vec::new(), true);
    assert!(!result.is_success());
}

#[test]
fn test_result_with_errors() {
    let error = RecordedError {
        pipeline_name: "p".to_string(),
        phase: Phase::Main,
        index: 1,
        step_name: "s1".to_string(),
        cause: ActionError::new("boom"),
    };
    let result = result_with(vec![error], false);
    assert!(result.has_errors());
    assert!(!result.is_success());
}

#[test]
fn test_map_keeps_metadata() {
    let result = result_with(Vec::new(), true).map(|v| v.to_string());
    assert_eq!(result.context, "7");
    assert!(result.short_circuited);
    assert_eq!(result.timings.len(), 1);
    assert_eq!(result.timings[0].elapsed(), Duration::from_nanos(1_500));
}
