//! Per-run execution state.

use super::ActionControl;
use crate::core::{ActionTiming, Phase, PipelineResult};
use crate::errors::{ActionError, RecordedError};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// User-supplied hook that may transform the context after a failure.
///
/// The default is the identity: the context passes through unchanged.
pub type ErrorHandler<C> = Arc<dyn Fn(C, &RecordedError) -> C + Send + Sync>;

/// Mutable state of a single run: cursor, short-circuit flag, error log and
/// timing log.
pub struct ExecutionControl<C> {
    pipeline_name: String,
    run_id: Uuid,
    start_timestamp: i64,
    started: Instant,
    short_circuited: bool,
    errors: Vec<RecordedError>,
    timings: Vec<ActionTiming>,
    phase: Phase,
    index: usize,
    step_name: String,
    on_error: Option<ErrorHandler<C>>,
}

impl<C> ExecutionControl<C> {
    /// Creates a fresh control for one run.
    #[must_use]
    pub fn new(pipeline_name: impl Into<String>, on_error: Option<ErrorHandler<C>>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            run_id: Uuid::new_v4(),
            start_timestamp: Utc::now().timestamp_millis(),
            started: Instant::now(),
            short_circuited: false,
            errors: Vec::new(),
            timings: Vec::new(),
            phase: Phase::Pre,
            index: 0,
            step_name: String::new(),
            on_error,
        }
    }

    /// Moves the cursor to a step.
    pub fn begin_step(&mut self, phase: Phase, index: usize, step_name: impl Into<String>) {
        self.phase = phase;
        self.index = index;
        self.step_name = step_name.into();
    }

    /// Appends a timing for the current step.
    pub fn record_timing(&mut self, elapsed: Duration, success: bool) {
        self.timings.push(ActionTiming {
            phase: self.phase,
            index: self.index,
            name: self.step_name.clone(),
            elapsed_nanos: u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
            success,
        });
    }

    /// The phase of the current step.
    #[must_use]
    pub const fn current_phase(&self) -> Phase {
        self.phase
    }

    /// The index of the current step within its phase.
    #[must_use]
    pub const fn current_index(&self) -> usize {
        self.index
    }

    /// Clears all per-run state and starts a new run id.
    pub fn reset(&mut self) {
        self.run_id = Uuid::new_v4();
        self.start_timestamp = Utc::now().timestamp_millis();
        self.started = Instant::now();
        self.short_circuited = false;
        self.errors.clear();
        self.timings.clear();
        self.phase = Phase::Pre;
        self.index = 0;
        self.step_name.clear();
    }

    /// Consumes the control into a result carrying `context`.
    #[must_use]
    pub fn into_result(self, context: C) -> PipelineResult<C> {
        PipelineResult {
            context,
            short_circuited: self.short_circuited,
            errors: self.errors,
            timings: self.timings,
            elapsed: self.started.elapsed(),
        }
    }

    /// Snapshot of the current logs, leaving the control usable.
    #[must_use]
    pub fn snapshot(&self, context: C) -> PipelineResult<C> {
        PipelineResult {
            context,
            short_circuited: self.short_circuited,
            errors: self.errors.clone(),
            timings: self.timings.clone(),
            elapsed: self.started.elapsed(),
        }
    }
}

impl<C> ActionControl<C> for ExecutionControl<C> {
    fn short_circuit(&mut self) {
        self.short_circuited = true;
    }

    fn is_short_circuited(&self) -> bool {
        self.short_circuited
    }

    fn record_error(&mut self, ctx: C, error: ActionError) -> C {
        let recorded = RecordedError {
            pipeline_name: self.pipeline_name.clone(),
            phase: self.phase,
            index: self.index,
            step_name: self.step_name.clone(),
            cause: error,
        };
        let ctx = match &self.on_error {
            Some(handler) => handler(ctx, &recorded),
            None => ctx,
        };
        self.errors.push(recorded);
        ctx
    }

    fn errors(&self) -> &[RecordedError] {
        &self.errors
    }

    fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    fn run_start_timestamp(&self) -> i64 {
        self.start_timestamp
    }

    fn action_timings(&self) -> &[ActionTiming] {
        &self.timings
    }

    fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn run_elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn current_step(&self) -> &str {
        &self.step_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_error_uses_cursor() {
        let mut control: ExecutionControl<i32> = ExecutionControl::new("orders", None);
        control.begin_step(Phase::Main, 2, "s2:charge");

        let ctx = control.record_error(10, ActionError::new("declined"));

        assert_eq!(ctx, 10);
        let errors = control.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].pipeline_name, "orders");
        assert_eq!(errors[0].phase, Phase::Main);
        assert_eq!(errors[0].index, 2);
        assert_eq!(errors[0].step_name, "s2:charge");
    }

    #[test]
    fn test_error_handler_transforms_context() {
        let handler: ErrorHandler<Vec<String>> = Arc::new(|mut ctx, err| {
            ctx.push(format!("handled {}", err.step_name));
            ctx
        });
        let mut control = ExecutionControl::new("p", Some(handler));
        control.begin_step(Phase::Pre, 0, "pre0");

        let ctx = control.record_error(Vec::new(), ActionError::new("x"));
        assert_eq!(ctx, vec!["handled pre0".to_string()]);
    }

    #[test]
    fn test_timings_and_short_circuit_flow_into_result() {
        let mut control: ExecutionControl<&str> = ExecutionControl::new("p", None);
        control.begin_step(Phase::Main, 0, "s0");
        control.record_timing(Duration::from_nanos(42), true);
        control.short_circuit();

        let result = control.into_result("done");
        assert!(result.short_circuited);
        assert_eq!(result.timings.len(), 1);
        assert_eq!(result.timings[0].elapsed_nanos, 42);
        assert_eq!(result.context, "done");
    }

    #[test]
    fn test_reset_clears_logs_and_renews_run_id() {
        let mut control: ExecutionControl<i32> = ExecutionControl::new("p", None);
        let first = control.run_id();
        control.begin_step(Phase::Main, 0, "s0");
        let _ = control.record_error(0, ActionError::new("x"));
        control.short_circuit();

        control.reset();

        assert!(control.errors().is_empty());
        assert!(!control.is_short_circuited());
        assert_ne!(control.run_id(), first);
    }
}
