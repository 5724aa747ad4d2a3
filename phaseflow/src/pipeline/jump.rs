//! The label-addressable jump interpreter.
//!
//! Pre, main and post steps are flattened into one address space. An action
//! requests a transfer by returning [`StepFault::Jump`]; the interpreter
//! validates the target, optionally sleeps, checks the target's expected
//! input type and moves the program counter. Pre is never re-entered and the
//! number of jumps per run is bounded.

use super::marker::TypeMarker;
use super::spec::{BoundStep, PipelineDefinition};
use crate::actions::StepFault;
use crate::control::{ActionControl, ExecutionControl};
use crate::core::{Phase, PipelineResult};
use crate::errors::{JumpError, PhaseflowError};
use crate::metrics::{nanos, noop_metrics, MetricsSink, RunScope};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default bound on jumps per run.
pub const DEFAULT_MAX_JUMPS_PER_RUN: usize = 128;

/// Waits before a delayed jump continues.
#[cfg_attr(test, mockall::automock)]
pub trait Sleeper: Send + Sync {
    /// Blocks for `delay`.
    ///
    /// # Errors
    ///
    /// An error (typically [`PhaseflowError::Interrupted`]) aborts the run.
    fn sleep(&self, delay: Duration) -> Result<(), PhaseflowError>;
}

/// Sleeps on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) -> Result<(), PhaseflowError> {
        std::thread::sleep(delay);
        Ok(())
    }
}

impl<F> Sleeper for F
where
    F: Fn(Duration) -> Result<(), PhaseflowError> + Send + Sync,
{
    fn sleep(&self, delay: Duration) -> Result<(), PhaseflowError> {
        self(delay)
    }
}

/// The flattened address space of a sealed pipeline.
pub struct FlattenedPlan<C> {
    definition: Arc<PipelineDefinition<C>>,
    labels: HashMap<String, usize>,
    pre_boundary: usize,
    post_boundary: usize,
}

impl<C> FlattenedPlan<C> {
    /// Flattens `definition` and indexes its labels.
    ///
    /// Labels are already unique in a bound definition, so this cannot fail.
    #[must_use]
    pub fn new(definition: Arc<PipelineDefinition<C>>) -> Self {
        let labels = definition
            .steps()
            .enumerate()
            .filter_map(|(pc, step)| step.label.clone().map(|label| (label, pc)))
            .collect();
        let pre_boundary = definition.phase(Phase::Pre).len();
        let post_boundary = pre_boundary + definition.phase(Phase::Main).len();
        Self {
            definition,
            labels,
            pre_boundary,
            post_boundary,
        }
    }

    /// Returns the step at flat position `pc`.
    #[must_use]
    pub fn step(&self, pc: usize) -> Option<&BoundStep<C>> {
        let pre = self.pre_boundary;
        let post = self.post_boundary;
        if pc < pre {
            self.definition.phase(Phase::Pre).get(pc)
        } else if pc < post {
            self.definition.phase(Phase::Main).get(pc - pre)
        } else {
            self.definition.phase(Phase::Post).get(pc - post)
        }
    }

    /// Resolves a label to its flat position.
    #[must_use]
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.get(label).copied()
    }

    /// First flat position past the pre section.
    #[must_use]
    pub const fn pre_boundary(&self) -> usize {
        self.pre_boundary
    }

    /// First flat position of the post section.
    #[must_use]
    pub const fn post_boundary(&self) -> usize {
        self.post_boundary
    }

    /// Total number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definition.len()
    }

    /// Returns true if the plan has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definition.is_empty()
    }

    /// Returns the sealed definition.
    #[must_use]
    pub fn definition(&self) -> &Arc<PipelineDefinition<C>> {
        &self.definition
    }
}

/// Runs a [`FlattenedPlan`] with a program counter.
pub struct JumpInterpreter<C> {
    plan: FlattenedPlan<C>,
    max_jumps_per_run: usize,
    sleeper: Arc<dyn Sleeper>,
    metrics: Arc<dyn MetricsSink>,
    queued_start: Mutex<Option<String>>,
}

impl<C> JumpInterpreter<C> {
    /// Creates an interpreter with the default jump budget, a thread sleeper
    /// and no metrics.
    #[must_use]
    pub fn new(definition: Arc<PipelineDefinition<C>>) -> Self {
        Self {
            plan: FlattenedPlan::new(definition),
            max_jumps_per_run: DEFAULT_MAX_JUMPS_PER_RUN,
            sleeper: Arc::new(ThreadSleeper),
            metrics: noop_metrics(),
            queued_start: Mutex::new(None),
        }
    }

    /// Sets the jump budget (at least 1).
    #[must_use]
    pub fn with_max_jumps_per_run(mut self, max: usize) -> Self {
        self.max_jumps_per_run = max.max(1);
        self
    }

    /// Sets the sleeper used for delayed jumps.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Sets the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the flattened plan.
    #[must_use]
    pub const fn plan(&self) -> &FlattenedPlan<C> {
        &self.plan
    }

    /// Returns the jump budget.
    #[must_use]
    pub const fn max_jumps_per_run(&self) -> usize {
        self.max_jumps_per_run
    }

    /// Starts the next run (only) at `label`.
    pub fn jump_to(&self, label: impl Into<String>) {
        *self.queued_start.lock() = Some(label.into());
    }

    /// Runs the plan and returns the final context.
    ///
    /// # Errors
    ///
    /// Returns a [`JumpError`] for invalid jumps, the action's error when a
    /// failure aborts the run, or any fatal abort raised by an action.
    pub fn run(&self, input: C) -> Result<C, PhaseflowError> {
        self.execute(input).map(PipelineResult::into_context)
    }

    /// Runs the plan, consuming any queued start label.
    ///
    /// # Errors
    ///
    /// See [`run`](JumpInterpreter::run).
    pub fn execute(&self, input: C) -> Result<PipelineResult<C>, PhaseflowError> {
        let start = self.queued_start.lock().take();
        self.execute_from(input, start.as_deref(), None)
    }

    /// Runs the plan from `start_label` (or the first step) and verifies the
    /// final value against `expected_output`.
    ///
    /// # Errors
    ///
    /// See [`run`](JumpInterpreter::run); additionally
    /// [`JumpError::OutputTypeMismatch`] if the final value fails the check.
    pub fn execute_from(
        &self,
        input: C,
        start_label: Option<&str>,
        expected_output: Option<&TypeMarker<C>>,
    ) -> Result<PipelineResult<C>, PhaseflowError> {
        let definition = self.plan.definition();
        let mut control = ExecutionControl::new(definition.name(), definition.on_error().cloned());
        let mut scope = self
            .metrics
            .on_pipeline_start(definition.name(), control.run_id(), start_label);
        let started = Instant::now();

        match self.run_loop(input, start_label, expected_output, &mut control, scope.as_mut()) {
            Ok(value) => {
                let result = control.into_result(value);
                scope.on_pipeline_end(result.errors.is_empty(), nanos(started.elapsed()), None);
                Ok(result)
            }
            Err(err) => {
                scope.on_pipeline_end(false, nanos(started.elapsed()), Some(&err));
                Err(err)
            }
        }
    }

    fn run_loop(
        &self,
        input: C,
        start_label: Option<&str>,
        expected_output: Option<&TypeMarker<C>>,
        control: &mut ExecutionControl<C>,
        scope: &mut dyn RunScope,
    ) -> Result<C, PhaseflowError> {
        let definition = self.plan.definition();
        let short_circuit_on_exception = definition.policy().short_circuit_on_exception;

        let mut pc = match start_label {
            Some(label) => self.plan.index_of(label).ok_or_else(|| JumpError::UnknownLabel {
                pipeline: definition.name().to_string(),
                label: label.to_string(),
            })?,
            None => 0,
        };
        let mut value = input;
        let mut jumps = 0_usize;

        while let Some(step) = self.plan.step(pc) {
            let label = step.display_label();
            control.begin_step(step.phase, step.index, step.name.as_str());
            scope.on_step_start(pc, label);
            let t0 = Instant::now();

            match step.action.apply(&value, control) {
                Ok(next) => {
                    let elapsed = t0.elapsed();
                    control.record_timing(elapsed, true);
                    scope.on_step_end(pc, label, nanos(elapsed), true);
                    value = next;
                    pc = self.advance(pc + 1, control);
                }
                Err(StepFault::Jump(signal)) => {
                    let elapsed = t0.elapsed();
                    control.record_timing(elapsed, true);
                    scope.on_step_end(pc, label, nanos(elapsed), true);

                    jumps += 1;
                    if jumps > self.max_jumps_per_run {
                        return Err(JumpError::BudgetExceeded {
                            pipeline: definition.name().to_string(),
                            max: self.max_jumps_per_run,
                        }
                        .into());
                    }
                    let to = signal.target_label.as_str();
                    let target = self.plan.index_of(to).ok_or_else(|| JumpError::UnknownLabel {
                        pipeline: definition.name().to_string(),
                        label: to.to_string(),
                    })?;
                    if target < self.plan.pre_boundary() {
                        return Err(JumpError::IntoPreRegion {
                            label: to.to_string(),
                            target,
                            pre_boundary: self.plan.pre_boundary(),
                        }
                        .into());
                    }

                    scope.on_jump(label, to, signal.delay_millis());
                    debug!(pipeline = %definition.name(), from = %label, to = %to, jumps, "Jump");
                    if !signal.delay.is_zero() {
                        self.sleeper.sleep(signal.delay)?;
                    }
                    if let Some(marker) = self.plan.step(target).and_then(|s| s.expected_input.as_ref()) {
                        if !marker.matches(&value) {
                            return Err(JumpError::TypeMismatch {
                                label: to.to_string(),
                                expected: marker.type_name().to_string(),
                            }
                            .into());
                        }
                    }
                    pc = self.advance(target, control);
                }
                Err(StepFault::Failed(err)) => {
                    let elapsed = t0.elapsed();
                    control.record_timing(elapsed, false);
                    scope.on_step_error(pc, label, &err);
                    value = control.record_error(value, err.clone());
                    if short_circuit_on_exception {
                        control.short_circuit();
                        return Err(err.into());
                    }
                    pc = self.advance(pc + 1, control);
                }
                Err(StepFault::Abort(err)) => {
                    control.record_timing(t0.elapsed(), false);
                    scope.on_step_error(pc, label, &err);
                    return Err(err);
                }
            }
        }

        if let Some(marker) = expected_output {
            if !marker.matches(&value) {
                return Err(JumpError::OutputTypeMismatch {
                    pipeline: definition.name().to_string(),
                    expected: marker.type_name().to_string(),
                }
                .into());
            }
        }
        Ok(value)
    }

    /// Skips the rest of pre and main once the run is short-circuited.
    fn advance(&self, next: usize, control: &ExecutionControl<C>) -> usize {
        if control.is_short_circuited() && next < self.plan.post_boundary() && next >= self.plan.pre_boundary() {
            self.plan.post_boundary()
        } else {
            next
        }
    }
}
