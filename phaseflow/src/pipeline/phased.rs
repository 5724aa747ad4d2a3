//! The default linear executor over pre, main and post phases.

use super::spec::{BoundStep, PipelineDefinition};
use crate::actions::StepFault;
use crate::control::{ActionControl, ExecutionControl};
use crate::core::{Phase, PipelineResult};
use crate::errors::PhaseflowError;
use crate::metrics::{nanos, noop_metrics, MetricsSink, RunScope};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Runs a sealed definition phase by phase.
///
/// - Pre runs to completion; a failure under short-circuit-on-exception sets
///   the flag, which skips main.
/// - Main stops as soon as the run is short-circuited, by a failure or by an
///   explicit [`ActionControl::short_circuit`].
/// - Post always runs to completion.
///
/// Action failures are recorded and never returned as `Err`; only fatal
/// aborts (such as an interrupted pool borrow) are. A panicking action is a
/// defect and unwinds through the run.
pub struct PhasedPipeline<C> {
    definition: Arc<PipelineDefinition<C>>,
    metrics: Arc<dyn MetricsSink>,
}

impl<C> PhasedPipeline<C> {
    /// Creates an executor without metrics.
    #[must_use]
    pub fn new(definition: Arc<PipelineDefinition<C>>) -> Self {
        Self {
            definition,
            metrics: noop_metrics(),
        }
    }

    /// Sets the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the sealed definition.
    #[must_use]
    pub fn definition(&self) -> &Arc<PipelineDefinition<C>> {
        &self.definition
    }

    /// Runs the pipeline and returns the final context.
    ///
    /// # Errors
    ///
    /// Returns an error only for fatal aborts.
    pub fn run(&self, input: C) -> Result<C, PhaseflowError> {
        self.execute(input).map(PipelineResult::into_context)
    }

    /// Runs the pipeline and returns the full result.
    ///
    /// # Errors
    ///
    /// Returns an error only for fatal aborts.
    pub fn execute(&self, input: C) -> Result<PipelineResult<C>, PhaseflowError> {
        let name = self.definition.name();
        let mut control = ExecutionControl::new(name, self.definition.on_error().cloned());
        let mut scope = self.metrics.on_pipeline_start(name, control.run_id(), None);
        let started = Instant::now();

        match self.run_phases(input, &mut control, scope.as_mut()) {
            Ok(ctx) => {
                let result = control.into_result(ctx);
                scope.on_pipeline_end(result.errors.is_empty(), nanos(started.elapsed()), None);
                Ok(result)
            }
            Err(err) => {
                scope.on_pipeline_end(false, nanos(started.elapsed()), Some(&err));
                Err(err)
            }
        }
    }

    fn run_phases(
        &self,
        input: C,
        control: &mut ExecutionControl<C>,
        scope: &mut dyn RunScope,
    ) -> Result<C, PhaseflowError> {
        let policy = self.definition.policy();
        let mut ctx = input;
        let mut offset = 0;

        for phase in Phase::ALL {
            let steps = self.definition.phase(phase);
            if phase == Phase::Main && control.is_short_circuited() {
                debug!(pipeline = %self.definition.name(), "Main phase skipped after short-circuit in pre");
                offset += steps.len();
                continue;
            }

            for (position, step) in steps.iter().enumerate() {
                let was_short_circuited = control.is_short_circuited();
                let errors_before = control.errors().len();
                ctx = self.run_step(step, offset + position, ctx, control, scope)?;
                let now_short_circuited = control.is_short_circuited();
                let step_failed = control.errors().len() > errors_before;

                if !was_short_circuited && now_short_circuited {
                    debug!(pipeline = %self.definition.name(), step = %step.name, "Short-circuit");
                }
                let stop = match phase {
                    Phase::Main => now_short_circuited,
                    // Judged on this step alone, so a post failure still stops
                    // post after main has short-circuited.
                    Phase::Pre | Phase::Post => {
                        policy.pre_post_abort && (step_failed || (!was_short_circuited && now_short_circuited))
                    }
                };
                if stop {
                    break;
                }
            }
            offset += steps.len();
        }

        Ok(ctx)
    }

    fn run_step(
        &self,
        step: &BoundStep<C>,
        flat_index: usize,
        ctx: C,
        control: &mut ExecutionControl<C>,
        scope: &mut dyn RunScope,
    ) -> Result<C, PhaseflowError> {
        let label = step.display_label();
        control.begin_step(step.phase, step.index, step.name.as_str());
        scope.on_step_start(flat_index, label);
        let t0 = Instant::now();

        let failure = match step.action.apply(&ctx, control) {
            Ok(next) => {
                let elapsed = t0.elapsed();
                control.record_timing(elapsed, true);
                scope.on_step_end(flat_index, label, nanos(elapsed), true);
                return Ok(next);
            }
            Err(fault) => fault,
        };

        let elapsed = t0.elapsed();
        control.record_timing(elapsed, false);
        if let StepFault::Abort(err) = failure {
            scope.on_step_error(flat_index, label, &err);
            return Err(err);
        }
        let err = failure.into_action_error()?;
        scope.on_step_error(flat_index, label, &err);
        scope.on_step_end(flat_index, label, nanos(elapsed), false);

        let ctx = control.record_error(ctx, err);
        if self.definition.policy().short_circuit_on_exception {
            control.short_circuit();
        }
        Ok(ctx)
    }
}
