//! Imperative, session-style pipeline.

use super::builder::Pipeline;
use super::spec::{ActionSpec, ErrorPolicy};
use crate::actions::{Action, StepFault};
use crate::control::{ActionControl, ErrorHandler, ExecutionControl};
use crate::core::{step_name, Phase, PipelineResult};
use crate::errors::{ConfigurationError, PhaseflowError, RecordedError};
use crate::lifecycle::BindSite;
use crate::observability::SpanTimer;
use std::sync::Arc;
use tracing::debug;

/// A pipeline that applies each action as soon as it is added.
///
/// Every `add_*` call records the step and immediately runs it against the
/// session value. Once the session ends, either because a failure
/// short-circuited it or because an action called
/// [`short_circuit`](ActionControl::short_circuit), further calls are
/// ignored and not recorded until [`reset`](RuntimePipeline::reset). The
/// recording can be frozen into an ordinary [`Pipeline`].
///
/// Sessions are single-threaded. Jump requests are not interpreted and
/// count as ordinary failures.
pub struct RuntimePipeline<C> {
    name: String,
    policy: ErrorPolicy,
    on_error: Option<ErrorHandler<C>>,
    current: C,
    ended: bool,
    recorded: [Vec<ActionSpec<C>>; 3],
    next_index: [usize; 3],
    control: ExecutionControl<C>,
}

impl<C: Clone + 'static> RuntimePipeline<C> {
    /// Starts a session with `initial` as the value.
    #[must_use]
    pub fn new(name: impl Into<String>, short_circuit_on_exception: bool, initial: C) -> Self {
        let name = name.into();
        Self {
            control: ExecutionControl::new(name.clone(), None),
            name,
            policy: ErrorPolicy {
                short_circuit_on_exception,
                ..ErrorPolicy::default()
            },
            on_error: None,
            current: initial,
            ended: false,
            recorded: [Vec::new(), Vec::new(), Vec::new()],
            next_index: [0; 3],
        }
    }

    /// Installs an error handler for this session and frozen pipelines.
    #[must_use]
    pub fn with_error_handler(mut self, handler: impl Fn(C, &RecordedError) -> C + Send + Sync + 'static) -> Self {
        let handler: ErrorHandler<C> = Arc::new(handler);
        self.control = ExecutionControl::new(self.name.clone(), Some(Arc::clone(&handler)));
        self.on_error = Some(handler);
        self
    }

    /// Returns the session name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current value.
    #[must_use]
    pub const fn value(&self) -> &C {
        &self.current
    }

    /// Returns true once the session has short-circuited.
    #[must_use]
    pub const fn is_ended(&self) -> bool {
        self.ended
    }

    /// Applies and records a pre action.
    ///
    /// # Errors
    ///
    /// Returns fatal aborts raised by the action.
    pub fn add_pre_action(&mut self, action: Arc<dyn Action<C>>) -> Result<&C, PhaseflowError> {
        self.add_step(Phase::Pre, ActionSpec::shared(action))
    }

    /// Applies and records a main action.
    ///
    /// # Errors
    ///
    /// Returns fatal aborts raised by the action.
    pub fn add_action(&mut self, action: Arc<dyn Action<C>>) -> Result<&C, PhaseflowError> {
        self.add_step(Phase::Main, ActionSpec::shared(action))
    }

    /// Applies and records a post action.
    ///
    /// # Errors
    ///
    /// Returns fatal aborts raised by the action.
    pub fn add_post_action(&mut self, action: Arc<dyn Action<C>>) -> Result<&C, PhaseflowError> {
        self.add_step(Phase::Post, ActionSpec::shared(action))
    }

    /// Binds `spec`, applies it and records it under `phase`.
    ///
    /// # Errors
    ///
    /// Returns binding errors for the spec and fatal aborts raised by the
    /// action.
    pub fn add_step(&mut self, phase: Phase, spec: ActionSpec<C>) -> Result<&C, PhaseflowError> {
        if self.ended {
            return Ok(&self.current);
        }
        let slot = slot(phase);
        let index = self.next_index[slot];
        let site = BindSite {
            pipeline: &self.name,
            phase,
            index,
            label: spec.label.as_deref(),
            cache: None,
            default_pool_max: None,
        };
        let action = spec.manager.bind(&site)?;
        let name = step_name(phase, index, spec.label.as_deref());

        self.recorded[slot].push(spec);
        self.next_index[slot] += 1;
        self.apply(action.as_ref(), phase, index, name)?;
        Ok(&self.current)
    }

    fn apply(&mut self, action: &dyn Action<C>, phase: Phase, index: usize, name: String) -> Result<(), PhaseflowError> {
        self.control.begin_step(phase, index, name.as_str());
        let was_short_circuited = self.control.is_short_circuited();
        let timer = SpanTimer::start(name.as_str());

        match action.apply(&self.current, &mut self.control) {
            Ok(next) => {
                self.control.record_timing(timer.elapsed(), true);
                self.current = next;
                if self.control.is_short_circuited() {
                    if !was_short_circuited {
                        debug!(pipeline = %self.name, step = %name, "Session short-circuited");
                    }
                    self.ended = true;
                }
                Ok(())
            }
            Err(StepFault::Abort(err)) => {
                self.control.record_timing(timer.elapsed(), false);
                Err(err)
            }
            Err(fault) => {
                self.control.record_timing(timer.elapsed(), false);
                let err = fault.into_action_error()?;
                debug!(pipeline = %self.name, step = %name, error = %err, "Session step failed");
                self.current = self.control.record_error(self.current.clone(), err);
                if self.policy.short_circuit_on_exception {
                    self.control.short_circuit();
                    self.ended = true;
                }
                Ok(())
            }
        }
    }

    /// Starts a new session with `initial`, keeping the recording.
    ///
    /// Step indices keep counting so step names stay unique across a
    /// long-lived session.
    pub fn reset(&mut self, initial: C) {
        self.current = initial;
        self.ended = false;
        self.control.reset();
    }

    /// Forgets every recorded step. The session value is unchanged.
    pub fn clear_recorded(&mut self) {
        for steps in &mut self.recorded {
            steps.clear();
        }
        self.next_index = [0; 3];
    }

    /// Number of recorded steps in `phase`.
    #[must_use]
    pub fn recorded_count(&self, phase: Phase) -> usize {
        self.recorded[slot(phase)].len()
    }

    /// Snapshot of the session: value, short-circuit flag, errors and
    /// timings since the last reset.
    #[must_use]
    pub fn result(&self) -> PipelineResult<C> {
        self.control.snapshot(self.current.clone())
    }

    /// Freezes the recorded steps into an immutable [`Pipeline`].
    ///
    /// # Errors
    ///
    /// Fails if two recorded steps share a label.
    pub fn freeze(&self) -> Result<Pipeline<C>, ConfigurationError> {
        let mut pipeline = Pipeline::new(self.name.clone());
        pipeline.short_circuit_on_exception(self.policy.short_circuit_on_exception)?;
        if let Some(handler) = &self.on_error {
            let handler = Arc::clone(handler);
            pipeline.on_error(move |ctx, err| handler(ctx, err))?;
        }
        for phase in Phase::ALL {
            for spec in &self.recorded[slot(phase)] {
                pipeline.add_step(phase, spec.clone())?;
            }
        }
        Ok(pipeline)
    }
}

const fn slot(phase: Phase) -> usize {
    match phase {
        Phase::Pre => 0,
        Phase::Main => 1,
        Phase::Post => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{controlled, map, pure, ActionResult};
    use pretty_assertions::assert_eq;

    fn boom() -> Arc<dyn Action<String>> {
        pure(|_: &String| -> ActionResult<String> { Err(StepFault::failed("boom")) })
    }

    fn upper() -> Arc<dyn Action<String>> {
        map(|s: &String| s.to_uppercase())
    }

    #[test]
    fn test_continues_on_error_when_not_short_circuiting() {
        let mut rt = RuntimePipeline::new("t", false, "hi".to_string());
        rt.add_action(boom()).unwrap();
        assert_eq!(rt.value(), "hi");

        rt.add_action(upper()).unwrap();
        assert_eq!(rt.value(), "HI");
        assert_eq!(rt.result().errors.len(), 1);
        assert_eq!(rt.result().errors[0].step_name, "s0");
    }

    #[test]
    fn test_failure_ends_session_when_short_circuiting() {
        let mut rt = RuntimePipeline::new("t", true, "hello".to_string());
        rt.add_action(boom()).unwrap();
        assert_eq!(rt.value(), "hello");
        assert!(rt.is_ended());

        rt.add_action(upper()).unwrap();
        assert_eq!(rt.value(), "hello");
        assert_eq!(rt.recorded_count(Phase::Main), 1);
    }

    #[test]
    fn test_explicit_short_circuit_ends_session() {
        let mut rt = RuntimePipeline::new("t", false, "hello".to_string());
        rt.add_action(controlled(|_: &String, control: &mut dyn ActionControl<String>| {
            control.short_circuit();
            Ok("FINISH".to_string())
        }))
        .unwrap();
        assert_eq!(rt.value(), "FINISH");

        rt.add_action(upper()).unwrap();
        assert_eq!(rt.value(), "FINISH");
        assert!(rt.result().short_circuited);
        assert!(rt.result().errors.is_empty());
    }

    #[test]
    fn test_reset_reopens_session_and_keeps_recording() {
        let mut rt = RuntimePipeline::new("t", true, "a".to_string());
        rt.add_action(upper()).unwrap();
        rt.add_action(boom()).unwrap();
        assert!(rt.is_ended());

        rt.reset("b".to_string());
        assert!(!rt.is_ended());
        assert!(rt.result().errors.is_empty());
        assert_eq!(rt.recorded_count(Phase::Main), 2);

        rt.add_action(upper()).unwrap();
        assert_eq!(rt.value(), "B");
    }

    #[test]
    fn test_freeze_replays_recording() {
        let mut rt = RuntimePipeline::new("t", true, "  Hi ".to_string());
        rt.add_pre_action(map(|s: &String| s.trim().to_string())).unwrap();
        rt.add_action(upper()).unwrap();
        rt.add_post_action(map(|s: &String| format!("{s}!"))).unwrap();
        assert_eq!(rt.value(), "HI!");

        let pipeline = rt.freeze().unwrap();
        assert_eq!(pipeline.len(), 3);
        assert_eq!(pipeline.run(" yo ".to_string()).unwrap(), "YO!");
    }

    #[test]
    fn test_clear_recorded_keeps_value() {
        let mut rt = RuntimePipeline::new("t", true, "x".to_string());
        rt.add_action(upper()).unwrap();
        rt.clear_recorded();

        assert_eq!(rt.value(), "X");
        assert_eq!(rt.recorded_count(Phase::Main), 0);
        assert!(rt.freeze().unwrap().is_empty());
    }

    #[test]
    fn test_error_handler_transforms_value() {
        let mut rt = RuntimePipeline::new("t", false, "x".to_string())
            .with_error_handler(|ctx: String, err: &RecordedError| format!("{ctx}|{}", err.step_name));
        rt.add_action(boom()).unwrap();
        assert_eq!(rt.value(), "x|s0");
    }
}
