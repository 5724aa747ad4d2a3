//! Type-state builder over dynamically typed pipelines.
//!
//! Every step may change the type of the context. The builder checks the
//! forward path at compile time; jumps can land anywhere, so each step also
//! carries a runtime [`TypeMarker`] of its input that the jump interpreter
//! verifies before the target runs.

use super::builder::Pipeline;
use super::marker::{DynValue, TypeMarker};
use super::spec::ActionSpec;
use crate::actions::{Action, ActionResult, StepFault};
use crate::control::ActionControl;
use crate::core::{Phase, PipelineResult};
use crate::errors::{ConfigurationError, PhaseflowError};
use std::any::{type_name, Any};
use std::marker::PhantomData;
use std::sync::Arc;

struct TypedStep<I, O, F> {
    f: F,
    _types: PhantomData<fn(&I) -> O>,
}

impl<I, O, F> Action<DynValue> for TypedStep<I, O, F>
where
    I: Any,
    O: Any + Send,
    F: Fn(&I, &mut dyn ActionControl<DynValue>) -> ActionResult<O> + Send + Sync,
{
    fn apply(&self, ctx: &DynValue, control: &mut dyn ActionControl<DynValue>) -> ActionResult<DynValue> {
        let Some(value) = (**ctx).downcast_ref::<I>() else {
            return Err(StepFault::failed(format!("expected input of type {}", type_name::<I>())));
        };
        (self.f)(value, control).map(|next| Box::new(next) as DynValue)
    }
}

fn typed_spec<I, O, F>(label: String, f: F) -> ActionSpec<DynValue>
where
    I: Any,
    O: Any + Send,
    F: Fn(&I, &mut dyn ActionControl<DynValue>) -> ActionResult<O> + Send + Sync + 'static,
{
    let action: Arc<dyn Action<DynValue>> = Arc::new(TypedStep {
        f,
        _types: PhantomData,
    });
    ActionSpec::shared(action)
        .with_label(label)
        .with_expected_input(TypeMarker::of::<I>())
}

/// Builds a pipeline whose context type changes from `I` to `Cur` step by
/// step.
///
/// Pre steps keep the input type, main steps may change it, post steps keep
/// the output type. Every step is labelled so it can be a jump target.
pub struct TypedPipelineBuilder<I, Cur> {
    pipeline: Pipeline<DynValue>,
    phase: Phase,
    _types: PhantomData<fn(I) -> Cur>,
}

impl<I: Any + Send> TypedPipelineBuilder<I, I> {
    /// Starts a typed pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            pipeline: Pipeline::new(name),
            phase: Phase::Pre,
            _types: PhantomData,
        }
    }

    /// Appends a pre step.
    ///
    /// # Errors
    ///
    /// Fails after the first main step or on a duplicate label.
    pub fn pre<F>(mut self, label: impl Into<String>, f: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&I) -> ActionResult<I> + Send + Sync + 'static,
    {
        if self.phase != Phase::Pre {
            return Err(ConfigurationError::invalid_value("pre", "pre steps must precede main steps"));
        }
        self.pipeline
            .add_step(Phase::Pre, typed_spec(label.into(), move |value: &I, _: &mut dyn ActionControl<DynValue>| f(value)))?;
        Ok(self)
    }
}

impl<I: Any + Send, Cur: Any + Send> TypedPipelineBuilder<I, Cur> {
    /// Appends a main step that turns `Cur` into `Next`.
    ///
    /// # Errors
    ///
    /// Fails after the first post step or on a duplicate label.
    pub fn step<Next, F>(self, label: impl Into<String>, f: F) -> Result<TypedPipelineBuilder<I, Next>, ConfigurationError>
    where
        Next: Any + Send,
        F: Fn(&Cur) -> ActionResult<Next> + Send + Sync + 'static,
    {
        self.step_with_control(label, move |value: &Cur, _: &mut dyn ActionControl<DynValue>| f(value))
    }

    /// Appends a main step that also receives the control handle.
    ///
    /// # Errors
    ///
    /// See [`step`](TypedPipelineBuilder::step).
    pub fn step_with_control<Next, F>(
        mut self,
        label: impl Into<String>,
        f: F,
    ) -> Result<TypedPipelineBuilder<I, Next>, ConfigurationError>
    where
        Next: Any + Send,
        F: Fn(&Cur, &mut dyn ActionControl<DynValue>) -> ActionResult<Next> + Send + Sync + 'static,
    {
        if self.phase == Phase::Post {
            return Err(ConfigurationError::invalid_value("step", "main steps must precede post steps"));
        }
        self.pipeline.add_step(Phase::Main, typed_spec(label.into(), f))?;
        Ok(TypedPipelineBuilder {
            pipeline: self.pipeline,
            phase: Phase::Main,
            _types: PhantomData,
        })
    }

    /// Appends a post step.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate label.
    pub fn post<F>(mut self, label: impl Into<String>, f: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&Cur) -> ActionResult<Cur> + Send + Sync + 'static,
    {
        self.pipeline
            .add_step(Phase::Post, typed_spec(label.into(), move |value: &Cur, _: &mut dyn ActionControl<DynValue>| f(value)))?;
        self.phase = Phase::Post;
        Ok(self)
    }

    /// Adjusts the underlying pipeline (jumps, sleeper, metrics, policy).
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `f`.
    pub fn configure<F>(mut self, f: F) -> Result<Self, ConfigurationError>
    where
        F: FnOnce(&mut Pipeline<DynValue>) -> Result<&mut Pipeline<DynValue>, ConfigurationError>,
    {
        f(&mut self.pipeline)?;
        Ok(self)
    }

    /// Finishes the builder.
    #[must_use]
    pub fn build(self) -> TypedPipeline<I, Cur> {
        TypedPipeline {
            pipeline: self.pipeline,
            _types: PhantomData,
        }
    }
}

/// A pipeline from `I` to `O` built by [`TypedPipelineBuilder`].
///
/// Runs always go through the jump interpreter, which verifies the type of
/// the final value.
pub struct TypedPipeline<I, O> {
    pipeline: Pipeline<DynValue>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I: Any + Send, O: Any + Send> TypedPipeline<I, O> {
    /// Returns the underlying dynamic pipeline.
    #[must_use]
    pub const fn inner(&self) -> &Pipeline<DynValue> {
        &self.pipeline
    }

    /// Starts the next run at `label`.
    pub fn jump_to(&self, label: impl Into<String>) {
        self.pipeline.jump_to(label);
    }

    /// Runs the pipeline and returns the output value.
    ///
    /// # Errors
    ///
    /// Returns the run's fatal errors, including a jump error when the
    /// final value is not an `O`.
    pub fn run(&self, input: I) -> Result<O, PhaseflowError> {
        self.execute(input).map(PipelineResult::into_context)
    }

    /// Runs the pipeline and returns the full result.
    ///
    /// # Errors
    ///
    /// See [`run`](TypedPipeline::run).
    pub fn execute(&self, input: I) -> Result<PipelineResult<O>, PhaseflowError> {
        let result = self
            .pipeline
            .execute_typed(Box::new(input), &TypeMarker::of::<O>())?;
        let PipelineResult {
            context,
            short_circuited,
            errors,
            timings,
            elapsed,
        } = result;
        let context = context
            .downcast::<O>()
            .map_err(|_| PhaseflowError::Internal(format!("output is not a {}", type_name::<O>())))?;
        Ok(PipelineResult {
            context: *context,
            short_circuited,
            errors,
            timings,
            elapsed,
        })
    }
}
