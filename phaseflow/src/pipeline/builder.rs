//! The pipeline builder and run facade.

use super::jump::{JumpInterpreter, Sleeper, ThreadSleeper, DEFAULT_MAX_JUMPS_PER_RUN};
use super::marker::TypeMarker;
use super::phased::PhasedPipeline;
use super::spec::{ActionSpec, ErrorPolicy, PipelineDefinition};
use crate::actions::Action;
use crate::config::EngineConfig;
use crate::control::ErrorHandler;
use crate::core::{Phase, PipelineResult};
use crate::errors::{ConfigurationError, PhaseflowError, RecordedError};
use crate::lifecycle::ActionPoolCache;
use crate::metrics::{noop_metrics, MetricsSink};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::debug;

struct Sealed<C> {
    definition: Arc<PipelineDefinition<C>>,
    phased: PhasedPipeline<C>,
    interpreter: JumpInterpreter<C>,
}

/// A named pipeline of pre, main and post actions.
///
/// A pipeline is mutable until it is sealed, either explicitly with
/// [`seal`](Pipeline::seal) or implicitly by its first run. Sealing binds
/// every action to its lifecycle; afterwards every mutator fails with a
/// `CONFIG-002-SEALED` error. Runs use the phased executor unless jumps are
/// enabled or a start label is queued, in which case the jump interpreter
/// runs the same steps.
///
/// ```rust,ignore
/// let mut pipeline = Pipeline::new("normalize");
/// pipeline
///     .add_action(actions::map(|s: &String| s.trim().to_string()))?
///     .add_action(actions::map(|s: &String| s.to_lowercase()))?;
/// assert_eq!(pipeline.run("  Hello ".to_string())?, "hello");
/// ```
pub struct Pipeline<C> {
    name: String,
    policy: ErrorPolicy,
    jumps_enabled: bool,
    max_jumps_per_run: usize,
    specs: [Vec<ActionSpec<C>>; 3],
    labels: HashSet<String>,
    last_slot: Option<usize>,
    on_error: Option<ErrorHandler<C>>,
    sleeper: Arc<dyn Sleeper>,
    metrics: Arc<dyn MetricsSink>,
    pool_cache: Option<Arc<ActionPoolCache>>,
    default_pool_max: Option<usize>,
    start_label: Mutex<Option<String>>,
    seal_lock: Mutex<()>,
    sealed: OnceLock<Sealed<C>>,
}

impl<C: 'static> Pipeline<C> {
    /// Creates an empty pipeline with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: ErrorPolicy::default(),
            jumps_enabled: false,
            max_jumps_per_run: DEFAULT_MAX_JUMPS_PER_RUN,
            specs: [Vec::new(), Vec::new(), Vec::new()],
            labels: HashSet::new(),
            last_slot: None,
            on_error: None,
            sleeper: Arc::new(ThreadSleeper),
            metrics: noop_metrics(),
            pool_cache: None,
            default_pool_max: None,
            start_label: Mutex::new(None),
            seal_lock: Mutex::new(()),
            sealed: OnceLock::new(),
        }
    }

    /// Creates an empty pipeline using the engine configuration.
    #[must_use]
    pub fn with_config(name: impl Into<String>, config: &EngineConfig) -> Self {
        let mut pipeline = Self::new(name);
        pipeline.policy = ErrorPolicy {
            short_circuit_on_exception: config.short_circuit_on_exception,
            pre_post_abort: config.pre_post_abort,
        };
        pipeline.max_jumps_per_run = config.max_jumps_per_run.max(1);
        pipeline.default_pool_max = Some(config.pool_max.max(1));
        pipeline
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of declared steps across all phases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.iter().map(Vec::len).sum()
    }

    /// Returns true if no steps are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true once the pipeline is sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.get().is_some()
    }

    /// Returns true if runs use the jump interpreter.
    #[must_use]
    pub const fn jumps_enabled(&self) -> bool {
        self.jumps_enabled
    }

    fn ensure_mutable(&self, operation: &str) -> Result<(), ConfigurationError> {
        if self.is_sealed() {
            return Err(ConfigurationError::sealed(&self.name, operation));
        }
        Ok(())
    }

    /// Appends a step to `phase`.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline is sealed or the label is already in use.
    pub fn add_step(&mut self, phase: Phase, spec: ActionSpec<C>) -> Result<&mut Self, ConfigurationError> {
        self.ensure_mutable("add_step")?;
        if let Some(label) = &spec.label {
            if !self.labels.insert(label.clone()) {
                return Err(ConfigurationError::duplicate_label(&self.name, label));
            }
        }
        self.specs[phase_slot(phase)].push(spec);
        self.last_slot = Some(phase_slot(phase));
        Ok(self)
    }

    /// Labels the most recently added step.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline is sealed, no step was added yet, the step is
    /// already labelled, or the label is already in use.
    pub fn label_last(&mut self, label: impl Into<String>) -> Result<&mut Self, ConfigurationError> {
        self.ensure_mutable("label_last")?;
        let label = label.into();
        let Some(spec) = self.last_slot.and_then(|slot| self.specs[slot].last_mut()) else {
            return Err(ConfigurationError::invalid_value("label_last", "no step has been added"));
        };
        if let Some(existing) = &spec.label {
            return Err(ConfigurationError::invalid_value(
                "label_last",
                format!("step is already labelled '{existing}'"),
            ));
        }
        if !self.labels.insert(label.clone()) {
            return Err(ConfigurationError::duplicate_label(&self.name, &label));
        }
        spec.label = Some(label);
        Ok(self)
    }

    /// Appends a shared action to the pre phase.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline is sealed.
    pub fn add_pre_action(&mut self, action: Arc<dyn Action<C>>) -> Result<&mut Self, ConfigurationError> {
        self.add_step(Phase::Pre, ActionSpec::shared(action))
    }

    /// Appends a shared action to the main phase.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline is sealed.
    pub fn add_action(&mut self, action: Arc<dyn Action<C>>) -> Result<&mut Self, ConfigurationError> {
        self.add_step(Phase::Main, ActionSpec::shared(action))
    }

    /// Appends a shared action to the post phase.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline is sealed.
    pub fn add_post_action(&mut self, action: Arc<dyn Action<C>>) -> Result<&mut Self, ConfigurationError> {
        self.add_step(Phase::Post, ActionSpec::shared(action))
    }

    /// Appends a labelled shared action to `phase`.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline is sealed or the label is already in use.
    pub fn add_labeled(
        &mut self,
        phase: Phase,
        label: impl Into<String>,
        action: Arc<dyn Action<C>>,
    ) -> Result<&mut Self, ConfigurationError> {
        self.add_step(phase, ActionSpec::shared(action).with_label(label))
    }

    /// Sets whether a main-phase failure aborts the run.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline is sealed.
    pub fn short_circuit_on_exception(&mut self, enabled: bool) -> Result<&mut Self, ConfigurationError> {
        self.ensure_mutable("short_circuit_on_exception")?;
        self.policy.short_circuit_on_exception = enabled;
        Ok(self)
    }

    /// Sets whether pre and post failures stop the rest of their phase.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline is sealed.
    pub fn pre_post_abort(&mut self, enabled: bool) -> Result<&mut Self, ConfigurationError> {
        self.ensure_mutable("pre_post_abort")?;
        self.policy.pre_post_abort = enabled;
        Ok(self)
    }

    /// Sets the handler that may transform the context after a failure.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline is sealed.
    pub fn on_error(
        &mut self,
        handler: impl Fn(C, &RecordedError) -> C + Send + Sync + 'static,
    ) -> Result<&mut Self, ConfigurationError> {
        self.ensure_mutable("on_error")?;
        self.on_error = Some(Arc::new(handler));
        Ok(self)
    }

    /// Routes runs through the jump interpreter.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline is sealed.
    pub fn enable_jumps(&mut self, enabled: bool) -> Result<&mut Self, ConfigurationError> {
        self.ensure_mutable("enable_jumps")?;
        self.jumps_enabled = enabled;
        Ok(self)
    }

    /// Bounds the number of jumps per run (at least 1).
    ///
    /// # Errors
    ///
    /// Fails if the pipeline is sealed.
    pub fn max_jumps_per_run(&mut self, max: usize) -> Result<&mut Self, ConfigurationError> {
        self.ensure_mutable("max_jumps_per_run")?;
        self.max_jumps_per_run = max.max(1);
        Ok(self)
    }

    /// Sets the sleeper used by delayed jumps.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline is sealed.
    pub fn sleeper(&mut self, sleeper: Arc<dyn Sleeper>) -> Result<&mut Self, ConfigurationError> {
        self.ensure_mutable("sleeper")?;
        self.sleeper = sleeper;
        Ok(self)
    }

    /// Sets the metrics sink.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline is sealed.
    pub fn metrics(&mut self, metrics: Arc<dyn MetricsSink>) -> Result<&mut Self, ConfigurationError> {
        self.ensure_mutable("metrics")?;
        self.metrics = metrics;
        Ok(self)
    }

    /// Binds pooled actions through a cache shared with other pipelines.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline is sealed.
    pub fn action_pool_cache(&mut self, cache: Arc<ActionPoolCache>) -> Result<&mut Self, ConfigurationError> {
        self.ensure_mutable("action_pool_cache")?;
        self.pool_cache = Some(cache);
        Ok(self)
    }

    /// Sets the pool size for pooled actions that declare none.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline is sealed or `max` is zero.
    pub fn default_pool_max(&mut self, max: usize) -> Result<&mut Self, ConfigurationError> {
        self.ensure_mutable("default_pool_max")?;
        if max == 0 {
            return Err(ConfigurationError::invalid_value("pool_max", "must be at least 1"));
        }
        self.default_pool_max = Some(max);
        Ok(self)
    }

    /// Starts the next run (only) at `label`, using the jump interpreter.
    pub fn jump_to(&self, label: impl Into<String>) {
        *self.start_label.lock() = Some(label.into());
    }

    /// Seals the pipeline. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first binding error (duplicate label, non-resettable
    /// pooled action, pool key collision, failed construction).
    pub fn seal(&self) -> Result<(), ConfigurationError> {
        self.sealed().map(|_| ())
    }

    /// Returns the sealed definition, sealing if needed.
    ///
    /// # Errors
    ///
    /// See [`seal`](Pipeline::seal).
    pub fn definition(&self) -> Result<Arc<PipelineDefinition<C>>, ConfigurationError> {
        self.sealed().map(|sealed| Arc::clone(&sealed.definition))
    }

    fn sealed(&self) -> Result<&Sealed<C>, ConfigurationError> {
        if let Some(sealed) = self.sealed.get() {
            return Ok(sealed);
        }
        let _guard = self.seal_lock.lock();
        if let Some(sealed) = self.sealed.get() {
            return Ok(sealed);
        }

        let [pre, main, post] = &self.specs;
        let definition = Arc::new(PipelineDefinition::bind(
            self.name.clone(),
            self.policy,
            self.on_error.clone(),
            [pre.as_slice(), main.as_slice(), post.as_slice()],
            self.pool_cache.as_deref(),
            self.default_pool_max,
        )?);
        let phased = PhasedPipeline::new(Arc::clone(&definition)).with_metrics(Arc::clone(&self.metrics));
        let interpreter = JumpInterpreter::new(Arc::clone(&definition))
            .with_max_jumps_per_run(self.max_jumps_per_run)
            .with_sleeper(Arc::clone(&self.sleeper))
            .with_metrics(Arc::clone(&self.metrics));
        debug!(
            pipeline = %self.name,
            steps = definition.len(),
            jumps = self.jumps_enabled,
            "Pipeline sealed"
        );

        Ok(self.sealed.get_or_init(|| Sealed {
            definition,
            phased,
            interpreter,
        }))
    }

    /// Runs the pipeline and returns the final context.
    ///
    /// # Errors
    ///
    /// Returns configuration errors from sealing, jump errors, and fatal or
    /// aborting failures.
    pub fn run(&self, input: C) -> Result<C, PhaseflowError> {
        self.execute(input).map(PipelineResult::into_context)
    }

    /// Runs the pipeline and returns the full result.
    ///
    /// # Errors
    ///
    /// See [`run`](Pipeline::run).
    pub fn execute(&self, input: C) -> Result<PipelineResult<C>, PhaseflowError> {
        self.execute_inner(input, None)
    }

    /// Runs the pipeline through the jump interpreter and verifies the
    /// runtime type of the final value.
    ///
    /// # Errors
    ///
    /// See [`run`](Pipeline::run); additionally fails with
    /// `JumpError::OutputTypeMismatch`.
    pub fn execute_typed(&self, input: C, expected_output: &TypeMarker<C>) -> Result<PipelineResult<C>, PhaseflowError> {
        self.execute_inner(input, Some(expected_output))
    }

    fn execute_inner(
        &self,
        input: C,
        expected_output: Option<&TypeMarker<C>>,
    ) -> Result<PipelineResult<C>, PhaseflowError> {
        let sealed = self.sealed()?;
        let start = self.start_label.lock().take();
        if self.jumps_enabled || start.is_some() || expected_output.is_some() {
            sealed
                .interpreter
                .execute_from(input, start.as_deref(), expected_output)
        } else {
            sealed.phased.execute(input)
        }
    }

    /// Returns an unsealed copy with the same steps and settings.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            name: self.name.clone(),
            policy: self.policy,
            jumps_enabled: self.jumps_enabled,
            max_jumps_per_run: self.max_jumps_per_run,
            specs: self.specs.clone(),
            labels: self.labels.clone(),
            last_slot: self.last_slot,
            on_error: self.on_error.clone(),
            sleeper: Arc::clone(&self.sleeper),
            metrics: Arc::clone(&self.metrics),
            pool_cache: self.pool_cache.clone(),
            default_pool_max: self.default_pool_max,
            start_label: Mutex::new(None),
            seal_lock: Mutex::new(()),
            sealed: OnceLock::new(),
        }
    }
}

const fn phase_slot(phase: Phase) -> usize {
    match phase {
        Phase::Pre => 0,
        Phase::Main => 1,
        Phase::Post => 2,
    }
}
