//! Action specifications and sealed pipeline definitions.

use super::marker::TypeMarker;
use crate::actions::{Action, LocalAction};
use crate::control::ErrorHandler;
use crate::core::{step_name, Phase};
use crate::errors::{ActionError, ConfigurationError};
use crate::lifecycle::{ActionLifecycleManager, ActionPoolCache, BindSite, Lifecycle, LocalFactory};
use std::collections::HashMap;
use std::sync::Arc;

/// Declaration of one step before the pipeline is sealed.
pub struct ActionSpec<C> {
    /// Optional label, usable as a jump target.
    pub label: Option<String>,
    /// How instances are created and shared.
    pub manager: ActionLifecycleManager<C>,
    /// Expected runtime type of the step's input.
    pub expected_input: Option<TypeMarker<C>>,
}

impl<C> Clone for ActionSpec<C> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            manager: self.manager.clone(),
            expected_input: self.expected_input,
        }
    }
}

impl<C: 'static> ActionSpec<C> {
    /// A shared, concurrency-safe action.
    #[must_use]
    pub fn shared(action: Arc<dyn Action<C>>) -> Self {
        Self::from_manager(ActionLifecycleManager::shared(action))
    }

    /// A fresh instance per invocation.
    #[must_use]
    pub fn per_run<L, F>(factory: F) -> Self
    where
        L: LocalAction<C> + 'static,
        F: Fn() -> Result<L, ActionError> + Send + Sync + 'static,
    {
        Self::from_manager(ActionLifecycleManager::per_run(factory))
    }

    /// A bounded pool of resettable instances.
    #[must_use]
    pub fn pooled<L, F>(factory: F, max: Option<usize>) -> Self
    where
        L: LocalAction<C> + 'static,
        F: Fn() -> Result<L, ActionError> + Send + Sync + 'static,
    {
        Self::from_manager(ActionLifecycleManager::pooled(factory, max))
    }

    /// A type-erased local factory under an explicit lifecycle.
    ///
    /// # Errors
    ///
    /// Fails for `Lifecycle::Shared`, which needs a concurrency-safe action.
    pub fn local(lifecycle: Lifecycle, factory: LocalFactory<C>) -> Result<Self, ConfigurationError> {
        ActionLifecycleManager::from_local_factory(lifecycle, factory).map(Self::from_manager)
    }

    /// Wraps an existing lifecycle manager.
    #[must_use]
    pub const fn from_manager(manager: ActionLifecycleManager<C>) -> Self {
        Self {
            label: None,
            manager,
            expected_input: None,
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the expected input type.
    #[must_use]
    pub const fn with_expected_input(mut self, marker: TypeMarker<C>) -> Self {
        self.expected_input = Some(marker);
        self
    }

    /// Returns the lifecycle of this step.
    #[must_use]
    pub const fn lifecycle(&self) -> Lifecycle {
        self.manager.lifecycle()
    }
}

/// A step whose action has been bound to its lifecycle.
pub struct BoundStep<C> {
    /// The phase of the step.
    pub phase: Phase,
    /// The index within the phase.
    pub index: usize,
    /// The label, if any.
    pub label: Option<String>,
    /// The step name (e.g. "s1:retry").
    pub name: String,
    /// The executable action.
    pub action: Arc<dyn Action<C>>,
    /// Expected runtime type of the step's input.
    pub expected_input: Option<TypeMarker<C>>,
}

impl<C> BoundStep<C> {
    /// The label, or the step name for unlabelled steps.
    #[must_use]
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

/// Error policy of a sealed pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPolicy {
    /// Abort the main phase on the first action failure.
    pub short_circuit_on_exception: bool,
    /// Let pre and post failures stop the rest of their own phase.
    pub pre_post_abort: bool,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            short_circuit_on_exception: true,
            pre_post_abort: false,
        }
    }
}

/// A sealed, immutable pipeline: three ordered phases of bound steps.
pub struct PipelineDefinition<C> {
    name: String,
    policy: ErrorPolicy,
    on_error: Option<ErrorHandler<C>>,
    pre: Vec<BoundStep<C>>,
    main: Vec<BoundStep<C>>,
    post: Vec<BoundStep<C>>,
}

impl<C: 'static> PipelineDefinition<C> {
    /// Binds every spec to its lifecycle and freezes the result.
    ///
    /// Pooled actions without an explicit size use `default_pool_max`, then
    /// the cache default.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for duplicate labels or when a pooled
    /// action cannot be bound.
    pub fn bind(
        name: impl Into<String>,
        policy: ErrorPolicy,
        on_error: Option<ErrorHandler<C>>,
        specs: [&[ActionSpec<C>]; 3],
        cache: Option<&ActionPoolCache>,
        default_pool_max: Option<usize>,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        let mut labels: HashMap<&str, Phase> = HashMap::new();
        let mut phases: [Vec<BoundStep<C>>; 3] = [Vec::new(), Vec::new(), Vec::new()];

        for (slot, (phase, phase_specs)) in Phase::ALL.into_iter().zip(specs).enumerate() {
            for (index, spec) in phase_specs.iter().enumerate() {
                let label = spec.label.as_deref();
                if let Some(label) = label {
                    if labels.insert(label, phase).is_some() {
                        return Err(ConfigurationError::duplicate_label(&name, label));
                    }
                }
                let site = BindSite {
                    pipeline: &name,
                    phase,
                    index,
                    label,
                    cache,
                    default_pool_max,
                };
                phases[slot].push(BoundStep {
                    phase,
                    index,
                    label: spec.label.clone(),
                    name: step_name(phase, index, label),
                    action: spec.manager.bind(&site)?,
                    expected_input: spec.expected_input,
                });
            }
        }

        let [pre, main, post] = phases;
        Ok(Self {
            name,
            policy,
            on_error,
            pre,
            main,
            post,
        })
    }
}

impl<C> PipelineDefinition<C> {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the error policy.
    #[must_use]
    pub const fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Returns the error handler, if any.
    #[must_use]
    pub fn on_error(&self) -> Option<&ErrorHandler<C>> {
        self.on_error.as_ref()
    }

    /// Returns the steps of one phase.
    #[must_use]
    pub fn phase(&self, phase: Phase) -> &[BoundStep<C>] {
        match phase {
            Phase::Pre => &self.pre,
            Phase::Main => &self.main,
            Phase::Post => &self.post,
        }
    }

    /// Returns every step in execution order.
    pub fn steps(&self) -> impl Iterator<Item = &BoundStep<C>> {
        self.pre.iter().chain(&self.main).chain(&self.post)
    }

    /// Returns the total number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pre.len() + self.main.len() + self.post.len()
    }

    /// Returns true if the pipeline has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::map;

    fn spec(label: Option<&str>) -> ActionSpec<i32> {
        let spec = ActionSpec::shared(map(|n: &i32| n + 1));
        match label {
            Some(label) => spec.with_label(label),
            None => spec,
        }
    }

    #[test]
    fn test_bind_names_steps_per_phase() {
        let pre = [spec(None)];
        let main = [spec(Some("a")), spec(None)];
        let post = [spec(Some("audit"))];

        let definition =
            PipelineDefinition::bind("p", ErrorPolicy::default(), None, [&pre, &main, &post], None, None).unwrap();

        let names: Vec<&str> = definition.steps().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["pre0", "s0:a", "s1", "post0:audit"]);
        assert_eq!(definition.len(), 4);
        assert_eq!(definition.phase(Phase::Main)[1].display_label(), "s1");
    }

    #[test]
    fn test_duplicate_label_across_phases_is_rejected() {
        let pre = [spec(Some("x"))];
        let main = [spec(Some("x"))];

        let Err(err) = PipelineDefinition::bind("p", ErrorPolicy::default(), None, [&pre, &main, &[]], None, None) else {
            panic!("expected duplicate label error");
        };
        assert_eq!(err.code(), Some("CONFIG-001-DUPLICATE_LABEL"));
    }
}
