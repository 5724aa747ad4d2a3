//! Named action registry.
//!
//! Pipelines assembled from configuration refer to actions by key. The
//! registry maps each key either to one shared action or to a factory for
//! local instances, and resolves keys into [`ActionSpec`]s under a chosen
//! [`Lifecycle`].

use crate::actions::{Action, LocalAction};
use crate::errors::{ActionError, ConfigurationError};
use crate::lifecycle::{Lifecycle, LocalFactory};
use crate::pipeline::ActionSpec;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

enum Registration<C> {
    Shared(Arc<dyn Action<C>>),
    Factory(LocalFactory<C>),
}

impl<C> Clone for Registration<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Shared(action) => Self::Shared(Arc::clone(action)),
            Self::Factory(factory) => Self::Factory(Arc::clone(factory)),
        }
    }
}

/// String-keyed registry of actions.
///
/// Registering under an existing key replaces the previous entry.
pub struct ActionRegistry<C> {
    entries: DashMap<String, Registration<C>>,
}

impl<C> Default for ActionRegistry<C> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<C: 'static> ActionRegistry<C> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a concurrency-safe action. Returns true if an entry was
    /// replaced.
    pub fn register_shared(&self, key: impl Into<String>, action: Arc<dyn Action<C>>) -> bool {
        let key = key.into();
        debug!(key = %key, "Registered shared action");
        self.entries.insert(key, Registration::Shared(action)).is_some()
    }

    /// Registers a factory for local instances. Returns true if an entry was
    /// replaced.
    pub fn register_factory<L, F>(&self, key: impl Into<String>, factory: F) -> bool
    where
        L: LocalAction<C> + 'static,
        F: Fn() -> Result<L, ActionError> + Send + Sync + 'static,
    {
        let key = key.into();
        debug!(key = %key, "Registered action factory");
        let factory: LocalFactory<C> =
            Arc::new(move || factory().map(|action| Box::new(action) as Box<dyn LocalAction<C>>));
        self.entries.insert(key, Registration::Factory(factory)).is_some()
    }

    /// Resolves `key` into an unlabelled step specification.
    ///
    /// Shared actions only resolve under `Lifecycle::Shared`; factories only
    /// under `PerRun` or `Pooled`. One key may be resolved any number of
    /// times into the same pipeline; attach a label with
    /// [`ActionSpec::with_label`] where a jump target is needed.
    ///
    /// # Errors
    ///
    /// Returns `CONFIG-005-UNKNOWN_ACTION` for an unregistered key and
    /// `CONFIG-007-INVALID_VALUE` when the lifecycle does not fit the entry.
    pub fn resolve(&self, key: &str, lifecycle: Lifecycle) -> Result<ActionSpec<C>, ConfigurationError> {
        let registration = self
            .entries
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ConfigurationError::unknown_action(key))?;

        match (registration, lifecycle) {
            (Registration::Shared(action), Lifecycle::Shared) => Ok(ActionSpec::shared(action)),
            (Registration::Shared(_), other) => Err(ConfigurationError::invalid_value(
                "lifecycle",
                format!("'{key}' is a shared action and cannot run as {other}"),
            )),
            (Registration::Factory(factory), lifecycle) => ActionSpec::local(lifecycle, factory),
        }
    }

    /// Returns true if `key` is registered.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of registered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::map;
    use crate::core::Phase;
    use crate::pipeline::Pipeline;
    use crate::testing::ProbeStats;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_unknown_key() {
        let registry = ActionRegistry::<String>::new();
        let Err(err) = registry.resolve("missing", Lifecycle::Shared) else {
            panic!("expected unknown action");
        };
        assert_eq!(err.code(), Some("CONFIG-005-UNKNOWN_ACTION"));
    }

    #[test]
    fn test_resolved_steps_run_in_pipeline() {
        let registry = ActionRegistry::<String>::new();
        registry.register_shared("upper", map(|s: &String| s.to_uppercase()));
        let stats = ProbeStats::new();
        registry.register_factory("probe", stats.factory());

        let mut pipeline = Pipeline::new("registered");
        pipeline
            .add_step(Phase::Main, registry.resolve("upper", Lifecycle::Shared).unwrap())
            .unwrap()
            .add_step(
                Phase::Main,
                registry.resolve("probe", Lifecycle::Pooled { max: Some(1) }).unwrap(),
            )
            .unwrap();

        assert_eq!(pipeline.run("a".to_string()).unwrap(), "A|1");
        assert_eq!(pipeline.run("b".to_string()).unwrap(), "B|1");
        assert_eq!(stats.created(), 1);
    }

    #[test]
    fn test_shared_action_rejects_local_lifecycle() {
        let registry = ActionRegistry::<i32>::new();
        registry.register_shared("inc", map(|n: &i32| n + 1));
        let Err(err) = registry.resolve("inc", Lifecycle::PerRun) else {
            panic!("expected lifecycle error");
        };
        assert_eq!(err.code(), Some("CONFIG-007-INVALID_VALUE"));
    }

    #[test]
    fn test_register_replaces_and_lists_keys() {
        let registry = ActionRegistry::<i32>::new();
        assert!(registry.is_empty());
        assert!(!registry.register_shared("b", map(|n: &i32| n + 1)));
        assert!(!registry.register_shared("a", map(|n: &i32| n * 2)));
        assert!(registry.register_shared("b", map(|n: &i32| n - 1)));

        assert_eq!(registry.keys(), vec!["a".to_string(), "b".to_string()]);
        assert!(registry.contains("a"));
        assert_eq!(registry.len(), 2);

        let spec = registry.resolve("b", Lifecycle::Shared).unwrap();
        assert_eq!(spec.label, None);
    }

    #[test]
    fn test_one_key_resolves_into_several_steps() {
        let registry = ActionRegistry::<String>::new();
        registry.register_shared("trim", map(|s: &String| s.trim().to_string()));

        let mut pipeline = Pipeline::new("reuse");
        pipeline
            .add_step(Phase::Pre, registry.resolve("trim", Lifecycle::Shared).unwrap())
            .unwrap()
            .add_action(map(|s: &String| format!(" {s} ")))
            .unwrap()
            .add_step(Phase::Post, registry.resolve("trim", Lifecycle::Shared).unwrap())
            .unwrap();

        assert_eq!(pipeline.run("  x  ".to_string()).unwrap(), "x");
    }

    #[test]
    fn test_factory_rejects_shared_lifecycle() {
        let registry = ActionRegistry::<String>::new();
        registry.register_factory("probe", ProbeStats::new().factory());
        let Err(err) = registry.resolve("probe", Lifecycle::Shared) else {
            panic!("expected lifecycle error");
        };
        assert_eq!(err.code(), Some("CONFIG-007-INVALID_VALUE"));
        assert!(registry.resolve("probe", Lifecycle::PerRun).is_ok());
    }
}
