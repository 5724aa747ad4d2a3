//! Lifecycle strategies for action instances.

use super::cache::{default_pool_max, ActionCacheKey, ActionPoolCache};
use super::pool::{ActionPool, PoolFactory};
use super::wrappers::{LocalFactory, PerRunAction, PooledAction};
use crate::actions::{Action, LocalAction};
use crate::core::{step_name, Phase};
use crate::errors::{ActionError, ConfigurationError, PhaseflowError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// How action instances are created and shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Lifecycle {
    /// One concurrency-safe instance for the pipeline's lifetime.
    #[default]
    Shared,
    /// A fresh instance for every invocation.
    PerRun,
    /// A bounded pool of resettable instances.
    Pooled {
        /// Maximum live instances; the cache default when absent.
        #[serde(default)]
        max: Option<usize>,
    },
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::PerRun => write!(f, "per_run"),
            Self::Pooled { max: Some(max) } => write!(f, "pooled({max})"),
            Self::Pooled { max: None } => write!(f, "pooled"),
        }
    }
}

/// Where an action is being bound: its position and the pooling context.
#[derive(Debug, Clone, Copy)]
pub struct BindSite<'a> {
    /// The pipeline name.
    pub pipeline: &'a str,
    /// The phase of the action.
    pub phase: Phase,
    /// The index within the phase.
    pub index: usize,
    /// The action label, if any.
    pub label: Option<&'a str>,
    /// Cache shared across pipeline instances, if attached.
    pub cache: Option<&'a ActionPoolCache>,
    /// Pool size for pooled actions that declare none. Falls back to the
    /// cache default, then to [`default_pool_max`].
    pub default_pool_max: Option<usize>,
}

impl BindSite<'_> {
    fn step_name(&self) -> String {
        step_name(self.phase, self.index, self.label)
    }

    fn cache_key(&self) -> ActionCacheKey {
        ActionCacheKey::new(self.pipeline, self.phase, self.index, self.label)
    }
}

enum Strategy<C> {
    Shared(Arc<dyn Action<C>>),
    PerRun(LocalFactory<C>),
    Pooled { factory: LocalFactory<C>, max: Option<usize> },
}

/// Turns a raw action or factory into an executable [`Action`] following one
/// of the three lifecycle strategies.
pub struct ActionLifecycleManager<C> {
    strategy: Strategy<C>,
}

impl<C> Clone for ActionLifecycleManager<C> {
    fn clone(&self) -> Self {
        let strategy = match &self.strategy {
            Strategy::Shared(action) => Strategy::Shared(Arc::clone(action)),
            Strategy::PerRun(factory) => Strategy::PerRun(Arc::clone(factory)),
            Strategy::Pooled { factory, max } => Strategy::Pooled {
                factory: Arc::clone(factory),
                max: *max,
            },
        };
        Self { strategy }
    }
}

impl<C: 'static> ActionLifecycleManager<C> {
    /// Uses one concurrency-safe instance.
    #[must_use]
    pub fn shared(action: Arc<dyn Action<C>>) -> Self {
        Self {
            strategy: Strategy::Shared(action),
        }
    }

    /// Builds a fresh instance from `factory` for every invocation.
    #[must_use]
    pub fn per_run<L, F>(factory: F) -> Self
    where
        L: LocalAction<C> + 'static,
        F: Fn() -> Result<L, ActionError> + Send + Sync + 'static,
    {
        Self {
            strategy: Strategy::PerRun(boxed_factory(factory)),
        }
    }

    /// Borrows resettable instances from a bounded pool.
    #[must_use]
    pub fn pooled<L, F>(factory: F, max: Option<usize>) -> Self
    where
        L: LocalAction<C> + 'static,
        F: Fn() -> Result<L, ActionError> + Send + Sync + 'static,
    {
        Self {
            strategy: Strategy::Pooled {
                factory: boxed_factory(factory),
                max,
            },
        }
    }

    /// Wraps an already type-erased factory under a local lifecycle.
    ///
    /// # Errors
    ///
    /// Returns `CONFIG-007-INVALID_VALUE` for `Lifecycle::Shared`: a local
    /// action is never concurrency-safe, so it cannot back one instance for
    /// the pipeline's lifetime.
    pub fn from_local_factory(lifecycle: Lifecycle, factory: LocalFactory<C>) -> Result<Self, ConfigurationError> {
        let strategy = match lifecycle {
            Lifecycle::Pooled { max } => Strategy::Pooled { factory, max },
            Lifecycle::PerRun => Strategy::PerRun(factory),
            Lifecycle::Shared => {
                return Err(ConfigurationError::invalid_value(
                    "lifecycle",
                    "a local action factory needs per_run or pooled, not shared",
                ));
            }
        };
        Ok(Self { strategy })
    }

    /// Returns the lifecycle in effect.
    #[must_use]
    pub const fn lifecycle(&self) -> Lifecycle {
        match &self.strategy {
            Strategy::Shared(_) => Lifecycle::Shared,
            Strategy::PerRun(_) => Lifecycle::PerRun,
            Strategy::Pooled { max, .. } => Lifecycle::Pooled { max: *max },
        }
    }

    /// Produces the executable action for `site`.
    ///
    /// Pooled actions construct one instance immediately: it is checked for
    /// reset support and then seeds the pool. With a cache attached, the pool
    /// is shared with every pipeline binding the same key.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the seed instance cannot be built,
    /// does not support reset, or collides with a cached definition.
    pub fn bind(&self, site: &BindSite<'_>) -> Result<Arc<dyn Action<C>>, ConfigurationError> {
        match &self.strategy {
            Strategy::Shared(action) => Ok(Arc::clone(action)),
            Strategy::PerRun(factory) => Ok(Arc::new(PerRunAction::new(Arc::clone(factory)))),
            Strategy::Pooled { factory, max } => Self::bind_pooled(site, factory, *max),
        }
    }

    fn bind_pooled(
        site: &BindSite<'_>,
        factory: &LocalFactory<C>,
        max: Option<usize>,
    ) -> Result<Arc<dyn Action<C>>, ConfigurationError> {
        let step = site.step_name();
        let seed = factory().map_err(|err| ConfigurationError::construction(&step, &err))?;
        let type_name = seed.type_name();
        if !seed.supports_reset() {
            return Err(ConfigurationError::not_resettable(&step, type_name));
        }
        let style = seed.invoke_style();

        let pool_factory: PoolFactory<Box<dyn LocalAction<C>>> = {
            let factory = Arc::clone(factory);
            Arc::new(move || factory().map_err(PhaseflowError::Action))
        };

        let max = max.or(site.default_pool_max);
        let pool = match site.cache {
            Some(cache) => {
                let max = max.unwrap_or_else(|| cache.default_max());
                cache.pool_for(site.cache_key(), type_name, style, max, pool_factory)?
            }
            None => {
                let max = max.unwrap_or_else(default_pool_max);
                Arc::new(ActionPool::new(site.cache_key().to_string(), max, pool_factory))
            }
        };

        let seeded = pool.try_seed(seed);
        debug!(
            step = %step,
            pool = %pool.name(),
            max = pool.max(),
            seeded,
            "Pooled action bound"
        );
        Ok(Arc::new(PooledAction::new(pool, style)))
    }
}

fn boxed_factory<C, L, F>(factory: F) -> LocalFactory<C>
where
    C: 'static,
    L: LocalAction<C> + 'static,
    F: Fn() -> Result<L, ActionError> + Send + Sync + 'static,
{
    Arc::new(move || factory().map(|action| Box::new(action) as Box<dyn LocalAction<C>>))
}
