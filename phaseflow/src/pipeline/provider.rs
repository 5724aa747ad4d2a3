//! Whole-pipeline lifecycles.

use super::builder::Pipeline;
use crate::core::PipelineResult;
use crate::errors::{ConfigurationError, PhaseflowError};
use crate::lifecycle::{default_pool_max, ActionPool, ActionPoolCache, PoolFactory};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Builds a fresh pipeline instance.
pub type PipelineFactory<C> = Arc<dyn Fn() -> Result<Pipeline<C>, ConfigurationError> + Send + Sync>;

/// How a [`PipelineProvider`] hands out pipeline instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderMode {
    /// One instance serves every run; its actions must be concurrency-safe.
    Shared,
    /// Instances are reused but never run concurrently.
    Pooled,
    /// A new instance per run.
    PerRun,
}

impl fmt::Display for ProviderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::Pooled => write!(f, "pooled"),
            Self::PerRun => write!(f, "per_run"),
        }
    }
}

enum Source<C> {
    Shared(Pipeline<C>),
    Pooled {
        factory: PipelineFactory<C>,
        pool: ActionPool<Pipeline<C>>,
    },
    PerRun(PipelineFactory<C>),
}

/// Runs pipelines under an explicit instance lifecycle.
///
/// With [`with_pooled_local_actions`](PipelineProvider::with_pooled_local_actions)
/// every pipeline the provider constructs binds its pooled actions through
/// one shared [`ActionPoolCache`], so distinct pipeline instances share one
/// bounded pool per logical action.
pub struct PipelineProvider<C> {
    source: Source<C>,
    cache: Option<Arc<ActionPoolCache>>,
}

impl<C: 'static> PipelineProvider<C> {
    /// Serves every run from `pipeline`.
    #[must_use]
    pub fn shared(pipeline: Pipeline<C>) -> Self {
        Self {
            source: Source::Shared(pipeline),
            cache: None,
        }
    }

    /// Serves runs from a pool of at most `max` pipelines built by `factory`.
    /// `None` uses [`default_pool_max`].
    #[must_use]
    pub fn pooled<F>(factory: F, max: Option<usize>) -> Self
    where
        F: Fn() -> Result<Pipeline<C>, ConfigurationError> + Send + Sync + 'static,
    {
        let factory: PipelineFactory<C> = Arc::new(factory);
        let max = max.unwrap_or_else(default_pool_max);
        Self {
            source: Source::Pooled {
                pool: pipeline_pool(&factory, max, None),
                factory,
            },
            cache: None,
        }
    }

    /// Builds a new pipeline for every run.
    #[must_use]
    pub fn per_run<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Pipeline<C>, ConfigurationError> + Send + Sync + 'static,
    {
        Self {
            source: Source::PerRun(Arc::new(factory)),
            cache: None,
        }
    }

    /// Binds the pooled actions of every provided pipeline through `cache`.
    ///
    /// # Errors
    ///
    /// Fails in shared mode if the pipeline is already sealed.
    pub fn with_pooled_local_actions(mut self, cache: Arc<ActionPoolCache>) -> Result<Self, ConfigurationError> {
        self.source = match self.source {
            Source::Shared(mut pipeline) => {
                pipeline.action_pool_cache(Arc::clone(&cache))?;
                Source::Shared(pipeline)
            }
            Source::Pooled { factory, pool } => Source::Pooled {
                pool: pipeline_pool(&factory, pool.max(), Some(&cache)),
                factory,
            },
            Source::PerRun(factory) => Source::PerRun(factory),
        };
        self.cache = Some(cache);
        Ok(self)
    }

    /// Returns the lifecycle mode.
    #[must_use]
    pub const fn mode(&self) -> ProviderMode {
        match self.source {
            Source::Shared(_) => ProviderMode::Shared,
            Source::Pooled { .. } => ProviderMode::Pooled,
            Source::PerRun(_) => ProviderMode::PerRun,
        }
    }

    /// Returns the attached action pool cache, if any.
    #[must_use]
    pub fn action_pool_cache(&self) -> Option<&Arc<ActionPoolCache>> {
        self.cache.as_ref()
    }

    /// Runs a pipeline and returns the final context.
    ///
    /// # Errors
    ///
    /// Returns construction errors and the pipeline's own fatal errors.
    pub fn run(&self, input: C) -> Result<C, PhaseflowError> {
        self.execute(input).map(PipelineResult::into_context)
    }

    /// Runs a pipeline and returns the full result.
    ///
    /// Pooled pipelines go back to their pool when the run ends, including
    /// when it fails.
    ///
    /// # Errors
    ///
    /// See [`run`](PipelineProvider::run).
    pub fn execute(&self, input: C) -> Result<PipelineResult<C>, PhaseflowError> {
        match &self.source {
            Source::Shared(pipeline) => pipeline.execute(input),
            Source::Pooled { pool, .. } => {
                let pipeline = pool.borrow()?;
                pipeline.execute(input)
            }
            Source::PerRun(factory) => {
                let pipeline = build(factory, self.cache.as_ref())?;
                pipeline.execute(input)
            }
        }
    }
}

fn build<C: 'static>(
    factory: &PipelineFactory<C>,
    cache: Option<&Arc<ActionPoolCache>>,
) -> Result<Pipeline<C>, ConfigurationError> {
    let mut pipeline = factory()?;
    if let Some(cache) = cache {
        pipeline.action_pool_cache(Arc::clone(cache))?;
    }
    Ok(pipeline)
}

fn pipeline_pool<C: 'static>(
    factory: &PipelineFactory<C>,
    max: usize,
    cache: Option<&Arc<ActionPoolCache>>,
) -> ActionPool<Pipeline<C>> {
    let factory = Arc::clone(factory);
    let cache = cache.cloned();
    let make: PoolFactory<Pipeline<C>> = Arc::new(move || build(&factory, cache.as_ref()).map_err(PhaseflowError::from));
    ActionPool::new("pipeline-provider", max, make)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::map;
    use crate::core::Phase;
    use crate::pipeline::ActionSpec;
    use crate::testing::ProbeStats;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn id_suffix(value: &str) -> &str {
        value.rsplit_once('|').map_or("", |(_, id)| id)
    }

    fn tagging_factory(
        counter: Arc<AtomicUsize>,
    ) -> impl Fn() -> Result<Pipeline<String>, ConfigurationError> + Send + Sync + 'static {
        move || {
            let id = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let mut pipeline = Pipeline::new("tagged");
            pipeline.add_action(map(move |s: &String| format!("{s}|{id}")))?;
            Ok(pipeline)
        }
    }

    #[test]
    fn test_shared_reuses_one_pipeline() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pipeline = tagging_factory(Arc::clone(&counter))().unwrap();
        let provider = PipelineProvider::shared(pipeline);

        let first = provider.run("a".to_string()).unwrap();
        let second = provider.run("b".to_string()).unwrap();
        assert_eq!(id_suffix(&first), id_suffix(&second));
        assert_eq!(provider.mode(), ProviderMode::Shared);
    }

    #[test]
    fn test_per_run_builds_new_pipelines() {
        let counter = Arc::new(AtomicUsize::new(0));
        let provider = PipelineProvider::per_run(tagging_factory(Arc::clone(&counter)));

        let first = provider.run("a".to_string()).unwrap();
        let second = provider.run("b".to_string()).unwrap();
        assert_ne!(id_suffix(&first), id_suffix(&second));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_pooled_reuses_sequentially() {
        let counter = Arc::new(AtomicUsize::new(0));
        let provider = PipelineProvider::pooled(tagging_factory(Arc::clone(&counter)), Some(2));

        let first = provider.run("a".to_string()).unwrap();
        let second = provider.run("b".to_string()).unwrap();
        assert_eq!(id_suffix(&first), id_suffix(&second));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pooled_never_shares_concurrently() {
        let counter = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(2));
        let provider = PipelineProvider::pooled(
            move || {
                let id = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let barrier = Arc::clone(&barrier);
                let mut pipeline = Pipeline::new("pooled");
                pipeline.add_action(map(move |s: &String| {
                    barrier.wait();
                    format!("{s}|{id}")
                }))?;
                Ok(pipeline)
            },
            Some(2),
        );

        let (first, second) = thread::scope(|s| {
            let a = s.spawn(|| provider.run("a".to_string()));
            let b = s.spawn(|| provider.run("b".to_string()));
            (a.join().unwrap().unwrap(), b.join().unwrap().unwrap())
        });
        assert_ne!(id_suffix(&first), id_suffix(&second));
    }

    #[test]
    fn test_pooled_local_actions_share_one_pool_across_pipelines() {
        let stats = ProbeStats::with_barrier(2);
        let factory_stats = Arc::clone(&stats);
        let cache = Arc::new(ActionPoolCache::with_default_max(2));
        let provider = PipelineProvider::pooled(
            move || {
                let mut pipeline = Pipeline::new("pooled_local_actions");
                pipeline.add_step(
                    Phase::Main,
                    ActionSpec::pooled(factory_stats.factory(), None).with_label("stateful"),
                )?;
                Ok(pipeline)
            },
            Some(2),
        )
        .with_pooled_local_actions(Arc::clone(&cache))
        .unwrap();

        let (first, second) = thread::scope(|s| {
            let a = s.spawn(|| provider.run("a".to_string()));
            let b = s.spawn(|| provider.run("b".to_string()));
            (a.join().unwrap().unwrap(), b.join().unwrap().unwrap())
        });

        assert_ne!(id_suffix(&first), id_suffix(&second));
        assert_eq!(stats.resets(), 2);
        assert_eq!(stats.violations(), 0);
        assert_eq!(cache.len(), 1);
        assert!(stats.created() <= 2);
    }

    #[test]
    fn test_shared_cache_attach_after_seal_fails() {
        let mut pipeline = Pipeline::new("p");
        pipeline.add_action(map(|n: &i32| n + 1)).unwrap();
        pipeline.seal().unwrap();

        let result = PipelineProvider::shared(pipeline).with_pooled_local_actions(Arc::new(ActionPoolCache::new()));
        let Err(err) = result else {
            panic!("expected sealed error");
        };
        assert_eq!(err.code(), Some("CONFIG-002-SEALED"));
    }
}
