//! Pools shared by key across independently constructed pipelines.

use super::pool::{ActionPool, PoolFactory};
use crate::actions::{InvokeStyle, LocalAction};
use crate::config::EngineConfig;
use crate::core::Phase;
use crate::errors::ConfigurationError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Upper bound on the default pool size.
const MAX_DEFAULT_POOL: usize = 256;

/// Pooled instances allowed per available CPU by default.
const POOL_PER_CPU: usize = 8;

/// Default pool size: `min(256, max(1, cpus * 8))`.
#[must_use]
pub fn default_pool_max() -> usize {
    let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    (cpus * POOL_PER_CPU).clamp(1, MAX_DEFAULT_POOL)
}

/// Stable identity of "the same action" across pipeline instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionCacheKey {
    /// The pipeline name.
    pub pipeline: String,
    /// The phase of the action.
    pub phase: Phase,
    /// The index of the action within its phase.
    pub index: usize,
    /// The declared action name (its label), if any.
    pub name: Option<String>,
}

impl ActionCacheKey {
    /// Creates a new key.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, phase: Phase, index: usize, name: Option<&str>) -> Self {
        Self {
            pipeline: pipeline.into(),
            phase,
            index,
            name: name.map(ToString::to_string),
        }
    }
}

impl fmt::Display for ActionCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.pipeline, self.phase, self.index)?;
        if let Some(name) = &self.name {
            write!(f, ":{name}")?;
        }
        Ok(())
    }
}

struct CacheEntry {
    type_name: &'static str,
    invoke_style: InvokeStyle,
    context_type: TypeId,
    pool: Arc<dyn Any + Send + Sync>,
}

impl CacheEntry {
    fn describe(&self) -> String {
        format!("{} ({})", self.type_name, self.invoke_style)
    }
}

/// A concurrent map from [`ActionCacheKey`] to a shared [`ActionPool`].
///
/// The first pipeline to bind a key creates its pool; later pipelines reuse
/// it after checking that the action type and invoke style agree.
pub struct ActionPoolCache {
    entries: DashMap<ActionCacheKey, CacheEntry>,
    default_max: usize,
}

impl Default for ActionPoolCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionPoolCache {
    /// Creates an empty cache using [`default_pool_max`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_default_max(default_pool_max())
    }

    /// Creates an empty cache with an explicit default pool size.
    #[must_use]
    pub fn with_default_max(default_max: usize) -> Self {
        Self {
            entries: DashMap::new(),
            default_max: default_max.max(1),
        }
    }

    /// Creates an empty cache whose default pool size is `config.pool_max`.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_default_max(config.pool_max)
    }

    /// Pool size used when a pooled action does not declare one.
    #[must_use]
    pub const fn default_max(&self) -> usize {
        self.default_max
    }

    /// Returns the pool for `key`, creating it with `factory` on first use.
    ///
    /// # Errors
    ///
    /// Returns a `CONFIG-004-KEY_COLLISION` error if the key is already bound
    /// to a different action type, invoke style or context type.
    pub fn pool_for<C: 'static>(
        &self,
        key: ActionCacheKey,
        type_name: &'static str,
        invoke_style: InvokeStyle,
        max: usize,
        factory: PoolFactory<Box<dyn LocalAction<C>>>,
    ) -> Result<Arc<ActionPool<Box<dyn LocalAction<C>>>>, ConfigurationError> {
        let context_type = TypeId::of::<C>();
        let requested = format!("{type_name} ({invoke_style})");

        match self.entries.entry(key) {
            Entry::Occupied(occupied) => {
                let entry = occupied.get();
                if entry.type_name != type_name
                    || entry.invoke_style != invoke_style
                    || entry.context_type != context_type
                {
                    return Err(ConfigurationError::key_collision(
                        &occupied.key().to_string(),
                        &entry.describe(),
                        &requested,
                    ));
                }
                Arc::clone(&entry.pool)
                    .downcast::<ActionPool<Box<dyn LocalAction<C>>>>()
                    .map_err(|_| {
                        ConfigurationError::key_collision(
                            &occupied.key().to_string(),
                            &entry.describe(),
                            &requested,
                        )
                    })
            }
            Entry::Vacant(vacant) => {
                let pool = Arc::new(ActionPool::new(vacant.key().to_string(), max, factory));
                debug!(key = %vacant.key(), action = type_name, max, "Action pool registered");
                vacant.insert(CacheEntry {
                    type_name,
                    invoke_style,
                    context_type,
                    pool: Arc::clone(&pool) as Arc<dyn Any + Send + Sync>,
                });
                Ok(pool)
            }
        }
    }

    /// Returns true if a pool is registered under `key`.
    #[must_use]
    pub fn contains(&self, key: &ActionCacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the registered keys.
    #[must_use]
    pub fn keys(&self) -> Vec<ActionCacheKey> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Returns the number of registered pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no pools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ActionPoolCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionPoolCache")
            .field("pools", &self.entries.len())
            .field("default_max", &self.default_max)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{local, resettable, ActionResult};
    use crate::control::ActionControl;

    fn noop_factory() -> PoolFactory<Box<dyn LocalAction<i32>>> {
        Arc::new(|| {
            let action = local(|ctx: &i32, _: &mut dyn ActionControl<i32>| -> ActionResult<i32> { Ok(*ctx) });
            Ok(Box::new(resettable(action, |_| Ok(()))) as Box<dyn LocalAction<i32>>)
        })
    }

    #[test]
    fn test_key_display() {
        let key = ActionCacheKey::new("orders", Phase::Main, 2, Some("charge"));
        assert_eq!(key.to_string(), "orders:main:2:charge");
        let key = ActionCacheKey::new("orders", Phase::Pre, 0, None);
        assert_eq!(key.to_string(), "orders:pre:0");
    }

    #[test]
    fn test_default_pool_max_is_bounded() {
        let max = default_pool_max();
        assert!((1..=256).contains(&max));
    }

    #[test]
    fn test_from_config_uses_pool_max() {
        let cache = ActionPoolCache::from_config(&EngineConfig::default().with_pool_max(3));
        assert_eq!(cache.default_max(), 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_same_key_shares_pool() {
        let cache = ActionPoolCache::with_default_max(4);
        let key = ActionCacheKey::new("p", Phase::Main, 0, None);

        let a = cache
            .pool_for(key.clone(), "Charge", InvokeStyle::Controlled, 2, noop_factory())
            .unwrap();
        let b = cache
            .pool_for(key, "Charge", InvokeStyle::Controlled, 2, noop_factory())
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_type_collision_is_rejected() {
        let cache = ActionPoolCache::new();
        let key = ActionCacheKey::new("p", Phase::Main, 0, Some("x"));

        cache
            .pool_for(key.clone(), "Charge", InvokeStyle::Controlled, 1, noop_factory())
            .unwrap();
        let err = cache
            .pool_for(key, "Refund", InvokeStyle::Controlled, 1, noop_factory())
            .unwrap_err();

        assert_eq!(err.code(), Some("CONFIG-004-KEY_COLLISION"));
    }

    #[test]
    fn test_invoke_style_collision_is_rejected() {
        let cache = ActionPoolCache::new();
        let key = ActionCacheKey::new("p", Phase::Post, 1, None);

        cache
            .pool_for(key.clone(), "Audit", InvokeStyle::Unary, 1, noop_factory())
            .unwrap();
        assert!(cache
            .pool_for(key, "Audit", InvokeStyle::Controlled, 1, noop_factory())
            .is_err());
    }
}
