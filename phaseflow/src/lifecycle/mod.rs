//! Action instance lifecycles: shared, per-run and pooled.
//!
//! Pools are bounded and never hand one instance to two borrowers. An
//! [`ActionPoolCache`] lets distinct pipeline instances share one pool per
//! logical action, keyed by pipeline name, phase, position and label.

mod cache;
mod manager;
mod pool;
mod wrappers;

pub use cache::{default_pool_max, ActionCacheKey, ActionPoolCache};
pub use manager::{ActionLifecycleManager, BindSite, Lifecycle};
pub use pool::{ActionPool, PoolFactory, PoolGuard};
pub use wrappers::{LocalFactory, PerRunAction, PooledAction};
