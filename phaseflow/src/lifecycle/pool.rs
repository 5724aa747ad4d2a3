//! A bounded, blocking pool of reusable instances.

use crate::errors::PhaseflowError;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::debug;

/// Constructs a new pool instance on demand.
pub type PoolFactory<T> = Arc<dyn Fn() -> Result<T, PhaseflowError> + Send + Sync>;

struct PoolState<T> {
    idle: VecDeque<T>,
    created: usize,
    closed: bool,
}

/// A bounded pool handing each instance to at most one borrower at a time.
///
/// Borrowing pops an idle instance if one exists, otherwise constructs a new
/// one while fewer than `max` are alive, otherwise blocks until an instance
/// is released. [`close`](ActionPool::close) wakes every waiter with
/// [`PhaseflowError::Interrupted`].
pub struct ActionPool<T> {
    name: String,
    max: usize,
    factory: PoolFactory<T>,
    state: Mutex<PoolState<T>>,
    released: Condvar,
}

impl<T> ActionPool<T> {
    /// Creates a pool that lazily constructs up to `max` instances.
    #[must_use]
    pub fn new(name: impl Into<String>, max: usize, factory: PoolFactory<T>) -> Self {
        Self {
            name: name.into(),
            max: max.max(1),
            factory,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                created: 0,
                closed: false,
            }),
            released: Condvar::new(),
        }
    }

    /// Returns the pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the maximum number of live instances.
    #[must_use]
    pub const fn max(&self) -> usize {
        self.max
    }

    /// Returns the number of live instances (idle or borrowed).
    #[must_use]
    pub fn created(&self) -> usize {
        self.state.lock().created
    }

    /// Returns the number of idle instances.
    #[must_use]
    pub fn available(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Returns true once the pool has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Borrows an instance, blocking while the pool is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseflowError::Interrupted`] if the pool is closed before
    /// an instance becomes available, or the factory's error if a new
    /// instance cannot be constructed.
    pub fn borrow(&self) -> Result<PoolGuard<'_, T>, PhaseflowError> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = self.take_or_reserve(&mut state)? {
                return Ok(PoolGuard::new(self, item));
            }
            self.released.wait(&mut state);
        }
    }

    /// Borrows an instance without blocking; `None` if the pool is exhausted.
    ///
    /// # Errors
    ///
    /// Same as [`borrow`](ActionPool::borrow), minus the blocking.
    pub fn try_borrow(&self) -> Result<Option<PoolGuard<'_, T>>, PhaseflowError> {
        let mut state = self.state.lock();
        Ok(self
            .take_or_reserve(&mut state)?
            .map(|item| PoolGuard::new(self, item)))
    }

    /// Pops an idle instance or constructs one if a slot is free.
    fn take_or_reserve(&self, state: &mut MutexGuard<'_, PoolState<T>>) -> Result<Option<T>, PhaseflowError> {
        if state.closed {
            return Err(PhaseflowError::Interrupted(format!(
                "action pool '{}' closed while waiting",
                self.name
            )));
        }
        if let Some(item) = state.idle.pop_front() {
            return Ok(Some(item));
        }
        if state.created >= self.max {
            return Ok(None);
        }

        state.created += 1;
        let created = MutexGuard::unlocked(state, || (self.factory)());
        match created {
            Ok(item) => {
                debug!(pool = %self.name, created = state.created, max = self.max, "Pool instance created");
                Ok(Some(item))
            }
            Err(err) => {
                state.created -= 1;
                self.released.notify_one();
                Err(err)
            }
        }
    }

    /// Adds a pre-built instance if the pool has room. Returns false (and
    /// drops the instance) otherwise.
    pub fn try_seed(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if state.closed || state.created >= self.max {
            return false;
        }
        state.created += 1;
        state.idle.push_back(item);
        drop(state);
        self.released.notify_one();
        true
    }

    /// Closes the pool: idle instances are dropped and blocked borrowers fail.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        let dropped = state.idle.len();
        state.created -= dropped;
        state.idle.clear();
        drop(state);
        self.released.notify_all();
        debug!(pool = %self.name, "Pool closed");
    }

    fn release(&self, item: T) {
        let mut state = self.state.lock();
        if state.closed {
            state.created -= 1;
            return;
        }
        state.idle.push_back(item);
        drop(state);
        self.released.notify_one();
    }

    fn forget(&self) {
        let mut state = self.state.lock();
        state.created -= 1;
        drop(state);
        self.released.notify_one();
    }
}

impl<T> fmt::Debug for ActionPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ActionPool")
            .field("name", &self.name)
            .field("max", &self.max)
            .field("created", &state.created)
            .field("available", &state.idle.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// An exclusively borrowed pool instance, returned to the pool on drop.
pub struct PoolGuard<'a, T> {
    pool: &'a ActionPool<T>,
    item: Option<T>,
}

impl<'a, T> PoolGuard<'a, T> {
    const fn new(pool: &'a ActionPool<T>, item: T) -> Self {
        Self {
            pool,
            item: Some(item),
        }
    }

    /// Drops the instance instead of returning it, freeing its slot.
    pub fn discard(mut self) {
        if self.item.take().is_some() {
            self.pool.forget();
        }
    }
}

impl<T> Deref for PoolGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `discard` and `drop` take the item, and both consume the guard.
        match &self.item {
            Some(item) => item,
            None => unreachable!("pool guard used after release"),
        }
    }
}

impl<T> DerefMut for PoolGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pool guard used after release"),
        }
    }
}

impl<T> Drop for PoolGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn counting_pool(max: usize) -> (Arc<ActionPool<usize>>, Arc<AtomicUsize>) {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let factory: PoolFactory<usize> = Arc::new(move || Ok(counter.fetch_add(1, Ordering::SeqCst)));
        (Arc::new(ActionPool::new("test", max, factory)), built)
    }

    #[test]
    fn test_reuses_released_instance() {
        let (pool, built) = counting_pool(1);
        {
            let guard = pool.borrow().unwrap();
            assert_eq!(*guard, 0);
        }
        let guard = pool.borrow().unwrap();
        assert_eq!(*guard, 0);
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_never_exceeds_max() {
        let (pool, built) = counting_pool(2);
        let a = pool.borrow().unwrap();
        let b = pool.borrow().unwrap();
        assert!(pool.try_borrow().unwrap().is_none());
        assert_eq!(pool.created(), 2);
        drop(a);
        drop(b);
        assert_eq!(pool.available(), 2);
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_blocked_borrower_wakes_on_release() {
        let (pool, _) = counting_pool(1);
        let guard = pool.borrow().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || *pool.borrow().unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        drop(guard);

        assert_eq!(waiter.join().unwrap(), 0);
    }

    #[test]
    fn test_close_interrupts_waiters() {
        let (pool, _) = counting_pool(1);
        let guard = pool.borrow().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.borrow().map(|g| *g))
        };
        thread::sleep(Duration::from_millis(20));
        pool.close();

        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(PhaseflowError::Interrupted(_))));
        drop(guard);
        assert_eq!(pool.created(), 0);
    }

    #[test]
    fn test_discard_frees_slot() {
        let (pool, built) = counting_pool(1);
        pool.borrow().unwrap().discard();
        assert_eq!(pool.created(), 0);
        assert_eq!(*pool.borrow().unwrap(), 1);
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_try_seed_respects_capacity() {
        let (pool, built) = counting_pool(1);
        assert!(pool.try_seed(99));
        assert!(!pool.try_seed(100));
        assert_eq!(*pool.borrow().unwrap(), 99);
        assert_eq!(built.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_factory_failure_releases_reservation() {
        let factory: PoolFactory<usize> =
            Arc::new(|| Err(PhaseflowError::Internal("cannot build".to_string())));
        let pool = ActionPool::new("broken", 1, factory);
        assert!(pool.borrow().is_err());
        assert_eq!(pool.created(), 0);
    }
}
