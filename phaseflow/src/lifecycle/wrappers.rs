//! Shared-action facades over per-run and pooled local actions.

use super::pool::ActionPool;
use crate::actions::{Action, ActionResult, InvokeStyle, LocalAction, StepFault};
use crate::control::ActionControl;
use crate::errors::ActionError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Builds a fresh local action instance.
pub type LocalFactory<C> = Arc<dyn Fn() -> Result<Box<dyn LocalAction<C>>, ActionError> + Send + Sync>;

/// Constructs a fresh instance for every invocation and drops it afterwards.
pub struct PerRunAction<C> {
    factory: LocalFactory<C>,
}

impl<C> PerRunAction<C> {
    /// Creates a per-run wrapper around `factory`.
    #[must_use]
    pub fn new(factory: LocalFactory<C>) -> Self {
        Self { factory }
    }
}

impl<C> Action<C> for PerRunAction<C> {
    fn apply(&self, ctx: &C, control: &mut dyn ActionControl<C>) -> ActionResult<C> {
        let mut instance = (self.factory)()?;
        instance.apply(ctx, control)
    }
}

/// Borrows an instance from a pool for each invocation.
///
/// The instance is reset before it goes back, on every exit path. A reset
/// failure is attached to the action's own failure; an instance whose reset
/// failed or panicked is discarded instead of being returned.
pub struct PooledAction<C> {
    pool: Arc<ActionPool<Box<dyn LocalAction<C>>>>,
    style: InvokeStyle,
}

impl<C> PooledAction<C> {
    /// Creates a pooled wrapper.
    #[must_use]
    pub fn new(pool: Arc<ActionPool<Box<dyn LocalAction<C>>>>, style: InvokeStyle) -> Self {
        Self { pool, style }
    }

    /// Returns the backing pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<ActionPool<Box<dyn LocalAction<C>>>> {
        &self.pool
    }
}

impl<C> Action<C> for PooledAction<C> {
    fn apply(&self, ctx: &C, control: &mut dyn ActionControl<C>) -> ActionResult<C> {
        let mut instance = self.pool.borrow()?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| instance.apply(ctx, control)));
        let reset = match panic::catch_unwind(AssertUnwindSafe(|| instance.reset())) {
            Ok(reset) => reset,
            Err(payload) => {
                instance.discard();
                panic::resume_unwind(payload);
            }
        };

        if reset.is_err() {
            instance.discard();
        } else {
            drop(instance);
        }

        match outcome {
            Ok(result) => attach_reset_failure(result, reset, self.pool.name()),
            Err(payload) => {
                if let Err(err) = reset {
                    warn!(pool = %self.pool.name(), error = %err, "Reset failed after action panic");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    fn invoke_style(&self) -> InvokeStyle {
        self.style
    }
}

fn attach_reset_failure<C>(
    result: ActionResult<C>,
    reset: Result<(), ActionError>,
    pool: &str,
) -> ActionResult<C> {
    let Err(reset_err) = reset else {
        return result;
    };
    match result {
        Ok(_) | Err(StepFault::Jump(_)) => Err(StepFault::Failed(reset_err)),
        Err(StepFault::Failed(mut err)) => {
            err.add_suppressed(reset_err);
            Err(StepFault::Failed(err))
        }
        Err(StepFault::Abort(err)) => {
            warn!(pool = %pool, error = %reset_err, "Reset failed during aborted run");
            Err(StepFault::Abort(err))
        }
    }
}
