//! The action contract and its adapters.
//!
//! An action reads the current context and produces the next one. Shared
//! actions implement [`Action`] and must be safe to call concurrently;
//! instance-confined actions implement [`LocalAction`] and are handed out by
//! the lifecycle layer one borrower at a time.

mod adapters;
mod local;

pub use adapters::{controlled, fallible, map, pure, ControlledFn, FallibleFn, PureFn};
pub use local::{local, resettable, LocalAction, LocalFn, Resettable};

use crate::control::ActionControl;
use crate::errors::{ActionError, JumpError, PhaseflowError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Result of applying an action.
pub type ActionResult<C> = Result<C, StepFault>;

/// How an action expects to be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeStyle {
    /// `context -> context`; never touches the control handle.
    Unary,
    /// `(context, control) -> context`.
    Controlled,
}

impl fmt::Display for InvokeStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary => write!(f, "unary"),
            Self::Controlled => write!(f, "controlled"),
        }
    }
}

/// A shared, concurrency-safe unit of work.
pub trait Action<C>: Send + Sync {
    /// Applies the action to the current context.
    fn apply(&self, ctx: &C, control: &mut dyn ActionControl<C>) -> ActionResult<C>;

    /// How the action is invoked.
    fn invoke_style(&self) -> InvokeStyle {
        InvokeStyle::Controlled
    }
}

/// A request for non-local control transfer to a labelled action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpSignal {
    /// The label to continue at.
    pub target_label: String,
    /// How long to wait before continuing.
    pub delay: Duration,
}

impl JumpSignal {
    /// Jumps immediately.
    #[must_use]
    pub fn now(label: impl Into<String>) -> Self {
        Self {
            target_label: label.into(),
            delay: Duration::ZERO,
        }
    }

    /// Jumps after `delay`.
    #[must_use]
    pub fn after(label: impl Into<String>, delay: Duration) -> Self {
        Self {
            target_label: label.into(),
            delay,
        }
    }

    /// The delay in whole milliseconds.
    #[must_use]
    pub fn delay_millis(&self) -> u64 {
        u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Why an action did not produce a new context.
#[derive(Debug)]
pub enum StepFault {
    /// An ordinary failure, handled by the pipeline's error policy.
    Failed(ActionError),
    /// A jump request, honored only by the jump interpreter.
    Jump(JumpSignal),
    /// A fatal error that aborts the run regardless of policy.
    Abort(PhaseflowError),
}

impl StepFault {
    /// Creates an ordinary failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(ActionError::new(message))
    }

    /// Requests an immediate jump.
    #[must_use]
    pub fn jump(label: impl Into<String>) -> Self {
        Self::Jump(JumpSignal::now(label))
    }

    /// Requests a delayed jump.
    #[must_use]
    pub fn jump_after(label: impl Into<String>, delay: Duration) -> Self {
        Self::Jump(JumpSignal::after(label, delay))
    }

    /// Converts the fault into an action error, for executors that do not
    /// interpret jumps.
    #[must_use]
    pub fn into_action_error(self) -> Result<ActionError, PhaseflowError> {
        match self {
            Self::Failed(err) => Ok(err),
            Self::Jump(signal) => Ok(ActionError::new(format!(
                "Jump to '{}' requested but jumps are not enabled",
                signal.target_label
            ))),
            Self::Abort(err) => Err(err),
        }
    }
}

impl fmt::Display for StepFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(err) => write!(f, "{err}"),
            Self::Jump(signal) => write!(f, "jump to '{}'", signal.target_label),
            Self::Abort(err) => write!(f, "{err}"),
        }
    }
}

impl From<ActionError> for StepFault {
    fn from(err: ActionError) -> Self {
        Self::Failed(err)
    }
}

impl From<anyhow::Error> for StepFault {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(err.into())
    }
}

impl From<JumpSignal> for StepFault {
    fn from(signal: JumpSignal) -> Self {
        Self::Jump(signal)
    }
}

impl From<JumpError> for StepFault {
    fn from(err: JumpError) -> Self {
        Self::Abort(err.into())
    }
}

impl From<PhaseflowError> for StepFault {
    fn from(err: PhaseflowError) -> Self {
        match err {
            PhaseflowError::Action(err) => Self::Failed(err),
            other => Self::Abort(other),
        }
    }
}
