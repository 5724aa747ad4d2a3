//! Run results and timing records.

use super::Phase;
use crate::errors::RecordedError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing of a single action invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTiming {
    /// The phase of the action.
    pub phase: Phase,
    /// The index of the action within its phase.
    pub index: usize,
    /// The step name.
    pub name: String,
    /// Elapsed wall time in nanoseconds.
    pub elapsed_nanos: u64,
    /// Whether the invocation succeeded.
    pub success: bool,
}

impl ActionTiming {
    /// Returns the elapsed time as a [`Duration`].
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos)
    }
}

/// The outcome of one pipeline run.
///
/// A result always carries the best-effort final context together with the
/// complete error log, so callers can tell "completed with logged errors"
/// apart from "aborted early".
#[derive(Debug, Clone)]
pub struct PipelineResult<C> {
    /// The final context.
    pub context: C,
    /// Whether the main phase was cut short.
    pub short_circuited: bool,
    /// Errors recorded during the run, in execution order.
    pub errors: Vec<RecordedError>,
    /// Timings recorded during the run, in execution order.
    pub timings: Vec<ActionTiming>,
    /// Total elapsed time of the run.
    pub elapsed: Duration,
}

impl<C> PipelineResult<C> {
    /// Returns true if the run finished without errors or short-circuit.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.short_circuited && self.errors.is_empty()
    }

    /// Returns true if any error was recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns the total elapsed time in nanoseconds.
    #[must_use]
    pub fn elapsed_nanos(&self) -> u64 {
        u64::try_from(self.elapsed.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Consumes the result and returns the final context.
    #[must_use]
    pub fn into_context(self) -> C {
        self.context
    }

    /// Maps the context, keeping the run metadata.
    #[must_use]
    pub fn map<D>(self, f: impl FnOnce(C) -> D) -> PipelineResult<D> {
        PipelineResult {
            context: f(self.context),
            short_circuited: self.short_circuited,
            errors: self.errors,
            timings: self.timings,
            elapsed: self.elapsed,
        }
    }
}
