//! The per-run control handle passed to controlled actions.
//!
//! Every run owns exactly one [`ExecutionControl`]; it is created when the
//! run starts and consumed into the [`PipelineResult`](crate::core::PipelineResult)
//! when it ends, so error and timing logs never leak across runs.

mod execution;

pub use execution::{ErrorHandler, ExecutionControl};

use crate::core::ActionTiming;
use crate::errors::{ActionError, RecordedError};
use std::time::Duration;
use uuid::Uuid;

/// Operations available to an action while it runs.
pub trait ActionControl<C> {
    /// Stops further main-phase actions. Post actions still run.
    fn short_circuit(&mut self);

    /// Returns true once the run has been short-circuited.
    fn is_short_circuited(&self) -> bool;

    /// Records a failure against the current step and returns the context
    /// produced by the pipeline's error handler.
    fn record_error(&mut self, ctx: C, error: ActionError) -> C;

    /// Errors recorded so far in this run.
    fn errors(&self) -> &[RecordedError];

    /// The name of the running pipeline.
    fn pipeline_name(&self) -> &str;

    /// Run start as milliseconds since the Unix epoch.
    fn run_start_timestamp(&self) -> i64;

    /// Timings recorded so far in this run.
    fn action_timings(&self) -> &[ActionTiming];

    /// Unique id of this run.
    fn run_id(&self) -> Uuid;

    /// Time since the run started.
    fn run_elapsed(&self) -> Duration;

    /// Name of the step currently executing.
    fn current_step(&self) -> &str;
}
