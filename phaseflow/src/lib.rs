//! # Phaseflow
//!
//! A synchronous pipeline execution engine.
//!
//! A pipeline is an ordered list of actions split into three phases:
//!
//! - **Phased execution**: pre actions, main actions and post actions run in
//!   order; a main-phase failure can short-circuit to the post phase.
//! - **Labelled jumps**: actions may request a jump to a labelled step,
//!   optionally after a delay, bounded by a per-run jump budget.
//! - **Action lifecycles**: actions are shared, built per run, or borrowed
//!   from bounded pools of resettable instances.
//! - **Pipeline providers**: whole pipelines are shared, pooled or built per
//!   run, with pools of local actions shared across pipeline instances.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use phaseflow::prelude::*;
//!
//! let mut pipeline = Pipeline::new("normalize");
//! pipeline
//!     .add_pre_action(map(|s: &String| s.trim().to_string()))?
//!     .add_action(map(|s: &String| s.to_lowercase()))?
//!     .add_post_action(map(|s: &String| format!("{s}!")))?;
//!
//! let result = pipeline.execute("  Hello ".to_string())?;
//! assert_eq!(result.context, "hello!");
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod actions;
pub mod config;
pub mod control;
pub mod core;
pub mod errors;
pub mod ingest;
pub mod lifecycle;
pub mod metrics;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::actions::{
        controlled, fallible, local, map, pure, resettable, Action, ActionResult, InvokeStyle,
        JumpSignal, LocalAction, StepFault,
    };
    pub use crate::config::EngineConfig;
    pub use crate::control::{ActionControl, ExecutionControl};
    pub use crate::core::{ActionTiming, Phase, PipelineResult};
    pub use crate::errors::{
        ActionError, ConfigurationError, ErrorInfo, JumpError, PhaseflowError, RecordedError,
    };
    pub use crate::ingest::{IngestEngine, IngestStats};
    pub use crate::lifecycle::{ActionPool, ActionPoolCache, Lifecycle};
    pub use crate::metrics::{
        CollectingMetrics, LoggingMetrics, MetricsOutputAction, MetricsSink, NoopMetrics, RunScope,
    };
    pub use crate::observability::{init_tracing, LogFormat, SpanTimer};
    pub use crate::pipeline::{
        ActionSpec, DynValue, Pipeline, PipelineProvider, ProviderMode, RuntimePipeline,
        TypedPipeline, TypedPipelineBuilder,
    };
    pub use crate::registry::ActionRegistry;
}
