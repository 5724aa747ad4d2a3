//! Pipeline building and execution.
//!
//! This module provides:
//! - The [`Pipeline`] builder and facade
//! - The phased executor over pre, main and post
//! - The label-addressable jump interpreter
//! - Typed pipelines over [`DynValue`]
//! - Imperative sessions and whole-pipeline providers

mod builder;
mod jump;
mod marker;
mod phased;
mod provider;
mod runtime;
mod spec;
mod typed;


pub use builder::Pipeline;
pub use jump::{FlattenedPlan, JumpInterpreter, Sleeper, ThreadSleeper, DEFAULT_MAX_JUMPS_PER_RUN};
pub use marker::{DynValue, TypeMarker};
pub use phased::PhasedPipeline;
pub use provider::{PipelineFactory, PipelineProvider, ProviderMode};
pub use runtime::RuntimePipeline;
pub use spec::{ActionSpec, BoundStep, ErrorPolicy, PipelineDefinition};
pub use typed::{TypedPipeline, TypedPipelineBuilder};

#[cfg(test)]
pub use jump::MockSleeper;
