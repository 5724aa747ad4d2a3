//! Per-run metrics hooks.
//!
//! A [`MetricsSink`] opens one [`RunScope`] per run; the scope receives step,
//! jump and completion events in execution order. [`NoopMetrics`] is the
//! default.

mod collecting;
mod logging;
mod output;

pub use collecting::{CollectingMetrics, MetricsEvent};
pub use logging::LoggingMetrics;
pub use output::{MetricsOutputAction, MetricsReport};

use std::error::Error;
use std::sync::Arc;
use uuid::Uuid;

/// Receives the start of every run.
pub trait MetricsSink: Send + Sync {
    /// Opens the scope for one run.
    fn on_pipeline_start(&self, pipeline: &str, run_id: Uuid, start_label: Option<&str>) -> Box<dyn RunScope>;
}

/// Receives the events of a single run.
///
/// Every method has an empty default so scopes only implement what they need.
pub trait RunScope: Send {
    /// A step is about to run. `index` is the step's flat position.
    fn on_step_start(&mut self, _index: usize, _label: &str) {}

    /// A step finished.
    fn on_step_end(&mut self, _index: usize, _label: &str, _elapsed_nanos: u64, _success: bool) {}

    /// A step failed.
    fn on_step_error(&mut self, _index: usize, _label: &str, _error: &dyn Error) {}

    /// A step requested a jump.
    fn on_jump(&mut self, _from_label: &str, _to_label: &str, _delay_millis: u64) {}

    /// The run finished, successfully or not.
    fn on_pipeline_end(&mut self, _success: bool, _elapsed_nanos: u64, _error: Option<&dyn Error>) {}
}

/// Metrics sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

/// Scope returned by [`NoopMetrics`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScope;

impl RunScope for NoopScope {}

impl MetricsSink for NoopMetrics {
    fn on_pipeline_start(&self, _pipeline: &str, _run_id: Uuid, _start_label: Option<&str>) -> Box<dyn RunScope> {
        Box::new(NoopScope)
    }
}

/// Returns the default metrics sink.
#[must_use]
pub fn noop_metrics() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetrics)
}

pub(crate) fn nanos(elapsed: std::time::Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::map;
    use crate::pipeline::Pipeline;

    #[test]
    fn test_sink_opens_one_scope_per_run() {
        let sink = Arc::new(CollectingMetrics::new());
        let mut pipeline = Pipeline::new("metered");
        pipeline.add_action(map(|n: &i32| n + 1)).unwrap();
        pipeline.metrics(sink.clone()).unwrap();

        assert_eq!(pipeline.run(1).unwrap(), 2);
        assert_eq!(pipeline.run(2).unwrap(), 3);

        let starts: Vec<(String, Uuid)> = sink
            .events()
            .into_iter()
            .filter_map(|event| match event {
                MetricsEvent::PipelineStart { pipeline, run_id, .. } => Some((pipeline, run_id)),
                _ => None,
            })
            .collect();
        assert_eq!(starts.len(), 2);
        assert!(starts.iter().all(|(pipeline, _)| pipeline == "metered"));
        assert_ne!(starts[0].1, starts[1].1);
    }

    #[test]
    fn test_noop_scope_accepts_every_event() {
        let mut scope = noop_metrics().on_pipeline_start("p", Uuid::new_v4(), None);
        scope.on_step_start(0, "s0");
        scope.on_step_end(0, "s0", 10, true);
        scope.on_jump("s0", "s0", 0);
        scope.on_pipeline_end(true, 10, None);
    }
}
