//! Metrics sink that logs through `tracing`.

use super::{MetricsSink, RunScope};
use std::error::Error;
use tracing::{debug, info, warn, Level};
use uuid::Uuid;

/// Logs every run event as a structured `tracing` event.
///
/// Event names: `pipeline.start`, `step.start`, `step.end`, `step.error`,
/// `step.jump`, `pipeline.end`.
#[derive(Debug, Clone)]
pub struct LoggingMetrics {
    level: Level,
}

impl Default for LoggingMetrics {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingMetrics {
    /// Creates a logging sink at the given level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl MetricsSink for LoggingMetrics {
    fn on_pipeline_start(&self, pipeline: &str, run_id: Uuid, start_label: Option<&str>) -> Box<dyn RunScope> {
        let scope = LoggingScope {
            pipeline: pipeline.to_string(),
            run_id,
            level: self.level,
        };
        scope.log("pipeline.start", start_label.unwrap_or(""));
        Box::new(scope)
    }
}

struct LoggingScope {
    pipeline: String,
    run_id: Uuid,
    level: Level,
}

impl LoggingScope {
    fn log(&self, event: &str, detail: &str) {
        if self.level == Level::DEBUG {
            debug!(event, pipeline = %self.pipeline, run_id = %self.run_id, detail, "{event}");
        } else {
            info!(event, pipeline = %self.pipeline, run_id = %self.run_id, detail, "{event}");
        }
    }
}

impl RunScope for LoggingScope {
    fn on_step_start(&mut self, index: usize, label: &str) {
        self.log("step.start", &format!("{index}:{label}"));
    }

    fn on_step_end(&mut self, index: usize, label: &str, elapsed_nanos: u64, success: bool) {
        self.log(
            "step.end",
            &format!("{index}:{label} elapsed_ns={elapsed_nanos} success={success}"),
        );
    }

    fn on_step_error(&mut self, index: usize, label: &str, error: &dyn Error) {
        warn!(
            event = "step.error",
            pipeline = %self.pipeline,
            run_id = %self.run_id,
            index,
            label,
            error = %error,
            "step.error"
        );
    }

    fn on_jump(&mut self, from_label: &str, to_label: &str, delay_millis: u64) {
        self.log("step.jump", &format!("{from_label} -> {to_label} delay_ms={delay_millis}"));
    }

    fn on_pipeline_end(&mut self, success: bool, elapsed_nanos: u64, error: Option<&dyn Error>) {
        match error {
            Some(error) => warn!(
                event = "pipeline.end",
                pipeline = %self.pipeline,
                run_id = %self.run_id,
                success,
                elapsed_nanos,
                error = %error,
                "pipeline.end"
            ),
            None => self.log(
                "pipeline.end",
                &format!("success={success} elapsed_ns={elapsed_nanos}"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ActionError;

    #[test]
    fn test_logging_scope_accepts_all_events() {
        let sink = LoggingMetrics::debug();
        let mut scope = sink.on_pipeline_start("p", Uuid::new_v4(), Some("start"));
        scope.on_step_start(0, "s0");
        scope.on_step_end(0, "s0", 10, true);
        scope.on_step_error(1, "s1", &ActionError::new("boom"));
        scope.on_jump("s1", "s0", 0);
        scope.on_pipeline_end(false, 100, None);
    }
}
