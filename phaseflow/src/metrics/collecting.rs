//! Metrics sink that keeps every event in memory.

use super::{MetricsSink, RunScope};
use parking_lot::RwLock;
use serde::Serialize;
use std::error::Error;
use std::sync::Arc;
use uuid::Uuid;

/// One recorded metrics event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MetricsEvent {
    /// `pipeline.start`
    PipelineStart {
        /// The pipeline name.
        pipeline: String,
        /// The run id.
        run_id: Uuid,
        /// The one-shot start label, if any.
        start_label: Option<String>,
    },
    /// `step.start`
    StepStart {
        /// Flat step index.
        index: usize,
        /// Step label.
        label: String,
    },
    /// `step.end`
    StepEnd {
        /// Flat step index.
        index: usize,
        /// Step label.
        label: String,
        /// Whether the step succeeded.
        success: bool,
    },
    /// `step.error`
    StepError {
        /// Flat step index.
        index: usize,
        /// Step label.
        label: String,
        /// Error message.
        message: String,
    },
    /// `step.jump`
    Jump {
        /// Label of the jumping step.
        from: String,
        /// Target label.
        to: String,
        /// Requested delay.
        delay_millis: u64,
    },
    /// `pipeline.end`
    PipelineEnd {
        /// Whether the run succeeded.
        success: bool,
        /// Error message for fatal aborts.
        error: Option<String>,
    },
}

/// A collecting metrics sink for testing purposes.
#[derive(Debug, Default, Clone)]
pub struct CollectingMetrics {
    events: Arc<RwLock<Vec<MetricsEvent>>>,
}

impl CollectingMetrics {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<MetricsEvent> {
        self.events.read().clone()
    }

    /// Returns the jump events only.
    #[must_use]
    pub fn jumps(&self) -> Vec<MetricsEvent> {
        self.events
            .read()
            .iter()
            .filter(|event| matches!(event, MetricsEvent::Jump { .. }))
            .cloned()
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl MetricsSink for CollectingMetrics {
    fn on_pipeline_start(&self, pipeline: &str, run_id: Uuid, start_label: Option<&str>) -> Box<dyn RunScope> {
        self.events.write().push(MetricsEvent::PipelineStart {
            pipeline: pipeline.to_string(),
            run_id,
            start_label: start_label.map(ToString::to_string),
        });
        Box::new(CollectingScope {
            events: Arc::clone(&self.events),
        })
    }
}

struct CollectingScope {
    events: Arc<RwLock<Vec<MetricsEvent>>>,
}

impl CollectingScope {
    fn push(&self, event: MetricsEvent) {
        self.events.write().push(event);
    }
}

impl RunScope for CollectingScope {
    fn on_step_start(&mut self, index: usize, label: &str) {
        self.push(MetricsEvent::StepStart {
            index,
            label: label.to_string(),
        });
    }

    fn on_step_end(&mut self, index: usize, label: &str, _elapsed_nanos: u64, success: bool) {
        self.push(MetricsEvent::StepEnd {
            index,
            label: label.to_string(),
            success,
        });
    }

    fn on_step_error(&mut self, index: usize, label: &str, error: &dyn Error) {
        self.push(MetricsEvent::StepError {
            index,
            label: label.to_string(),
            message: error.to_string(),
        });
    }

    fn on_jump(&mut self, from_label: &str, to_label: &str, delay_millis: u64) {
        self.push(MetricsEvent::Jump {
            from: from_label.to_string(),
            to: to_label.to_string(),
            delay_millis,
        });
    }

    fn on_pipeline_end(&mut self, success: bool, _elapsed_nanos: u64, error: Option<&dyn Error>) {
        self.push(MetricsEvent::PipelineEnd {
            success,
            error: error.map(ToString::to_string),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_collects_in_order() {
        let sink = CollectingMetrics::new();
        let mut scope = sink.on_pipeline_start("p", Uuid::nil(), None);
        scope.on_step_start(0, "s0");
        scope.on_jump("s0", "loop", 5);
        scope.on_pipeline_end(true, 1, None);

        assert_eq!(sink.len(), 4);
        assert_eq!(
            sink.jumps(),
            vec![MetricsEvent::Jump {
                from: "s0".to_string(),
                to: "loop".to_string(),
                delay_millis: 5,
            }]
        );
        sink.clear();
        assert!(sink.is_empty());
    }
}
