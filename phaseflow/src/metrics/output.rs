//! A post action that publishes a run summary.

use crate::actions::{Action, ActionResult};
use crate::control::ActionControl;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Summary of a run, as seen from a post action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    /// Name of the reporting action.
    pub name: String,
    /// The pipeline name.
    pub pipeline: String,
    /// Whether the run was short-circuited.
    pub short_circuited: bool,
    /// Number of recorded errors.
    pub error_count: usize,
    /// Milliseconds since the run started.
    pub pipeline_latency_ms: i64,
    /// Per-step latency in milliseconds, keyed by step name.
    pub action_latency_ms: BTreeMap<String, f64>,
}

type ReportConsumer = Arc<dyn Fn(&MetricsReport) + Send + Sync>;

/// Emits a [`MetricsReport`] and passes the context through unchanged.
///
/// Intended as the last post action, where every earlier timing is visible.
pub struct MetricsOutputAction {
    name: String,
    consumer: ReportConsumer,
}

impl MetricsOutputAction {
    /// Creates an action that logs the report as JSON.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            consumer: Arc::new(|report| match serde_json::to_string(report) {
                Ok(json) => info!(pipeline = %report.pipeline, report = %json, "metrics"),
                Err(err) => info!(pipeline = %report.pipeline, error = %err, "metrics report not serializable"),
            }),
        }
    }

    /// Sends reports to `consumer` instead of the log.
    #[must_use]
    pub fn with_consumer(mut self, consumer: impl Fn(&MetricsReport) + Send + Sync + 'static) -> Self {
        self.consumer = Arc::new(consumer);
        self
    }

    /// Builds the report from the control handle.
    #[allow(clippy::cast_precision_loss)]
    pub fn report<C>(&self, control: &dyn ActionControl<C>) -> MetricsReport {
        let action_latency_ms = control
            .action_timings()
            .iter()
            .map(|timing| (timing.name.clone(), timing.elapsed_nanos as f64 / 1_000_000.0))
            .collect();
        MetricsReport {
            name: self.name.clone(),
            pipeline: control.pipeline_name().to_string(),
            short_circuited: control.is_short_circuited(),
            error_count: control.errors().len(),
            pipeline_latency_ms: Utc::now().timestamp_millis() - control.run_start_timestamp(),
            action_latency_ms,
        }
    }
}

impl<C: Clone> Action<C> for MetricsOutputAction {
    fn apply(&self, ctx: &C, control: &mut dyn ActionControl<C>) -> ActionResult<C> {
        let report = self.report(control);
        (self.consumer)(&report);
        Ok(ctx.clone())
    }
}
