//! Error types for the phaseflow engine.
//!
//! The taxonomy separates recoverable action failures from fatal jump and
//! configuration errors:
//!
//! - [`ActionError`] is raised by user code and is always recorded.
//! - [`JumpError`] is always fatal and is never suppressed by the
//!   continue-on-error policy.
//! - [`ConfigurationError`] surfaces at build or seal time.

use crate::core::Phase;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for phaseflow operations.
#[derive(Debug, Error)]
pub enum PhaseflowError {
    /// A configuration error occurred while building or sealing a pipeline.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A jump could not be performed.
    #[error("{0}")]
    Jump(#[from] JumpError),

    /// An action failed and the run was aborted.
    #[error("{0}")]
    Action(#[from] ActionError),

    /// A blocking wait (pool borrow or jump delay) was interrupted.
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// A bounded queue had no free capacity.
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// An engine was used after it stopped accepting work.
    #[error("Engine stopped: {0}")]
    EngineStopped(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PhaseflowError {
    /// Returns true if this error aborts a run regardless of the error policy.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Action(_))
    }
}

impl From<serde_json::Error> for PhaseflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Diagnostic metadata attached to configuration errors.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error code (e.g., "CONFIG-001-DUPLICATE_LABEL").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::Value::String(self.code.clone()));
        map.insert("summary".to_string(), serde_json::Value::String(self.summary.clone()));

        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::Value::String(hint.clone()));
        }
        if !self.context.is_empty() {
            let context_map: serde_json::Map<String, serde_json::Value> = self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            map.insert("context".to_string(), serde_json::Value::Object(context_map));
        }

        map
    }
}

/// Error raised when a pipeline definition is invalid or used incorrectly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// Diagnostic metadata.
    pub error_info: Option<ErrorInfo>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_info: None,
        }
    }

    /// Sets the error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }

    /// A label was declared twice in one pipeline.
    #[must_use]
    pub fn duplicate_label(pipeline: &str, label: &str) -> Self {
        Self::new(format!("Duplicate label '{label}' in pipeline '{pipeline}'")).with_error_info(
            ErrorInfo::new("CONFIG-001-DUPLICATE_LABEL", format!("Label '{label}' is already in use"))
                .with_fix_hint("Labels must be unique across pre, main and post phases.")
                .with_context_entry("pipeline", pipeline)
                .with_context_entry("label", label),
        )
    }

    /// The pipeline was mutated after it was sealed.
    #[must_use]
    pub fn sealed(pipeline: &str, operation: &str) -> Self {
        Self::new(format!(
            "Pipeline '{pipeline}' is sealed; '{operation}' is no longer allowed"
        ))
        .with_error_info(
            ErrorInfo::new("CONFIG-002-SEALED", "Mutation after seal")
                .with_fix_hint("Configure the pipeline completely before the first run.")
                .with_context_entry("pipeline", pipeline)
                .with_context_entry("operation", operation),
        )
    }

    /// A pooled action does not support reset.
    #[must_use]
    pub fn not_resettable(step: &str, type_name: &str) -> Self {
        Self::new(format!(
            "Pooled action '{step}' ({type_name}) does not support reset"
        ))
        .with_error_info(
            ErrorInfo::new("CONFIG-003-NOT_RESETTABLE", "Pooled actions must be resettable")
                .with_fix_hint("Implement LocalAction::reset or wrap the action with actions::resettable.")
                .with_context_entry("step", step)
                .with_context_entry("type", type_name),
        )
    }

    /// Two incompatible definitions were registered under one pool key.
    #[must_use]
    pub fn key_collision(key: &str, existing: &str, requested: &str) -> Self {
        Self::new(format!(
            "Action pool key '{key}' is bound to {existing}, cannot rebind to {requested}"
        ))
        .with_error_info(
            ErrorInfo::new("CONFIG-004-KEY_COLLISION", "Incompatible action definitions share a pool key")
                .with_fix_hint("Give one of the actions a distinct label or pipeline name.")
                .with_context_entry("key", key)
                .with_context_entry("existing", existing)
                .with_context_entry("requested", requested),
        )
    }

    /// A registry lookup found nothing under the given key.
    #[must_use]
    pub fn unknown_action(key: &str) -> Self {
        Self::new(format!("No action registered under '{key}'")).with_error_info(
            ErrorInfo::new("CONFIG-005-UNKNOWN_ACTION", "Unknown action key")
                .with_fix_hint("Register the action with the ActionRegistry at startup.")
                .with_context_entry("key", key),
        )
    }

    /// An action instance could not be constructed at bind time.
    #[must_use]
    pub fn construction(step: &str, cause: &ActionError) -> Self {
        Self::new(format!("Failed to construct action '{step}': {cause}")).with_error_info(
            ErrorInfo::new("CONFIG-006-CONSTRUCTION", "Action factory failed")
                .with_context_entry("step", step),
        )
    }

    /// A configuration value is out of range.
    #[must_use]
    pub fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(format!("Invalid value for '{field}': {reason}")).with_error_info(
            ErrorInfo::new("CONFIG-007-INVALID_VALUE", reason).with_context_entry("field", field),
        )
    }
}

/// Fatal errors raised by the jump interpreter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JumpError {
    /// The jump target is not declared in the pipeline.
    #[error("Unknown jump label '{label}' in pipeline '{pipeline}'")]
    UnknownLabel {
        /// The pipeline name.
        pipeline: String,
        /// The requested label.
        label: String,
    },

    /// The jump target lies in the pre phase.
    #[error("Jump into 'pre' is not allowed: label '{label}' resolves to index {target} (pre ends at {pre_boundary})")]
    IntoPreRegion {
        /// The requested label.
        label: String,
        /// The resolved index.
        target: usize,
        /// First index past the pre section.
        pre_boundary: usize,
    },

    /// The run exceeded its jump budget.
    #[error("Too many jumps in pipeline '{pipeline}' (max {max})")]
    BudgetExceeded {
        /// The pipeline name.
        pipeline: String,
        /// The configured maximum.
        max: usize,
    },

    /// The value carried into a jump target has the wrong runtime type.
    #[error("Jump to '{label}' expects input of type {expected}")]
    TypeMismatch {
        /// The target label.
        label: String,
        /// The expected type name.
        expected: String,
    },

    /// The final value of a typed run has the wrong runtime type.
    #[error("Pipeline '{pipeline}' produced a value that is not of type {expected}")]
    OutputTypeMismatch {
        /// The pipeline name.
        pipeline: String,
        /// The expected type name.
        expected: String,
    },
}

/// A failure raised by user action code.
///
/// Action errors are cheap to clone so they can be recorded in the control
/// log and still surfaced to the caller when a run aborts. Failures that
/// happen while cleaning up after an action (for example a pooled reset)
/// are attached as `suppressed` rather than replacing the original cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionError {
    message: String,
    suppressed: Vec<ActionError>,
}

impl ActionError {
    /// Creates a new action error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suppressed: Vec::new(),
        }
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns failures attached to this error during cleanup.
    #[must_use]
    pub fn suppressed(&self) -> &[ActionError] {
        &self.suppressed
    }

    /// Attaches a secondary failure.
    pub fn add_suppressed(&mut self, other: ActionError) {
        self.suppressed.push(other);
    }

    /// Attaches a secondary failure, builder style.
    #[must_use]
    pub fn with_suppressed(mut self, other: ActionError) -> Self {
        self.add_suppressed(other);
        self
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for other in &self.suppressed {
            write!(f, " (suppressed: {other})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ActionError {}

impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// An error entry in the per-run control log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedError {
    /// The pipeline that ran the action.
    pub pipeline_name: String,
    /// The phase of the failing action.
    pub phase: Phase,
    /// The index of the action within its phase.
    pub index: usize,
    /// The step name (e.g. "s1:validate").
    pub step_name: String,
    /// The failure.
    pub cause: ActionError,
}

impl RecordedError {
    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("pipeline".to_string(), serde_json::json!(self.pipeline_name));
        map.insert("phase".to_string(), serde_json::json!(self.phase.to_string()));
        map.insert("index".to_string(), serde_json::json!(self.index));
        map.insert("step".to_string(), serde_json::json!(self.step_name));
        map.insert("cause".to_string(), serde_json::json!(self.cause.to_string()));
        map
    }
}

impl fmt::Display for RecordedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}#{}): {}",
            self.pipeline_name, self.step_name, self.phase, self.index, self.cause
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_codes() {
        let err = ConfigurationError::duplicate_label("p", "loop");
        assert_eq!(err.code(), Some("CONFIG-001-DUPLICATE_LABEL"));
        assert!(err.to_string().contains("loop"));

        let err = ConfigurationError::sealed("p", "add_action");
        assert_eq!(err.code(), Some("CONFIG-002-SEALED"));
    }

    #[test]
    fn test_error_info_to_dict() {
        let info = ErrorInfo::new("CONFIG-004-KEY_COLLISION", "collision")
            .with_fix_hint("rename")
            .with_context_entry("key", "p:main:0");

        let dict = info.to_dict();
        assert_eq!(dict.get("code").and_then(|v| v.as_str()), Some("CONFIG-004-KEY_COLLISION"));
        assert_eq!(dict.get("fix_hint").and_then(|v| v.as_str()), Some("rename"));
        assert!(dict.contains_key("context"));
    }

    #[test]
    fn test_action_error_suppressed_display() {
        let err = ActionError::new("boom").with_suppressed(ActionError::new("reset failed"));
        assert_eq!(err.suppressed().len(), 1);
        assert_eq!(err.to_string(), "boom (suppressed: reset failed)");
    }

    #[test]
    fn test_action_error_from_anyhow_keeps_chain() {
        let source = anyhow::anyhow!("disk full").context("write failed");
        let err = ActionError::from(source);
        assert_eq!(err.message(), "write failed: disk full");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!PhaseflowError::from(ActionError::new("x")).is_fatal());
        let jump = JumpError::UnknownLabel {
            pipeline: "p".to_string(),
            label: "nope".to_string(),
        };
        assert!(PhaseflowError::from(jump).is_fatal());
        assert!(PhaseflowError::Interrupted("pool closed".to_string()).is_fatal());
    }
}
