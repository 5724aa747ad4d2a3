//! Pipeline phases and step naming.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The phase an action belongs to.
///
/// Phases execute in fixed order: pre, main, post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Fixed setup that always runs to completion.
    Pre,
    /// The steady-state steps; the only phase that short-circuits.
    Main,
    /// Cleanup and audit steps that always run.
    Post,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Main
    }
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Self; 3] = [Self::Pre, Self::Main, Self::Post];

    /// Returns the prefix used when naming steps of this phase.
    #[must_use]
    pub const fn step_prefix(self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Main => "s",
            Self::Post => "post",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pre => write!(f, "pre"),
            Self::Main => write!(f, "main"),
            Self::Post => write!(f, "post"),
        }
    }
}

/// Formats the name of a step: `pre0`, `s3`, `post1`, with `:label` appended
/// for labelled steps.
#[must_use]
pub fn step_name(phase: Phase, index: usize, label: Option<&str>) -> String {
    match label {
        Some(label) => format!("{}{index}:{label}", phase.step_prefix()),
        None => format!("{}{index}", phase.step_prefix()),
    }
}
