//! Schedule traces.
//!
//! A trace is the ordered list of every decision a strategy made during one
//! iteration: which operation ran at each step and the value of every
//! controlled boolean and integer. Replaying a trace against the same test
//! reproduces the iteration exactly.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tangle_types::OperationId;

/// One scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleStep {
    /// An operation was scheduled.
    Operation {
        /// Chosen operation.
        id: OperationId,
    },
    /// A controlled boolean.
    Boolean {
        /// Chosen value.
        value: bool,
    },
    /// A controlled integer.
    Integer {
        /// Chosen value.
        value: u64,
    },
}

/// Errors reading or writing traces.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// Filesystem failure.
    #[error("trace I/O at {path}: {source}")]
    Io {
        /// File involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Malformed trace.
    #[error("trace format: {0}")]
    Format(#[from] serde_json::Error),
}

/// Recorded decisions of one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTrace {
    /// Name of the strategy that produced the trace.
    #[serde(default)]
    pub strategy: String,
    /// Whether the strategy was fair (selects the step bound on replay).
    #[serde(default)]
    pub fair: bool,
    /// Seed of the iteration, if the strategy was seeded.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Decisions in order.
    pub steps: Vec<ScheduleStep>,
}

impl ScheduleTrace {
    /// Empty trace.
    #[must_use]
    pub fn new(strategy: impl Into<String>, fair: bool, seed: Option<u64>) -> Self {
        Self {
            strategy: strategy.into(),
            fair,
            seed,
            steps: Vec::new(),
        }
    }

    /// Append a decision.
    pub fn push(&mut self, step: ScheduleStep) {
        self.steps.push(step);
    }

    /// Number of decisions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no decision was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of operation decisions (scheduler steps).
    #[must_use]
    pub fn scheduling_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, ScheduleStep::Operation { .. }))
            .count()
    }

    /// Serialize as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns a format error if serialization fails.
    pub fn to_json(&self) -> Result<String, TraceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON.
    ///
    /// # Errors
    ///
    /// Returns a format error on malformed input.
    pub fn from_json(text: &str) -> Result<Self, TraceError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read a trace file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, TraceError> {
        let content = std::fs::read_to_string(path).map_err(|source| TraceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Write a trace file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_to_file(&self, path: &Path) -> Result<(), TraceError> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|source| TraceError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}
