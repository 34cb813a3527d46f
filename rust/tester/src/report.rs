//! Test reports and on-disk artifacts.
//!
//! Each failing iteration becomes a [`BugReport`] holding the rendered
//! execution log and the replayable schedule. [`TestReport::write_artifacts`]
//! stores them as `<name>.schedule.json` and `<name>.log.txt`, plus the
//! whole report as `<name>.report.json`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tangle_runtime::{Bug, BugKind, IterationOutcome, ScheduleTrace, Termination, TraceError};
use tangle_types::OperationId;

/// Errors writing or reading report artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Filesystem failure.
    #[error("report I/O at {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// JSON encoding or decoding failed.
    #[error("report format: {0}")]
    Format(#[from] serde_json::Error),
    /// A schedule file could not be written.
    #[error(transparent)]
    Trace(#[from] TraceError),
}

/// One bug and what is needed to reproduce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugReport {
    /// Classification.
    pub kind: BugKind,
    /// Description.
    pub message: String,
    /// Iteration that found it.
    pub iteration: u64,
    /// Scheduling steps taken before it surfaced.
    pub steps: u64,
    /// Operation running when it surfaced.
    pub operation: Option<OperationId>,
    /// Seed of the failing iteration, when the strategy is seeded.
    pub seed: Option<u64>,
    /// Human-readable interleaving.
    pub log: String,
    /// Replayable decisions.
    pub schedule: ScheduleTrace,
    /// Schedule file, once written.
    #[serde(default)]
    pub schedule_path: Option<PathBuf>,
    /// Log file, once written.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

impl BugReport {
    /// Build a report from a failing iteration.
    #[must_use]
    pub fn from_outcome(outcome: &IterationOutcome, bug: &Bug) -> Self {
        Self {
            kind: bug.kind,
            message: bug.message.clone(),
            iteration: outcome.iteration,
            steps: outcome.steps,
            operation: bug.operation,
            seed: outcome.trace.seed,
            log: outcome.log.render(),
            schedule: outcome.trace.clone(),
            schedule_path: None,
            log_path: None,
        }
    }

    /// Bug found outside any controlled iteration.
    #[must_use]
    pub fn detached(bug: &Bug, iteration: u64) -> Self {
        Self {
            kind: bug.kind,
            message: bug.message.clone(),
            iteration,
            steps: bug.step,
            operation: bug.operation,
            seed: None,
            log: String::new(),
            schedule: ScheduleTrace::default(),
            schedule_path: None,
            log_path: None,
        }
    }
}

impl fmt::Display for BugReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (iteration {}, {} steps)",
            self.kind, self.message, self.iteration, self.steps
        )?;
        if let Some(path) = &self.schedule_path {
            write!(f, "\n  reproduce with {}", path.display())?;
        }
        Ok(())
    }
}

/// Summary of a test run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    /// Test name.
    pub name: String,
    /// Strategy description.
    pub strategy: String,
    /// Master seed.
    pub seed: u64,
    /// Iterations run.
    pub iterations: u64,
    /// Bugs found, in discovery order.
    pub bugs: Vec<BugReport>,
    /// Fewest steps taken by an iteration.
    pub min_steps: u64,
    /// Most steps taken by an iteration.
    pub max_steps: u64,
    /// Steps across all iterations.
    pub total_steps: u64,
    /// Iterations that stopped at the step bound.
    pub bound_reached: u64,
    /// Distinct `Machine.State` pairs entered across all iterations.
    pub states_covered: usize,
    /// Whether the strategy ran out of schedules to try.
    pub exhausted: bool,
    #[serde(skip)]
    covered: std::collections::BTreeSet<String>,
}

impl TestReport {
    /// Empty report.
    #[must_use]
    pub fn new(name: impl Into<String>, strategy: impl Into<String>, seed: u64) -> Self {
        Self {
            name: name.into(),
            strategy: strategy.into(),
            seed,
            ..Self::default()
        }
    }

    /// Fold one finished iteration into the totals.
    pub fn record(&mut self, outcome: &IterationOutcome) {
        self.min_steps = if self.iterations == 0 {
            outcome.steps
        } else {
            self.min_steps.min(outcome.steps)
        };
        self.max_steps = self.max_steps.max(outcome.steps);
        self.total_steps += outcome.steps;
        self.iterations += 1;
        if outcome.termination == Termination::BoundReached {
            self.bound_reached += 1;
        }
        self.covered.extend(outcome.visited_states.iter().cloned());
        self.states_covered = self.covered.len();
        if let Some(bug) = &outcome.bug {
            self.bugs.push(BugReport::from_outcome(outcome, bug));
        }
    }

    /// Number of bugs found.
    #[must_use]
    pub fn bugs_found(&self) -> usize {
        self.bugs.len()
    }

    /// Whether no bug was found.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.bugs.is_empty()
    }

    /// First bug found.
    #[must_use]
    pub fn first_bug(&self) -> Option<&BugReport> {
        self.bugs.first()
    }

    /// Write the report and every bug's schedule and log into `dir`.
    ///
    /// The first bug uses `<name>`; later ones get a `_<n>` suffix.
    pub fn write_artifacts(&mut self, dir: &Path) -> Result<PathBuf, ReportError> {
        std::fs::create_dir_all(dir).map_err(|source| ReportError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        for (index, bug) in self.bugs.iter_mut().enumerate() {
            let stem = if index == 0 {
                self.name.clone()
            } else {
                format!("{}_{index}", self.name)
            };
            let schedule_path = dir.join(format!("{stem}.schedule.json"));
            bug.schedule.write_to_file(&schedule_path)?;
            let log_path = dir.join(format!("{stem}.log.txt"));
            write_file(&log_path, &format!("{bug}\n\n{}", bug.log))?;
            bug.schedule_path = Some(schedule_path);
            bug.log_path = Some(log_path);
        }

        let report_path = dir.join(format!("{}.report.json", self.name));
        write_file(&report_path, &serde_json::to_string_pretty(self)?)?;
        tracing::info!(path = %report_path.display(), bugs = self.bugs.len(), "report written");
        Ok(report_path)
    }

    /// Read a report written by [`TestReport::write_artifacts`].
    pub fn from_file(path: &Path) -> Result<Self, ReportError> {
        let text = std::fs::read_to_string(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), ReportError> {
    std::fs::write(path, contents).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "... Test '{}' with strategy {}", self.name, self.strategy)?;
        writeln!(
            f,
            "... Explored {} iteration{} ({} steps, min {}, max {})",
            self.iterations,
            if self.iterations == 1 { "" } else { "s" },
            self.total_steps,
            self.min_steps,
            self.max_steps
        )?;
        if self.exhausted {
            writeln!(f, "... Strategy explored every schedule")?;
        }
        let found = self.bugs.len();
        writeln!(f, "... Found {found} bug{}", if found == 1 { "" } else { "s" })?;
        for bug in &self.bugs {
            writeln!(f, "  {bug}")?;
        }
        Ok(())
    }
}
