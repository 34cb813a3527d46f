//! Iteration loop.
//!
//! The engine owns the strategy across iterations and builds a fresh
//! [`ControlledRuntime`] for each one, so no state leaks between iterations.
//! With a watchdog configured, each iteration runs on a helper thread; an
//! iteration that outlives the budget is stuck outside the scheduler's
//! control and ends the run with an uncontrolled-concurrency bug.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use tangle_runtime::strategy::ReplayStrategy;
use tangle_runtime::{
    ActorError, Bug, BugKind, ControlledRuntime, DefinitionRegistry, IterationOutcome,
    MonitorRegistration, ScheduleTrace, SchedulerConfig, SchedulingStrategy, TaskContext,
    TestEntry, TraceError,
};

use crate::config::{ConfigError, StrategyConfig, TestConfig};
use crate::report::{BugReport, ReportError, TestReport};

/// Errors that stop a test run before it produces a report.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Schedule to replay could not be loaded.
    #[error(transparent)]
    Trace(#[from] TraceError),
    /// Artifacts could not be written.
    #[error(transparent)]
    Report(#[from] ReportError),
    /// The scheduler itself panicked.
    #[error("iteration {0} crashed inside the scheduler")]
    Crashed(u64),
}

/// Wrap a closure as the entry point of a test.
pub fn test_entry<F>(body: F) -> TestEntry
where
    F: Fn(&mut TaskContext<'_>) -> Result<(), ActorError> + Send + Sync + 'static,
{
    Arc::new(body)
}

/// Everything an iteration needs besides the strategy.
#[derive(Clone)]
struct IterationSetup {
    registry: Arc<DefinitionRegistry>,
    config: Arc<SchedulerConfig>,
    monitors: Arc<Vec<MonitorRegistration>>,
    entry: TestEntry,
}

impl IterationSetup {
    fn run(&self, strategy: &mut dyn SchedulingStrategy, iteration: u64) -> IterationOutcome {
        let mut runtime =
            ControlledRuntime::new(strategy, &self.registry, &self.config, iteration);
        for monitor in self.monitors.iter() {
            runtime.register_monitor(monitor);
        }
        runtime.run(&self.entry)
    }
}

enum Step {
    Finished(Box<dyn SchedulingStrategy>, IterationOutcome),
    TimedOut,
}

/// Runs a test entry for many iterations under one strategy.
pub struct TestEngine {
    config: TestConfig,
    monitors: Vec<MonitorRegistration>,
}

impl std::fmt::Debug for TestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestEngine")
            .field("config", &self.config)
            .field("monitors", &self.monitors.len())
            .finish()
    }
}

impl TestEngine {
    /// Engine for a validated configuration.
    pub fn new(config: TestConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            monitors: Vec::new(),
        })
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Instantiate this monitor fresh in every iteration.
    pub fn register_monitor(&mut self, monitor: MonitorRegistration) -> &mut Self {
        self.monitors.push(monitor);
        self
    }

    /// Builder form of [`TestEngine::register_monitor`].
    #[must_use]
    pub fn with_monitor(mut self, monitor: MonitorRegistration) -> Self {
        self.monitors.push(monitor);
        self
    }

    /// Explore `entry` with the configured strategy.
    ///
    /// Stops at the first bug unless `continue_after_bug` is set, and writes
    /// artifacts when an output directory is configured and a bug was found.
    pub fn run(&self, entry: &TestEntry) -> Result<TestReport, EngineError> {
        let strategy: Box<dyn SchedulingStrategy> = match &self.config.strategy {
            StrategyConfig::Replay { path } => {
                let trace = ScheduleTrace::from_file(path)?;
                Box::new(ReplayStrategy::new(trace))
            }
            other => match other.kind() {
                Some(kind) => kind.build(self.config.seed, self.config.max_unfair_steps),
                None => {
                    let reason = "strategy has no runtime form".to_owned();
                    return Err(ConfigError::Invalid(reason).into());
                }
            },
        };
        self.explore(strategy, entry)
    }

    /// Re-execute a recorded schedule once.
    pub fn replay(
        &self,
        trace: ScheduleTrace,
        entry: &TestEntry,
    ) -> Result<TestReport, EngineError> {
        self.explore(Box::new(ReplayStrategy::new(trace)), entry)
    }

    fn explore(
        &self,
        mut strategy: Box<dyn SchedulingStrategy>,
        entry: &TestEntry,
    ) -> Result<TestReport, EngineError> {
        let setup = IterationSetup {
            registry: Arc::new(DefinitionRegistry::new()),
            config: Arc::new(self.config.scheduler_config()),
            monitors: Arc::new(self.monitors.clone()),
            entry: Arc::clone(entry),
        };
        let mut report = TestReport::new(&self.config.name, strategy.name(), self.config.seed);
        tracing::info!(
            test = %self.config.name,
            strategy = %strategy.name(),
            iterations = self.config.iterations,
            "exploration started"
        );

        for iteration in 0..self.config.iterations {
            if !strategy.prepare_iteration(iteration) {
                tracing::info!(iteration, "strategy exhausted");
                break;
            }
            let outcome = match self.run_iteration(&setup, strategy, iteration)? {
                Step::Finished(returned, outcome) => {
                    strategy = returned;
                    outcome
                }
                Step::TimedOut => {
                    let bug = Bug::new(
                        BugKind::UncontrolledConcurrency,
                        format!(
                            "iteration {iteration} did not yield to the scheduler within {} ms",
                            self.config.uncontrolled_timeout_ms.unwrap_or_default()
                        ),
                    );
                    tracing::error!(iteration, %bug, "uncontrolled concurrency");
                    report.iterations += 1;
                    report.bugs.push(BugReport::detached(&bug, iteration));
                    return self.finish(report);
                }
            };

            tracing::debug!(
                iteration,
                steps = outcome.steps,
                termination = ?outcome.termination,
                "iteration finished"
            );
            report.record(&outcome);
            if let Some(bug) = &outcome.bug {
                tracing::warn!(iteration, %bug, "bug found");
                if !self.config.continue_after_bug {
                    break;
                }
            }
        }

        report.exhausted = strategy.is_exhausted();
        self.finish(report)
    }

    fn run_iteration(
        &self,
        setup: &IterationSetup,
        mut strategy: Box<dyn SchedulingStrategy>,
        iteration: u64,
    ) -> Result<Step, EngineError> {
        let Some(timeout) = self.config.uncontrolled_timeout_ms else {
            let outcome = setup.run(strategy.as_mut(), iteration);
            return Ok(Step::Finished(strategy, outcome));
        };

        let (tx, rx) = mpsc::channel();
        let worker = setup.clone();
        std::thread::Builder::new()
            .name(format!("tangle-iteration-{iteration}"))
            .spawn(move || {
                let outcome = worker.run(strategy.as_mut(), iteration);
                // The receiver is gone only after a timeout.
                let _ = tx.send((strategy, outcome));
            })
            .map_err(|_| EngineError::Crashed(iteration))?;

        match rx.recv_timeout(Duration::from_millis(timeout)) {
            Ok((strategy, outcome)) => Ok(Step::Finished(strategy, outcome)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(Step::TimedOut),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(EngineError::Crashed(iteration)),
        }
    }

    fn finish(&self, mut report: TestReport) -> Result<TestReport, EngineError> {
        if let Some(dir) = &self.config.output_dir {
            if !report.passed() {
                report.write_artifacts(dir)?;
            }
        }
        tracing::info!(
            iterations = report.iterations,
            bugs = report.bugs_found(),
            "exploration finished"
        );
        Ok(report)
    }
}
