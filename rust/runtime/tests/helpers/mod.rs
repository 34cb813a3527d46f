//! Shared fixtures for runtime integration tests.

use std::sync::{Arc, Mutex};

use tangle_runtime::strategy::RandomStrategy;
use tangle_runtime::{
    ActorError, ControlledRuntime, DefinitionRegistry, IterationOutcome, MonitorRegistration,
    SchedulerConfig, SchedulingStrategy, TaskContext, TestEntry,
};

/// Deterministic seed for reproducibility.
pub const SEED: u64 = 0x7461_6e67_6c65;

/// Wrap a closure as a test entry.
pub fn entry<F>(body: F) -> TestEntry
where
    F: Fn(&mut TaskContext<'_>) -> Result<(), ActorError> + Send + Sync + 'static,
{
    Arc::new(body)
}

/// Run one iteration under `strategy`.
pub fn run_with(
    strategy: &mut dyn SchedulingStrategy,
    config: &SchedulerConfig,
    monitors: &[MonitorRegistration],
    entry: &TestEntry,
    iteration: u64,
) -> IterationOutcome {
    let registry = DefinitionRegistry::new();
    let mut runtime = ControlledRuntime::new(strategy, &registry, config, iteration);
    for monitor in monitors {
        runtime.register_monitor(monitor);
    }
    runtime.run(entry)
}

/// Run one random iteration with default limits.
pub fn run_seeded(seed: u64, entry: &TestEntry) -> IterationOutcome {
    run_monitored(seed, &SchedulerConfig::default(), &[], entry)
}

/// Run one random iteration with monitors and custom limits.
pub fn run_monitored(
    seed: u64,
    config: &SchedulerConfig,
    monitors: &[MonitorRegistration],
    entry: &TestEntry,
) -> IterationOutcome {
    let mut strategy = RandomStrategy::new(seed);
    strategy.prepare_iteration(0);
    run_with(&mut strategy, config, monitors, entry, 0)
}

/// Run `iterations` random iterations, stopping at the first bug.
pub fn explore(iterations: u64, entry: &TestEntry) -> Option<IterationOutcome> {
    let mut strategy = RandomStrategy::new(SEED);
    let config = SchedulerConfig::default();
    for iteration in 0..iterations {
        strategy.prepare_iteration(iteration);
        let outcome = run_with(&mut strategy, &config, &[], entry, iteration);
        if outcome.is_bug() {
            return Some(outcome);
        }
    }
    None
}

/// Shared, clonable record of observations made by actors.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note(&self, entry: impl Into<String>) {
        self.0.lock().expect("journal lock").push(entry.into());
    }

    pub fn clear(&self) {
        self.0.lock().expect("journal lock").clear();
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("journal lock").clone()
    }
}
