//! Scheduling strategies.
//!
//! A strategy answers every nondeterministic question the controlled
//! runtime asks: which enabled operation runs next, and what value a
//! controlled boolean or integer takes. Strategies are the only source of
//! nondeterminism in a test run.

mod combo;
mod dfs;
mod pct;
mod random;
mod replay;

use serde::{Deserialize, Serialize};
use tangle_types::OperationId;

pub use combo::ComboStrategy;
pub use dfs::DfsStrategy;
pub use pct::PctStrategy;
pub use random::RandomStrategy;
pub use replay::ReplayStrategy;

/// Decision procedure for one test run.
pub trait SchedulingStrategy: Send {
    /// Prepare iteration `iteration` (0-based).
    ///
    /// Returns `false` when the strategy has nothing left to explore.
    fn prepare_iteration(&mut self, iteration: u64) -> bool;

    /// Pick one of `enabled` (never empty, sorted by id).
    ///
    /// `None` ends the iteration; see [`SchedulingStrategy::failure`].
    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        current: Option<OperationId>,
    ) -> Option<OperationId>;

    /// Value of a controlled boolean.
    fn next_boolean(&mut self, current: OperationId) -> Option<bool>;

    /// Value of a controlled integer in `[0, bound)`.
    fn next_integer(&mut self, current: OperationId, bound: u64) -> Option<u64>;

    /// Whether every enabled operation is eventually scheduled.
    fn is_fair(&self) -> bool;

    /// Short description for reports.
    fn name(&self) -> String;

    /// Seed of the current iteration, for reproduction notes.
    fn iteration_seed(&self) -> Option<u64> {
        None
    }

    /// Why the strategy stopped answering, if it failed.
    fn failure(&self) -> Option<String> {
        None
    }

    /// Whether the strategy has explored everything it can.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Serializable choice of strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyKind {
    /// Uniform random choices (fair).
    #[default]
    Random,
    /// Probabilistic concurrency testing with `switch_points` priority changes.
    Pct {
        /// Priority change points per iteration.
        switch_points: usize,
    },
    /// PCT for the unfair prefix, then random (fair).
    FairPct {
        /// Priority change points per iteration.
        switch_points: usize,
    },
    /// Systematic depth-first enumeration.
    Dfs,
}

impl StrategyKind {
    /// Instantiate the strategy.
    ///
    /// `max_unfair_steps` bounds DFS depth and the PCT prefix of fair PCT.
    #[must_use]
    pub fn build(self, seed: u64, max_unfair_steps: u64) -> Box<dyn SchedulingStrategy> {
        match self {
            Self::Random => Box::new(RandomStrategy::new(seed)),
            Self::Pct { switch_points } => Box::new(PctStrategy::new(seed, switch_points)),
            Self::FairPct { switch_points } => Box::new(ComboStrategy::new(
                Box::new(PctStrategy::new(seed, switch_points)),
                Box::new(RandomStrategy::new(seed.wrapping_add(1))),
                max_unfair_steps,
            )),
            Self::Dfs => Box::new(DfsStrategy::new(max_unfair_steps)),
        }
    }
}
