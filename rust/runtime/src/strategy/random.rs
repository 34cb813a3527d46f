use tangle_types::OperationId;

use super::SchedulingStrategy;
use crate::rng::SimRng;

/// Uniformly random scheduling. Fair with probability one.
pub struct RandomStrategy {
    master: SimRng,
    rng: SimRng,
    seed: u64,
    iteration_seed: u64,
}

impl RandomStrategy {
    /// Strategy whose iterations derive from `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            master: SimRng::new(seed),
            rng: SimRng::new(seed),
            seed,
            iteration_seed: seed,
        }
    }
}

impl SchedulingStrategy for RandomStrategy {
    fn prepare_iteration(&mut self, _iteration: u64) -> bool {
        (self.iteration_seed, self.rng) = self.master.next_iteration();
        true
    }

    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        _current: Option<OperationId>,
    ) -> Option<OperationId> {
        enabled.get(self.rng.next_index(enabled.len())).copied()
    }

    fn next_boolean(&mut self, _current: OperationId) -> Option<bool> {
        Some(self.rng.next_bool())
    }

    fn next_integer(&mut self, _current: OperationId, bound: u64) -> Option<u64> {
        Some(self.rng.next_below(bound))
    }

    fn is_fair(&self) -> bool {
        true
    }

    fn name(&self) -> String {
        format!("random(seed={})", self.seed)
    }

    fn iteration_seed(&self) -> Option<u64> {
        Some(self.iteration_seed)
    }
}
