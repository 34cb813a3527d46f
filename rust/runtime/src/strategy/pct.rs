use std::collections::BTreeSet;

use tangle_types::OperationId;

use super::SchedulingStrategy;
use crate::rng::SimRng;

/// Probabilistic concurrency testing.
///
/// Every operation gets a random priority when first seen and the highest
/// priority enabled operation always runs. At `switch_points` randomly
/// chosen steps the running operation drops to the lowest priority. Change
/// points are drawn from the longest schedule observed so far.
pub struct PctStrategy {
    master: SimRng,
    rng: SimRng,
    seed: u64,
    iteration_seed: u64,
    switch_points: usize,
    /// Highest priority first.
    priorities: Vec<OperationId>,
    change_points: BTreeSet<u64>,
    steps: u64,
    max_schedule_length: u64,
}

impl PctStrategy {
    /// Strategy with `switch_points` priority changes per iteration.
    #[must_use]
    pub fn new(seed: u64, switch_points: usize) -> Self {
        Self {
            master: SimRng::new(seed),
            rng: SimRng::new(seed),
            seed,
            iteration_seed: seed,
            switch_points,
            priorities: Vec::new(),
            change_points: BTreeSet::new(),
            steps: 0,
            max_schedule_length: 0,
        }
    }

    fn pick_change_points(&mut self) {
        self.change_points.clear();
        if self.max_schedule_length < 2 {
            return;
        }
        let wanted = self
            .switch_points
            .min(usize::try_from(self.max_schedule_length - 1).unwrap_or(usize::MAX));
        while self.change_points.len() < wanted {
            let point = 1 + self.rng.next_below(self.max_schedule_length - 1);
            self.change_points.insert(point);
        }
    }

    fn learn(&mut self, enabled: &[OperationId]) {
        for op in enabled {
            if !self.priorities.contains(op) {
                let slot = self.rng.next_index(self.priorities.len() + 1);
                self.priorities.insert(slot, *op);
            }
        }
    }

    fn highest(&self, enabled: &[OperationId]) -> Option<OperationId> {
        self.priorities
            .iter()
            .find(|op| enabled.contains(op))
            .copied()
    }
}

impl SchedulingStrategy for PctStrategy {
    fn prepare_iteration(&mut self, _iteration: u64) -> bool {
        self.max_schedule_length = self.max_schedule_length.max(self.steps);
        self.steps = 0;
        self.priorities.clear();
        (self.iteration_seed, self.rng) = self.master.next_iteration();
        self.pick_change_points();
        true
    }

    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        _current: Option<OperationId>,
    ) -> Option<OperationId> {
        self.learn(enabled);
        self.steps += 1;
        if self.change_points.contains(&self.steps) {
            if let Some(top) = self.highest(enabled) {
                self.priorities.retain(|op| *op != top);
                self.priorities.push(top);
                tracing::trace!(step = self.steps, operation = %top, "pct priority change");
            }
        }
        self.highest(enabled)
    }

    fn next_boolean(&mut self, _current: OperationId) -> Option<bool> {
        Some(self.rng.next_bool())
    }

    fn next_integer(&mut self, _current: OperationId, bound: u64) -> Option<u64> {
        Some(self.rng.next_below(bound))
    }

    fn is_fair(&self) -> bool {
        false
    }

    fn name(&self) -> String {
        format!("pct(seed={}, switch_points={})", self.seed, self.switch_points)
    }

    fn iteration_seed(&self) -> Option<u64> {
        Some(self.iteration_seed)
    }
}
