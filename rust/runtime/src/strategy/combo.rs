use tangle_types::OperationId;

use super::SchedulingStrategy;

/// Runs `prefix` for the first `prefix_steps` scheduling steps of every
/// iteration, then `suffix`.
///
/// With an unfair prefix and a fair suffix the combination is fair, which
/// is how fair PCT is built.
pub struct ComboStrategy {
    prefix: Box<dyn SchedulingStrategy>,
    suffix: Box<dyn SchedulingStrategy>,
    prefix_steps: u64,
    steps: u64,
}

impl ComboStrategy {
    /// Combine two strategies.
    #[must_use]
    pub fn new(
        prefix: Box<dyn SchedulingStrategy>,
        suffix: Box<dyn SchedulingStrategy>,
        prefix_steps: u64,
    ) -> Self {
        Self {
            prefix,
            suffix,
            prefix_steps,
            steps: 0,
        }
    }

    fn active(&mut self) -> &mut dyn SchedulingStrategy {
        if self.steps <= self.prefix_steps {
            self.prefix.as_mut()
        } else {
            self.suffix.as_mut()
        }
    }
}

impl SchedulingStrategy for ComboStrategy {
    fn prepare_iteration(&mut self, iteration: u64) -> bool {
        self.steps = 0;
        let prefix = self.prefix.prepare_iteration(iteration);
        let suffix = self.suffix.prepare_iteration(iteration);
        prefix && suffix
    }

    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        current: Option<OperationId>,
    ) -> Option<OperationId> {
        self.steps += 1;
        self.active().next_operation(enabled, current)
    }

    fn next_boolean(&mut self, current: OperationId) -> Option<bool> {
        self.active().next_boolean(current)
    }

    fn next_integer(&mut self, current: OperationId, bound: u64) -> Option<u64> {
        self.active().next_integer(current, bound)
    }

    fn is_fair(&self) -> bool {
        self.suffix.is_fair()
    }

    fn name(&self) -> String {
        format!("{}+{}", self.prefix.name(), self.suffix.name())
    }

    fn iteration_seed(&self) -> Option<u64> {
        self.prefix.iteration_seed()
    }

    fn failure(&self) -> Option<String> {
        self.prefix.failure().or_else(|| self.suffix.failure())
    }

    fn is_exhausted(&self) -> bool {
        self.prefix.is_exhausted() || self.suffix.is_exhausted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{PctStrategy, RandomStrategy};

    #[test]
    fn test_fairness_comes_from_suffix() {
        let combo = ComboStrategy::new(
            Box::new(PctStrategy::new(1, 2)),
            Box::new(RandomStrategy::new(2)),
            10,
        );
        assert!(combo.is_fair());
        assert!(combo.name().starts_with("pct("));
    }

    #[test]
    fn test_switches_after_prefix() {
        let mut combo = ComboStrategy::new(
            Box::new(PctStrategy::new(1, 0)),
            Box::new(RandomStrategy::new(2)),
            5,
        );
        assert!(combo.prepare_iteration(0));
        let enabled = [OperationId(1), OperationId(2)];
        let prefix: Vec<_> = (0..5)
            .filter_map(|_| combo.next_operation(&enabled, None))
            .collect();
        assert!(prefix.windows(2).all(|w| w[0] == w[1]));
        let suffix: Vec<_> = (0..200)
            .filter_map(|_| combo.next_operation(&enabled, None))
            .collect();
        assert!(suffix.contains(&OperationId(1)));
        assert!(suffix.contains(&OperationId(2)));
    }
}
