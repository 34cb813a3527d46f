use tangle_types::OperationId;

use super::SchedulingStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    Operation(OperationId),
    Boolean(bool),
    Integer(u64),
}

/// Alternatives at one decision point. Integer ranges stay symbolic.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Options {
    List(Vec<Choice>),
    Integer { bound: u64 },
}

impl Options {
    fn count(&self) -> u64 {
        match self {
            Self::List(choices) => choices.len() as u64,
            Self::Integer { bound } => (*bound).max(1),
        }
    }

    fn get(&self, index: u64) -> Option<Choice> {
        match self {
            Self::List(choices) => usize::try_from(index)
                .ok()
                .and_then(|i| choices.get(i))
                .copied(),
            Self::Integer { .. } => (index < self.count()).then_some(Choice::Integer(index)),
        }
    }
}

#[derive(Debug)]
struct Level {
    options: Options,
    index: u64,
}

/// Systematic depth-first exploration of every schedule up to a depth bound.
///
/// Each decision point pushes a level holding its options. At the end of an
/// iteration the deepest level with untried options advances and everything
/// below it is discarded; the strategy is exhausted once no level is left.
#[derive(Debug)]
pub struct DfsStrategy {
    stack: Vec<Level>,
    depth: usize,
    max_depth: u64,
    steps: u64,
    exhausted: bool,
}

impl DfsStrategy {
    /// Explore schedules of at most `max_depth` scheduling steps.
    #[must_use]
    pub fn new(max_depth: u64) -> Self {
        Self {
            stack: Vec::new(),
            depth: 0,
            max_depth,
            steps: 0,
            exhausted: false,
        }
    }

    fn choose(&mut self, options: Options) -> Option<Choice> {
        if options.count() == 0 {
            return None;
        }
        if self.depth < self.stack.len() {
            if self.stack[self.depth].options != options {
                // The program took a different path under the same prefix;
                // restart exploration below this point.
                self.stack.truncate(self.depth);
                self.stack.push(Level { options, index: 0 });
            }
        } else {
            self.stack.push(Level { options, index: 0 });
        }
        let level = &self.stack[self.depth];
        let choice = level.options.get(level.index);
        self.depth += 1;
        choice
    }

    fn backtrack(&mut self) -> bool {
        self.stack.truncate(self.depth);
        while let Some(level) = self.stack.last_mut() {
            if level.index + 1 < level.options.count() {
                level.index += 1;
                return true;
            }
            self.stack.pop();
        }
        false
    }
}

impl SchedulingStrategy for DfsStrategy {
    fn prepare_iteration(&mut self, iteration: u64) -> bool {
        if iteration > 0 && !self.backtrack() {
            self.exhausted = true;
        }
        self.depth = 0;
        self.steps = 0;
        !self.exhausted
    }

    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        _current: Option<OperationId>,
    ) -> Option<OperationId> {
        if self.steps >= self.max_depth {
            return None;
        }
        self.steps += 1;
        let options = Options::List(enabled.iter().copied().map(Choice::Operation).collect());
        match self.choose(options) {
            Some(Choice::Operation(op)) => Some(op),
            _ => None,
        }
    }

    fn next_boolean(&mut self, _current: OperationId) -> Option<bool> {
        match self.choose(Options::List(vec![Choice::Boolean(false), Choice::Boolean(true)])) {
            Some(Choice::Boolean(value)) => Some(value),
            _ => None,
        }
    }

    fn next_integer(&mut self, _current: OperationId, bound: u64) -> Option<u64> {
        match self.choose(Options::Integer { bound }) {
            Some(Choice::Integer(value)) => Some(value),
            _ => None,
        }
    }

    fn is_fair(&self) -> bool {
        false
    }

    fn name(&self) -> String {
        format!("dfs(max_depth={})", self.max_depth)
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two independent binary decisions per iteration.
    fn iterate(dfs: &mut DfsStrategy) -> (bool, bool) {
        let a = dfs.next_boolean(OperationId(1)).expect("a");
        let b = dfs.next_boolean(OperationId(1)).expect("b");
        (a, b)
    }

    #[test]
    fn test_enumerates_all_paths_then_exhausts() {
        let mut dfs = DfsStrategy::new(10);
        let mut seen = Vec::new();
        let mut iteration = 0;
        while dfs.prepare_iteration(iteration) {
            seen.push(iterate(&mut dfs));
            iteration += 1;
        }
        assert_eq!(
            seen,
            vec![(false, false), (false, true), (true, false), (true, true)]
        );
        assert!(dfs.is_exhausted());
    }

    #[test]
    fn test_integer_levels_are_not_enumerated() {
        let mut dfs = DfsStrategy::new(10);
        assert!(dfs.prepare_iteration(0));
        assert_eq!(dfs.next_integer(OperationId(1), u64::MAX), Some(0));
        assert!(dfs.prepare_iteration(1));
        assert_eq!(dfs.next_integer(OperationId(1), u64::MAX), Some(1));
        assert!(!dfs.is_exhausted());
    }

    #[test]
    fn test_integer_levels_exhaust_small_bounds() {
        let mut dfs = DfsStrategy::new(10);
        let mut seen = Vec::new();
        let mut iteration = 0;
        while dfs.prepare_iteration(iteration) {
            seen.push(dfs.next_integer(OperationId(1), 3).expect("value"));
            iteration += 1;
        }
        assert_eq!(seen, vec![0, 1, 2]);

        let mut zero = DfsStrategy::new(10);
        assert!(zero.prepare_iteration(0));
        assert_eq!(zero.next_integer(OperationId(1), 0), Some(0));
        assert!(!zero.prepare_iteration(1));
    }

    #[test]
    fn test_depth_bound_stops_iteration() {
        let mut dfs = DfsStrategy::new(2);
        assert!(dfs.prepare_iteration(0));
        let enabled = [OperationId(1)];
        assert!(dfs.next_operation(&enabled, None).is_some());
        assert!(dfs.next_operation(&enabled, None).is_some());
        assert!(dfs.next_operation(&enabled, None).is_none());
    }
}
