use tangle_types::OperationId;

use super::SchedulingStrategy;
use crate::trace::{ScheduleStep, ScheduleTrace};

/// Replays a recorded trace, failing on the first mismatch.
#[derive(Debug)]
pub struct ReplayStrategy {
    trace: ScheduleTrace,
    cursor: usize,
    failure: Option<String>,
}

impl ReplayStrategy {
    /// Replay `trace` for a single iteration.
    #[must_use]
    pub fn new(trace: ScheduleTrace) -> Self {
        Self {
            trace,
            cursor: 0,
            failure: None,
        }
    }

    fn next_step(&mut self, expected: &str) -> Option<ScheduleStep> {
        let Some(step) = self.trace.steps.get(self.cursor).copied() else {
            self.fail(format!(
                "trace ended after {} decisions while the program asked for {expected}",
                self.cursor
            ));
            return None;
        };
        self.cursor += 1;
        Some(step)
    }

    fn fail(&mut self, reason: String) {
        if self.failure.is_none() {
            tracing::warn!(%reason, "replay diverged");
            self.failure = Some(reason);
        }
    }

    /// Whether every recorded decision was consumed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.cursor == self.trace.steps.len()
    }
}

impl SchedulingStrategy for ReplayStrategy {
    fn prepare_iteration(&mut self, iteration: u64) -> bool {
        self.cursor = 0;
        iteration == 0
    }

    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        _current: Option<OperationId>,
    ) -> Option<OperationId> {
        let index = self.cursor;
        match self.next_step("an operation")? {
            ScheduleStep::Operation { id } if enabled.contains(&id) => Some(id),
            ScheduleStep::Operation { id } => {
                self.fail(format!("decision {index}: recorded {id} is not enabled"));
                None
            }
            other => {
                self.fail(format!("decision {index}: expected an operation, found {other:?}"));
                None
            }
        }
    }

    fn next_boolean(&mut self, _current: OperationId) -> Option<bool> {
        let index = self.cursor;
        match self.next_step("a boolean")? {
            ScheduleStep::Boolean { value } => Some(value),
            other => {
                self.fail(format!("decision {index}: expected a boolean, found {other:?}"));
                None
            }
        }
    }

    fn next_integer(&mut self, _current: OperationId, bound: u64) -> Option<u64> {
        let index = self.cursor;
        match self.next_step("an integer")? {
            ScheduleStep::Integer { value } if value < bound.max(1) => Some(value),
            other => {
                self.fail(format!(
                    "decision {index}: expected an integer below {bound}, found {other:?}"
                ));
                None
            }
        }
    }

    fn is_fair(&self) -> bool {
        self.trace.fair
    }

    fn name(&self) -> String {
        format!("replay({})", self.trace.strategy)
    }

    fn iteration_seed(&self) -> Option<u64> {
        self.trace.seed
    }

    fn failure(&self) -> Option<String> {
        self.failure.clone()
    }
}
