// Property tests for run statistics.
//
// - min/max/total steps agree with the iterations folded in
// - one bug report per failing iteration, in discovery order

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::collections::BTreeSet;

use proptest::prelude::*;
use tangle_runtime::{Bug, BugKind, ExecutionLog, IterationOutcome, ScheduleTrace, Termination};
use tangle_tester::TestReport;

fn outcome(iteration: u64, steps: u64, failed: bool) -> IterationOutcome {
    IterationOutcome {
        iteration,
        steps,
        termination: if failed {
            Termination::Bug
        } else {
            Termination::Quiescent
        },
        bug: failed.then(|| Bug::new(BugKind::AssertionFailure, format!("iteration {iteration}"))),
        trace: ScheduleTrace::new("random", true, Some(iteration)),
        log: ExecutionLog::disabled(),
        dropped_events: 0,
        actors_created: 0,
        visited_states: BTreeSet::new(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_step_statistics(runs in prop::collection::vec((0u64..10_000, any::<bool>()), 1..40)) {
        let mut report = TestReport::new("prop", "random", 0);
        for (iteration, (steps, failed)) in runs.iter().enumerate() {
            report.record(&outcome(iteration as u64, *steps, *failed));
        }

        let steps: Vec<u64> = runs.iter().map(|(steps, _)| *steps).collect();
        prop_assert_eq!(report.iterations, runs.len() as u64);
        prop_assert_eq!(report.min_steps, *steps.iter().min().unwrap());
        prop_assert_eq!(report.max_steps, *steps.iter().max().unwrap());
        prop_assert_eq!(report.total_steps, steps.iter().sum::<u64>());

        let failing: Vec<u64> = runs
            .iter()
            .enumerate()
            .filter(|(_, (_, failed))| *failed)
            .map(|(iteration, _)| iteration as u64)
            .collect();
        let reported: Vec<u64> = report.bugs.iter().map(|bug| bug.iteration).collect();
        prop_assert_eq!(reported, failing);
        prop_assert_eq!(report.passed(), report.bugs.is_empty());
    }
}
