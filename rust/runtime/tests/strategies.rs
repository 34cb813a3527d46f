//! Strategy behaviour: replay fidelity, systematic exhaustion, PCT.

#[allow(dead_code, unreachable_pub)]
mod helpers;

use std::collections::BTreeSet;

use tangle_runtime::strategy::{DfsStrategy, PctStrategy, ReplayStrategy};
use tangle_runtime::{
    BugKind, MachineBuilder, ScheduleStep, SchedulerConfig, SchedulingStrategy,
    StateMachine, TestEntry, Transition,
};
use tangle_types::{ActorId, Event, OperationId};

use helpers::{entry, explore, run_with, Journal};

/// Records writes in arrival order; in strict mode the first write must be 1.
struct Register {
    journal: Journal,
    strict: bool,
    writes: u32,
}

impl StateMachine for Register {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Register").state("Open", |s| {
            s.start().on_event("Write", |m: &mut Register, ctx, event| {
                let value = event.payload.as_int().unwrap_or_default();
                m.journal.note(value.to_string());
                m.writes += 1;
                if m.strict && m.writes == 1 {
                    ctx.assert(value == 1, format!("first write was {value}"))?;
                }
                Ok(Transition::None)
            })
        })
    }
}

struct Writer {
    register: ActorId,
    value: i64,
}

impl StateMachine for Writer {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Writer").state("Writing", |s| {
            s.start().on_entry(|m: &mut Writer, ctx, _initial| {
                ctx.send(m.register, Event::new("Write", m.value));
                Ok(Transition::Halt)
            })
        })
    }
}

fn racing_writers(strict: bool, journal: &Journal) -> TestEntry {
    let observed = journal.clone();
    entry(move |ctx| {
        let register = ctx.create_actor(Register {
            journal: observed.clone(),
            strict,
            writes: 0,
        });
        ctx.create_actor(Writer { register, value: 2 });
        ctx.create_actor(Writer { register, value: 1 });
        Ok(())
    })
}

#[test]
fn test_replay_reproduces_bug_and_log() {
    let journal = Journal::new();
    let test = racing_writers(true, &journal);
    let found = explore(200, &test).expect("ordering bug found");
    let bug = found.bug.clone().expect("bug");
    assert_eq!(bug.kind, BugKind::AssertionFailure);

    let mut replay = ReplayStrategy::new(found.trace.clone());
    assert!(replay.prepare_iteration(0));
    let replayed = run_with(&mut replay, &SchedulerConfig::default(), &[], &test, 0);

    assert_eq!(replayed.bug, Some(bug));
    assert_eq!(replayed.steps, found.steps);
    assert_eq!(replayed.log.render(), found.log.render());
    assert!(replay.is_complete());
}

#[test]
fn test_replay_of_truncated_trace_diverges() {
    let journal = Journal::new();
    let test = racing_writers(true, &journal);
    let found = explore(200, &test).expect("ordering bug found");

    let mut trace = found.trace.clone();
    trace.steps.truncate(1);
    let mut replay = ReplayStrategy::new(trace);
    replay.prepare_iteration(0);
    let replayed = run_with(&mut replay, &SchedulerConfig::default(), &[], &test, 0);

    let bug = replayed.bug.expect("divergence");
    assert_eq!(bug.kind, BugKind::ReplayDivergence);
    assert!(bug.message.contains("trace ended"), "{}", bug.message);
}

#[test]
fn test_replay_of_foreign_operation_diverges() {
    let journal = Journal::new();
    let test = racing_writers(true, &journal);
    let found = explore(200, &test).expect("ordering bug found");

    let mut trace = found.trace.clone();
    trace.steps[0] = ScheduleStep::Operation {
        id: OperationId(999),
    };
    let mut replay = ReplayStrategy::new(trace);
    replay.prepare_iteration(0);
    let replayed = run_with(&mut replay, &SchedulerConfig::default(), &[], &test, 0);

    let bug = replayed.bug.expect("divergence");
    assert_eq!(bug.kind, BugKind::ReplayDivergence);
    assert!(bug.message.contains("not enabled"), "{}", bug.message);
}

#[test]
fn test_replay_runs_a_single_iteration() {
    let mut replay = ReplayStrategy::new(tangle_runtime::ScheduleTrace::default());
    assert!(replay.prepare_iteration(0));
    assert!(!replay.prepare_iteration(1));
}

#[test]
fn test_dfs_enumerates_both_orders_and_exhausts() {
    let journal = Journal::new();
    let test = racing_writers(false, &journal);
    let config = SchedulerConfig::default();
    let mut dfs = DfsStrategy::new(config.max_unfair_steps);

    let mut orders = BTreeSet::new();
    let mut iteration = 0;
    while dfs.prepare_iteration(iteration) {
        journal.clear();
        let outcome = run_with(&mut dfs, &config, &[], &test, iteration);
        assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
        orders.insert(journal.entries().join(","));
        iteration += 1;
        assert!(iteration < 10_000, "dfs did not terminate");
    }

    assert!(dfs.is_exhausted());
    assert!(iteration > 1);
    let expected: BTreeSet<String> = ["1,2", "2,1"].iter().map(ToString::to_string).collect();
    assert_eq!(orders, expected);
}

#[test]
fn test_dfs_finds_ordering_bug() {
    let journal = Journal::new();
    let test = racing_writers(true, &journal);
    let config = SchedulerConfig::default();
    let mut dfs = DfsStrategy::new(config.max_unfair_steps);

    let mut iteration = 0;
    let mut found = None;
    while dfs.prepare_iteration(iteration) {
        let outcome = run_with(&mut dfs, &config, &[], &test, iteration);
        if outcome.is_bug() {
            found = outcome.bug;
            break;
        }
        iteration += 1;
    }
    let bug = found.expect("dfs reaches the failing order");
    assert!(bug.message.contains("first write was 2"), "{}", bug.message);
}

#[test]
fn test_pct_finds_ordering_bug() {
    let journal = Journal::new();
    let test = racing_writers(true, &journal);
    let config = SchedulerConfig::default();
    let mut pct = PctStrategy::new(helpers::SEED, 2);
    assert!(!pct.is_fair());

    let found = (0..200).find_map(|iteration| {
        pct.prepare_iteration(iteration);
        let outcome = run_with(&mut pct, &config, &[], &test, iteration);
        outcome.bug
    });
    let bug = found.expect("pct reaches the failing order");
    assert_eq!(bug.kind, BugKind::AssertionFailure);
}

#[test]
fn test_controlled_choices_are_recorded_and_replayed() {
    let journal = Journal::new();
    let observed = journal.clone();
    let test = entry(move |ctx| {
        let coin = ctx.random_bool();
        let die = ctx.random_integer(6);
        observed.note(format!("{coin}/{die}"));
        Ok(())
    });

    let outcome = helpers::run_seeded(helpers::SEED, &test);
    assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
    assert!(outcome
        .trace
        .steps
        .iter()
        .any(|step| matches!(step, ScheduleStep::Boolean { .. })));
    assert!(outcome
        .trace
        .steps
        .iter()
        .any(|step| matches!(step, ScheduleStep::Integer { value } if *value < 6)));

    let first = journal.entries();
    journal.clear();
    let mut replay = ReplayStrategy::new(outcome.trace.clone());
    replay.prepare_iteration(0);
    let replayed = run_with(&mut replay, &SchedulerConfig::default(), &[], &test, 0);
    assert!(replayed.bug.is_none(), "{:?}", replayed.bug);
    assert_eq!(journal.entries(), first);
}

#[test]
fn test_dfs_walks_huge_integer_ranges_lazily() {
    let journal = Journal::new();
    let observed = journal.clone();
    let test = entry(move |ctx| {
        let small = ctx.random_integer(1 << 40);
        let large = ctx.random_integer(u64::MAX);
        observed.note(format!("{small}/{large}"));
        Ok(())
    });
    let config = SchedulerConfig::default();
    let mut dfs = DfsStrategy::new(config.max_unfair_steps);

    for iteration in 0..4 {
        assert!(dfs.prepare_iteration(iteration));
        let outcome = run_with(&mut dfs, &config, &[], &test, iteration);
        assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
    }
    assert!(!dfs.is_exhausted());
    assert_eq!(journal.entries(), vec!["0/0", "0/1", "0/2", "0/3"]);
}
