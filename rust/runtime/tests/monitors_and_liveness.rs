//! Safety and liveness monitors under the controlled runtime.

#[allow(dead_code, unreachable_pub)]
mod helpers;

use std::collections::BTreeSet;

use tangle_runtime::{
    BugKind, MachineBuilder, Monitor, MonitorBuilder, MonitorRegistration, MonitorTransition,
    SchedulerConfig, StateMachine, Termination, Transition,
};
use tangle_types::Event;

use helpers::{entry, run_monitored, Journal, SEED};

// ============================================================================
// Monitors
// ============================================================================

/// Every issued ticket is unique.
#[derive(Default)]
struct UniqueTickets {
    seen: BTreeSet<i64>,
}

impl Monitor for UniqueTickets {
    fn definition() -> MonitorBuilder<Self> {
        MonitorBuilder::new("UniqueTickets").state("Checking", |s| {
            s.start().on_event("Issued", |m: &mut UniqueTickets, ctx, event| {
                let ticket = event.payload.as_int().unwrap_or_default();
                ctx.assert(m.seen.insert(ticket), format!("ticket {ticket} issued twice"))?;
                Ok(MonitorTransition::None)
            })
        })
    }
}

/// Every request is eventually served.
#[derive(Default)]
struct EventuallyServed;

impl Monitor for EventuallyServed {
    fn definition() -> MonitorBuilder<Self> {
        MonitorBuilder::new("EventuallyServed")
            .state("Served", |s| {
                s.start()
                    .cold()
                    .on_goto("Request", "Pending")
                    .ignore("Served")
            })
            .state("Pending", |s| {
                s.hot().ignore("Request").on_goto("Served", "Served")
            })
    }
}

/// Observes only "Ping"; anything else must not reach it.
struct PingWatcher {
    journal: Journal,
}

impl Monitor for PingWatcher {
    fn definition() -> MonitorBuilder<Self> {
        MonitorBuilder::new("PingWatcher").state("Watching", |s| {
            s.start().on_event("Ping", |m: &mut PingWatcher, _ctx, event| {
                m.journal.note(format!("ping {}", event.payload));
                Ok(MonitorTransition::None)
            })
        })
    }
}

// ============================================================================
// Actors
// ============================================================================

struct Issuer {
    ticket: i64,
}

impl StateMachine for Issuer {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Issuer").state("Issuing", |s| {
            s.start().on_entry(|m: &mut Issuer, ctx, _initial| {
                ctx.notify_monitor::<UniqueTickets>(Event::new("Issued", m.ticket));
                Ok(Transition::Halt)
            })
        })
    }
}

/// Raises a request, then optionally serves it.
struct Worker {
    serves: bool,
}

impl StateMachine for Worker {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Worker").state("Working", |s| {
            s.start()
                .on_entry(|_m: &mut Worker, ctx, _initial| {
                    ctx.notify_monitor::<EventuallyServed>(Event::unit("Request"));
                    let me = ctx.actor_id();
                    ctx.send(me, Event::unit("Finish"));
                    Ok(Transition::None)
                })
                .on_event("Finish", |m: &mut Worker, ctx, _event| {
                    if m.serves {
                        ctx.notify_monitor::<EventuallyServed>(Event::unit("Served"));
                    }
                    Ok(Transition::Halt)
                })
        })
    }
}

/// Requests service, then spins forever without serving it.
struct Spinner;

impl StateMachine for Spinner {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Spinner").state("Spinning", |s| {
            s.start()
                .on_entry(|_m: &mut Spinner, ctx, _initial| {
                    ctx.notify_monitor::<EventuallyServed>(Event::unit("Request"));
                    let me = ctx.actor_id();
                    ctx.send(me, Event::unit("Tick"));
                    Ok(Transition::None)
                })
                .on_event("Tick", |_m: &mut Spinner, ctx, _event| {
                    let me = ctx.actor_id();
                    ctx.send(me, Event::unit("Tick"));
                    Ok(Transition::None)
                })
        })
    }
}

fn tickets() -> MonitorRegistration {
    MonitorRegistration::new(UniqueTickets::default)
}

fn served() -> MonitorRegistration {
    MonitorRegistration::new(|| EventuallyServed)
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_safety_monitor_reports_duplicate() {
    let test = entry(|ctx| {
        ctx.create_actor(Issuer { ticket: 1 });
        ctx.create_actor(Issuer { ticket: 2 });
        ctx.create_actor(Issuer { ticket: 1 });
        Ok(())
    });
    let outcome = run_monitored(SEED, &SchedulerConfig::default(), &[tickets()], &test);
    let bug = outcome.bug.expect("duplicate ticket reported");
    assert_eq!(bug.kind, BugKind::AssertionFailure);
    assert!(bug.message.contains("ticket 1 issued twice"), "{}", bug.message);
}

#[test]
fn test_safety_monitor_quiet_on_unique_tickets() {
    let test = entry(|ctx| {
        for ticket in 0..4 {
            ctx.create_actor(Issuer { ticket });
        }
        Ok(())
    });
    let outcome = run_monitored(SEED, &SchedulerConfig::default(), &[tickets()], &test);
    assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
    assert_eq!(outcome.termination, Termination::Quiescent);
}

#[test]
fn test_notification_without_registered_monitor_is_ignored() {
    let test = entry(|ctx| {
        ctx.create_actor(Issuer { ticket: 1 });
        ctx.create_actor(Issuer { ticket: 1 });
        Ok(())
    });
    let outcome = run_monitored(SEED, &SchedulerConfig::default(), &[], &test);
    assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
}

#[test]
fn test_cold_monitor_at_quiescence_is_fine() {
    let test = entry(|ctx| {
        ctx.create_actor(Worker { serves: true });
        ctx.create_actor(Worker { serves: true });
        Ok(())
    });
    let outcome = run_monitored(SEED, &SchedulerConfig::default(), &[served()], &test);
    assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
    assert_eq!(outcome.termination, Termination::Quiescent);
}

#[test]
fn test_hot_monitor_at_quiescence_is_liveness_bug() {
    let test = entry(|ctx| {
        ctx.create_actor(Worker { serves: false });
        Ok(())
    });
    let outcome = run_monitored(SEED, &SchedulerConfig::default(), &[served()], &test);
    let bug = outcome.bug.expect("liveness violation");
    assert_eq!(bug.kind, BugKind::LivenessViolation);
    assert!(bug.message.contains("end of execution"), "{}", bug.message);
    assert!(bug.message.contains("Pending"), "{}", bug.message);
}

#[test]
fn test_hot_for_too_long_is_liveness_bug() {
    let config = SchedulerConfig {
        liveness_temperature_threshold: Some(20),
        ..SchedulerConfig::default()
    };
    let test = entry(|ctx| {
        ctx.create_actor(Spinner);
        Ok(())
    });
    let outcome = run_monitored(SEED, &config, &[served()], &test);
    let bug = outcome.bug.expect("liveness violation");
    assert_eq!(bug.kind, BugKind::LivenessViolation);
    assert!(bug.message.contains("more than 20 steps"), "{}", bug.message);
    assert!(outcome.steps < 100);
}

#[test]
fn test_fair_hot_cycle_is_liveness_bug() {
    let config = SchedulerConfig {
        cycle_detection: true,
        ..SchedulerConfig::default()
    };
    let test = entry(|ctx| {
        ctx.create_actor(Spinner);
        Ok(())
    });
    let outcome = run_monitored(SEED, &config, &[served()], &test);
    let bug = outcome.bug.expect("liveness violation");
    assert_eq!(bug.kind, BugKind::LivenessViolation);
    assert!(bug.message.contains("fair cycle"), "{}", bug.message);
    assert!(outcome.steps < 10, "found after {} steps", outcome.steps);
}

#[test]
fn test_broadcast_reaches_only_interested_monitors() {
    let journal = Journal::new();
    let observed = journal.clone();
    let watcher = MonitorRegistration::new(move || PingWatcher {
        journal: observed.clone(),
    });
    let test = entry(|ctx| {
        ctx.notify_monitors(Event::new("Ping", 1));
        ctx.notify_monitors(Event::new("Issued", 9));
        Ok(())
    });
    let outcome = run_monitored(
        SEED,
        &SchedulerConfig::default(),
        &[watcher, tickets()],
        &test,
    );
    assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
    assert_eq!(journal.entries(), vec!["ping 1"]);
}
