//! Actor execution semantics under the controlled runtime.
#![allow(clippy::too_many_lines)]

#[allow(dead_code, unreachable_pub)]
mod helpers;

use assert_matches::assert_matches;
use tangle_runtime::{
    ActorError, Bug, BugKind, ExceptionOutcome, LogKind, MachineBuilder, ReceiveFilter,
    StateMachine, TaskStep, Termination, Transition,
};
use tangle_types::{ActorId, Event};

use helpers::{entry, run_seeded, Journal, SEED};

// ============================================================================
// Messaging
// ============================================================================

struct Server {
    journal: Journal,
}

impl StateMachine for Server {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Server").state("Serving", |s| {
            s.start().on_event("Ping", |m: &mut Server, ctx, event| {
                let client = event
                    .payload
                    .as_actor()
                    .ok_or_else(|| ActorError::failure("ping without sender"))?;
                m.journal.note("ping");
                ctx.send(client, Event::unit("Pong"));
                Ok(Transition::None)
            })
        })
    }
}

struct Client {
    server: Option<ActorId>,
    pongs: u32,
}

impl StateMachine for Client {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Client").state("Active", |s| {
            s.start()
                .on_entry(|m: &mut Client, ctx, initial| {
                    let server = initial
                        .and_then(|e| e.payload.as_actor())
                        .ok_or_else(|| ActorError::failure("client needs a server"))?;
                    m.server = Some(server);
                    let me = ctx.actor_id();
                    ctx.send(server, Event::new("Ping", me));
                    Ok(Transition::None)
                })
                .on_event("Pong", |m: &mut Client, ctx, _event| {
                    m.pongs += 1;
                    if m.pongs == 3 {
                        return Ok(Transition::Halt);
                    }
                    let me = ctx.actor_id();
                    if let Some(server) = m.server {
                        ctx.send(server, Event::new("Ping", me));
                    }
                    Ok(Transition::None)
                })
        })
    }
}

#[test]
fn test_ping_pong_reaches_quiescence() {
    let journal = Journal::new();
    let observed = journal.clone();
    let test = entry(move |ctx| {
        let server = ctx.create_actor(Server {
            journal: observed.clone(),
        });
        ctx.create_actor_with(
            Client {
                server: None,
                pongs: 0,
            },
            Event::new("Init", server),
        );
        Ok(())
    });

    let outcome = run_seeded(SEED, &test);
    assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
    assert_eq!(outcome.termination, Termination::Quiescent);
    assert_eq!(journal.entries().len(), 3);
    assert_eq!(outcome.actors_created, 2);
    assert!(outcome
        .log
        .entries()
        .iter()
        .any(|e| matches!(e.kind, LogKind::Halted { .. })));
}

// ============================================================================
// State stack
// ============================================================================

struct Stack {
    journal: Journal,
}

impl StateMachine for Stack {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Stack")
            .state("Base", |s| {
                s.start()
                    .on_entry(|m: &mut Stack, _ctx, _initial| {
                        m.journal.note("enter Base");
                        Ok(Transition::None)
                    })
                    .on_push("Enter", "Sub")
                    .on_goto("Jump", "Base")
                    .on_event("Query", |m: &mut Stack, ctx, _event| {
                        let state = ctx
                            .current_state()
                            .map(ToString::to_string)
                            .unwrap_or_default();
                        m.journal.note(format!("query in {state}"));
                        Ok(Transition::None)
                    })
                    .on_event("PopRoot", |_m: &mut Stack, _ctx, _event| Ok(Transition::Pop))
            })
            .state("Sub", |s| {
                s.on_entry(|m: &mut Stack, _ctx, _initial| {
                    m.journal.note("enter Sub");
                    Ok(Transition::None)
                })
                .on_exit(|m: &mut Stack, _ctx| {
                    m.journal.note("exit Sub");
                    Ok(())
                })
                .on_event("Leave", |_m: &mut Stack, _ctx, _event| Ok(Transition::Pop))
            })
    }
}

fn stack_test(events: &'static [&'static str], journal: &Journal) -> tangle_runtime::TestEntry {
    let observed = journal.clone();
    entry(move |ctx| {
        let actor = ctx.create_actor(Stack {
            journal: observed.clone(),
        });
        for kind in events {
            ctx.send(actor, Event::unit(*kind));
        }
        Ok(())
    })
}

#[test]
fn test_pushed_state_inherits_handlers_and_pop_does_not_reenter() {
    let journal = Journal::new();
    let test = stack_test(&["Enter", "Query", "Leave", "Query"], &journal);
    let outcome = run_seeded(SEED, &test);

    assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
    assert_eq!(
        journal.entries(),
        vec![
            "enter Base",
            "enter Sub",
            "query in Sub",
            "exit Sub",
            "query in Base"
        ]
    );
}

#[test]
fn test_goto_binding_not_inherited_by_pushed_state() {
    let journal = Journal::new();
    let test = stack_test(&["Enter", "Jump"], &journal);
    let outcome = run_seeded(SEED, &test);
    assert_matches!(
        outcome.bug,
        Some(Bug {
            kind: BugKind::UnhandledEvent,
            ..
        })
    );
}

#[test]
fn test_pop_of_root_state_is_invalid() {
    let journal = Journal::new();
    let test = stack_test(&["PopRoot"], &journal);
    let outcome = run_seeded(SEED, &test);
    assert_matches!(
        outcome.bug,
        Some(Bug {
            kind: BugKind::InvalidTransition,
            ..
        })
    );
}

// ============================================================================
// Transition discipline
// ============================================================================

struct Greedy;

impl StateMachine for Greedy {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Greedy")
            .state("A", |s| {
                s.start()
                    .on_event("Both", |_m: &mut Greedy, ctx, _event| {
                        ctx.raise(Event::unit("Other"));
                        Ok(Transition::goto("B"))
                    })
                    .on_goto("Leave", "B")
                    .on_exit(|_m: &mut Greedy, ctx| {
                        ctx.goto("B");
                        Ok(())
                    })
            })
            .state("B", |s| s)
    }

    fn on_exception(&mut self, _error: &ActorError, _event: Option<&Event>) -> ExceptionOutcome {
        ExceptionOutcome::Handled
    }
}

#[test]
fn test_two_transitions_in_one_action_bypass_exception_hook() {
    let test = entry(|ctx| {
        let actor = ctx.create_actor(Greedy);
        ctx.send(actor, Event::unit("Both"));
        Ok(())
    });
    let outcome = run_seeded(SEED, &test);
    let bug = outcome.bug.expect("invalid transition reported");
    assert_eq!(bug.kind, BugKind::InvalidTransition);
    assert!(bug.message.contains("2 transitions"), "{}", bug.message);
}

#[test]
fn test_transition_from_exit_action_is_invalid() {
    let test = entry(|ctx| {
        let actor = ctx.create_actor(Greedy);
        ctx.send(actor, Event::unit("Leave"));
        Ok(())
    });
    let outcome = run_seeded(SEED, &test);
    let bug = outcome.bug.expect("invalid transition reported");
    assert_eq!(bug.kind, BugKind::InvalidTransition);
    assert!(bug.message.contains("exit action"), "{}", bug.message);
}

// ============================================================================
// Exceptions
// ============================================================================

struct Fragile {
    journal: Journal,
    policy: ExceptionOutcome,
}

impl StateMachine for Fragile {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Fragile").state("Running", |s| {
            s.start()
                .on_event("Fail", |_m: &mut Fragile, _ctx, _event| {
                    Err(ActorError::failure("boom"))
                })
                .on_event("Explode", |_m: &mut Fragile, _ctx, _event| {
                    panic!("exploded");
                })
                .on_event("Check", |_m: &mut Fragile, ctx, _event| {
                    ctx.assert(false, "invariant broken")?;
                    Ok(Transition::None)
                })
                .on_event("After", |m: &mut Fragile, _ctx, _event| {
                    m.journal.note("after");
                    Ok(Transition::None)
                })
        })
    }

    fn on_exception(&mut self, error: &ActorError, _event: Option<&Event>) -> ExceptionOutcome {
        self.journal.note(format!("hook: {error}"));
        self.policy
    }

    fn on_event_dropped(&mut self, event: &Event) {
        self.journal.note(format!("dropped {}", event.kind));
    }
}

fn fragile_test(
    events: &'static [&'static str],
    policy: ExceptionOutcome,
    journal: &Journal,
) -> tangle_runtime::TestEntry {
    let observed = journal.clone();
    entry(move |ctx| {
        let actor = ctx.create_actor(Fragile {
            journal: observed.clone(),
            policy,
        });
        for kind in events {
            ctx.send(actor, Event::unit(*kind));
        }
        Ok(())
    })
}

#[test]
fn test_handled_exception_lets_actor_continue() {
    let journal = Journal::new();
    let test = fragile_test(&["Fail", "After"], ExceptionOutcome::Handled, &journal);
    let outcome = run_seeded(SEED, &test);
    assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
    assert_eq!(journal.entries(), vec!["hook: boom", "after"]);
}

#[test]
fn test_rethrown_exception_is_a_bug() {
    let journal = Journal::new();
    let test = fragile_test(&["Fail"], ExceptionOutcome::Rethrow, &journal);
    let outcome = run_seeded(SEED, &test);
    assert_matches!(
        outcome.bug,
        Some(Bug {
            kind: BugKind::UnhandledException,
            ..
        })
    );
}

#[test]
fn test_panic_halts_actor_and_drops_queue() {
    let journal = Journal::new();
    let test = fragile_test(&["Explode", "After"], ExceptionOutcome::Halt, &journal);
    let outcome = run_seeded(SEED, &test);

    assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
    assert_eq!(outcome.dropped_events, 1);
    let entries = journal.entries();
    assert!(entries[0].starts_with("hook: "), "{entries:?}");
    assert!(entries[0].contains("exploded"), "{entries:?}");
    assert_eq!(entries[1], "dropped After");
}

#[test]
fn test_assertion_bypasses_exception_hook() {
    let journal = Journal::new();
    let test = fragile_test(&["Check"], ExceptionOutcome::Handled, &journal);
    let outcome = run_seeded(SEED, &test);

    let bug = outcome.bug.expect("assertion reported");
    assert_eq!(bug.kind, BugKind::AssertionFailure);
    assert!(bug.message.contains("invariant broken"));
    assert!(journal.entries().is_empty());
}

// ============================================================================
// Receive, defer, default
// ============================================================================

struct Responder;

impl StateMachine for Responder {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Responder").state("Ready", |s| {
            s.start().on_event("Request", |_m: &mut Responder, ctx, event| {
                if let Some(requester) = event.payload.as_actor() {
                    ctx.send(requester, Event::new("Reply", 7));
                }
                Ok(Transition::None)
            })
        })
    }
}

struct Requester {
    journal: Journal,
    responder: Option<ActorId>,
}

impl StateMachine for Requester {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Requester").state("Asking", |s| {
            s.start()
                .on_entry(|m: &mut Requester, ctx, _initial| {
                    let me = ctx.actor_id();
                    match m.responder {
                        Some(responder) => ctx.send(responder, Event::new("Request", me)),
                        None => return Ok(Transition::None),
                    }
                    Ok(Transition::receive(
                        ReceiveFilter::kind("Reply"),
                        |m: &mut Requester, _ctx, event| {
                            let value = event.payload.as_int().unwrap_or_default();
                            m.journal.note(format!("reply {value}"));
                            Ok(Transition::None)
                        },
                    ))
                })
                .on_event("Note", |m: &mut Requester, _ctx, _event| {
                    m.journal.note("note");
                    Ok(Transition::None)
                })
        })
    }
}

#[test]
fn test_receive_waits_for_matching_event_only() {
    let journal = Journal::new();
    let observed = journal.clone();
    let test = entry(move |ctx| {
        let responder = ctx.create_actor(Responder);
        let requester = ctx.create_actor(Requester {
            journal: observed.clone(),
            responder: Some(responder),
        });
        ctx.send(requester, Event::unit("Note"));
        Ok(())
    });

    for seed in 0..20 {
        journal.clear();
        let outcome = run_seeded(SEED + seed, &test);
        assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
        assert_eq!(journal.entries(), vec!["reply 7", "note"]);
    }
}

#[test]
fn test_receive_without_sender_deadlocks() {
    struct Lonely;
    impl StateMachine for Lonely {
        fn definition() -> MachineBuilder<Self> {
            MachineBuilder::new("Lonely").state("Waiting", |s| {
                s.start().on_entry(|_m: &mut Lonely, _ctx, _initial| {
                    Ok(Transition::receive(
                        ReceiveFilter::kind("Never"),
                        |_m: &mut Lonely, _ctx, _event| Ok(Transition::None),
                    ))
                })
            })
        }
    }

    let test = entry(|ctx| {
        ctx.create_actor(Lonely);
        Ok(())
    });
    let outcome = run_seeded(SEED, &test);
    let bug = outcome.bug.expect("deadlock reported");
    assert_eq!(bug.kind, BugKind::Deadlock);
    assert!(bug.message.contains("waiting to receive Never"), "{}", bug.message);
}

struct Gate {
    journal: Journal,
}

impl StateMachine for Gate {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Gate")
            .state("Closed", |s| s.start().defer("Work").on_goto("Open", "Opened"))
            .state("Opened", |s| {
                s.on_event("Work", |m: &mut Gate, _ctx, event| {
                    m.journal.note(format!("work {}", event.payload));
                    Ok(Transition::None)
                })
            })
    }
}

#[test]
fn test_deferred_events_handled_after_state_change_in_order() {
    let journal = Journal::new();
    let observed = journal.clone();
    let test = entry(move |ctx| {
        let gate = ctx.create_actor(Gate {
            journal: observed.clone(),
        });
        ctx.send(gate, Event::new("Work", 1));
        ctx.send(gate, Event::new("Work", 2));
        ctx.send(gate, Event::unit("Open"));
        Ok(())
    });
    let outcome = run_seeded(SEED, &test);
    assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
    assert_eq!(journal.entries(), vec!["work 1", "work 2"]);
}

struct Poller {
    journal: Journal,
}

impl StateMachine for Poller {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Poller")
            .state("Polling", |s| {
                s.start().on_default(|m: &mut Poller, _ctx, _event| {
                    m.journal.note("default");
                    Ok(Transition::goto("Done"))
                })
            })
            .state("Done", |s| s)
    }
}

#[test]
fn test_default_handler_fires_when_queue_is_empty() {
    let journal = Journal::new();
    let observed = journal.clone();
    let test = entry(move |ctx| {
        ctx.create_actor(Poller {
            journal: observed.clone(),
        });
        Ok(())
    });
    let outcome = run_seeded(SEED, &test);
    assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
    assert_eq!(outcome.termination, Termination::Quiescent);
    assert_eq!(journal.entries(), vec!["default"]);
}

// ============================================================================
// Wildcards, halting, timers, tasks
// ============================================================================

struct Catchall {
    journal: Journal,
}

impl StateMachine for Catchall {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Catchall").state("Any", |s| {
            s.start()
                .on_event("Stop", |_m: &mut Catchall, ctx, _event| {
                    ctx.halt();
                    Ok(Transition::None)
                })
                .on_any(|m: &mut Catchall, _ctx, event| {
                    m.journal.note(format!("any {}", event.kind));
                    Ok(Transition::None)
                })
        })
    }
}

#[test]
fn test_wildcard_does_not_catch_halt() {
    let journal = Journal::new();
    let observed = journal.clone();
    let test = entry(move |ctx| {
        let actor = ctx.create_actor(Catchall {
            journal: observed.clone(),
        });
        ctx.send(actor, Event::unit("Hello"));
        ctx.send(actor, Event::unit("Stop"));
        ctx.send(actor, Event::unit("Late"));
        Ok(())
    });
    let outcome = run_seeded(SEED, &test);
    assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
    assert_eq!(journal.entries(), vec!["any Hello"]);
    assert_eq!(outcome.dropped_events, 1);
}

#[test]
fn test_reserved_halt_binding_rejected_at_creation() {
    struct Stubborn;
    impl StateMachine for Stubborn {
        fn definition() -> MachineBuilder<Self> {
            MachineBuilder::new("Stubborn").state("A", |s| s.start().ignore("halt"))
        }
    }

    let test = entry(|ctx| {
        ctx.create_actor(Stubborn);
        Ok(())
    });
    let outcome = run_seeded(SEED, &test);
    assert_matches!(
        outcome.bug,
        Some(Bug {
            kind: BugKind::InvalidDeclaration,
            ..
        })
    );
}

struct Sleeper {
    journal: Journal,
}

impl StateMachine for Sleeper {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Sleeper").state("Sleeping", |s| {
            s.start()
                .on_entry(|_m: &mut Sleeper, ctx, _initial| {
                    ctx.start_timer(Event::unit("Wake"));
                    Ok(Transition::None)
                })
                .on_event("Wake", |m: &mut Sleeper, _ctx, _event| {
                    m.journal.note("woke");
                    Ok(Transition::Halt)
                })
        })
    }
}

#[test]
fn test_one_shot_timer_fires_once() {
    let journal = Journal::new();
    let observed = journal.clone();
    let test = entry(move |ctx| {
        ctx.create_actor(Sleeper {
            journal: observed.clone(),
        });
        Ok(())
    });
    let outcome = run_seeded(SEED, &test);
    assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
    assert_eq!(journal.entries(), vec!["woke"]);
    let fired = outcome
        .log
        .entries()
        .iter()
        .filter(|e| matches!(e.kind, LogKind::TimerFired { .. }))
        .count();
    assert_eq!(fired, 1);
}

#[test]
fn test_task_resumes_after_actor_halts() {
    let journal = Journal::new();
    let observed = journal.clone();
    let test = entry(move |ctx| {
        let actor = ctx.create_actor(Catchall {
            journal: Journal::new(),
        });
        let watcher_journal = observed.clone();
        let mut waited = false;
        ctx.spawn_task("watcher", move |_ctx| {
            if !waited {
                waited = true;
                return Ok(TaskStep::WaitActorHalted(actor));
            }
            watcher_journal.note("saw halt");
            Ok(TaskStep::Done)
        });
        ctx.send(actor, Event::unit("Stop"));
        Ok(())
    });

    for seed in 0..10 {
        journal.clear();
        let outcome = run_seeded(SEED + seed, &test);
        assert!(outcome.bug.is_none(), "{:?}", outcome.bug);
        assert_eq!(outcome.termination, Termination::Quiescent);
        assert_eq!(journal.entries(), vec!["saw halt"]);
    }
}
