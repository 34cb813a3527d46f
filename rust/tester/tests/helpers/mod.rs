//! Sample programs shared by the engine integration tests.

use std::collections::{BTreeMap, VecDeque};

use tangle_runtime::{
    ActionResult, ActorContext, ActorError, MachineBuilder, Monitor, MonitorBuilder,
    MonitorRegistration, MonitorTransition, ReceiveFilter, StateMachine, TestEntry, Transition,
};
use tangle_tester::test_entry;
use tangle_types::{ActorId, Event, Value};

// ============================================================================
// Bounded buffer
// ============================================================================

/// Capacity-limited buffer. Requests that cannot proceed wait until another
/// request succeeds; `wake_all` chooses between waking every waiter and
/// waking only the oldest one.
pub struct Buffer {
    capacity: usize,
    items: VecDeque<i64>,
    waiting: VecDeque<ActorId>,
    wake_all: bool,
}

impl Buffer {
    pub fn new(capacity: usize, wake_all: bool) -> Self {
        Self {
            capacity,
            items: VecDeque::new(),
            waiting: VecDeque::new(),
            wake_all,
        }
    }

    fn wake(&mut self, ctx: &mut ActorContext<'_>) {
        let woken: Vec<ActorId> = if self.wake_all {
            self.waiting.drain(..).collect()
        } else {
            self.waiting.pop_front().into_iter().collect()
        };
        for waiter in woken {
            ctx.send(waiter, Event::unit("Retry"));
        }
    }
}

impl StateMachine for Buffer {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Buffer").state("Serving", |s| {
            s.start()
                .on_event("Put", |m: &mut Buffer, ctx, event| {
                    let from = event
                        .payload
                        .field("from")
                        .and_then(Value::as_actor)
                        .ok_or_else(|| ActorError::failure("put without sender"))?;
                    let value = event
                        .payload
                        .field("value")
                        .and_then(Value::as_int)
                        .unwrap_or_default();
                    if m.items.len() < m.capacity {
                        m.items.push_back(value);
                        ctx.send(from, Event::unit("Ok"));
                        m.wake(ctx);
                    } else {
                        m.waiting.push_back(from);
                    }
                    Ok(Transition::None)
                })
                .on_event("Take", |m: &mut Buffer, ctx, event| {
                    let from = event
                        .payload
                        .as_actor()
                        .ok_or_else(|| ActorError::failure("take without sender"))?;
                    match m.items.pop_front() {
                        Some(value) => {
                            ctx.send(from, Event::new("Ok", value));
                            m.wake(ctx);
                        }
                        None => m.waiting.push_back(from),
                    }
                    Ok(Transition::None)
                })
        })
    }
}

/// Puts each of its values, retrying when woken.
pub struct Producer {
    buffer: ActorId,
    remaining: Vec<i64>,
}

impl Producer {
    fn put_next(&mut self, ctx: &mut ActorContext<'_>) -> ActionResult<Self> {
        let Some(&value) = self.remaining.last() else {
            return Ok(Transition::Halt);
        };
        let me = ctx.actor_id();
        let payload = Value::record([("value", Value::from(value)), ("from", Value::from(me))]);
        ctx.send(self.buffer, Event::new("Put", payload));
        Ok(Transition::receive(
            ReceiveFilter::kinds(["Ok", "Retry"]),
            |m: &mut Producer, ctx, reply| {
                if reply.is("Ok") {
                    m.remaining.pop();
                }
                m.put_next(ctx)
            },
        ))
    }
}

impl StateMachine for Producer {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Producer").state("Producing", |s| {
            s.start()
                .on_entry(|m: &mut Producer, ctx, _initial| m.put_next(ctx))
        })
    }
}

/// Takes one value, retrying when woken.
pub struct Consumer {
    buffer: ActorId,
}

impl Consumer {
    fn take(&mut self, ctx: &mut ActorContext<'_>) -> ActionResult<Self> {
        let me = ctx.actor_id();
        ctx.send(self.buffer, Event::new("Take", me));
        Ok(Transition::receive(
            ReceiveFilter::kinds(["Ok", "Retry"]),
            |m: &mut Consumer, ctx, reply| {
                if reply.is("Ok") {
                    Ok(Transition::Halt)
                } else {
                    m.take(ctx)
                }
            },
        ))
    }
}

impl StateMachine for Consumer {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Consumer").state("Consuming", |s| {
            s.start()
                .on_entry(|m: &mut Consumer, ctx, _initial| m.take(ctx))
        })
    }
}

/// One producer of two values and two consumers over a buffer of capacity 1.
pub fn bounded_buffer(wake_all: bool) -> TestEntry {
    test_entry(move |ctx| {
        let buffer = ctx.create_actor(Buffer::new(1, wake_all));
        ctx.create_actor(Consumer { buffer });
        ctx.create_actor(Consumer { buffer });
        ctx.create_actor(Producer {
            buffer,
            remaining: vec![1, 2],
        });
        Ok(())
    })
}

// ============================================================================
// Account store
// ============================================================================

/// Key/value store of accounts. With `atomic` the existence check and the
/// insert happen in one step; otherwise clients check first and insert later.
#[derive(Default)]
pub struct Store {
    accounts: BTreeMap<String, i64>,
}

impl StateMachine for Store {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Store").state("Ready", |s| {
            s.start()
                .on_event("CreateIfAbsent", |m: &mut Store, ctx, event| {
                    let (name, from) = account_request(event)?;
                    let reply = if m.accounts.contains_key(&name) {
                        "Conflict"
                    } else {
                        m.accounts.insert(name, 0);
                        "Created"
                    };
                    ctx.send(from, Event::unit(reply));
                    Ok(Transition::None)
                })
                .on_event("Exists", |m: &mut Store, ctx, event| {
                    let (name, from) = account_request(event)?;
                    ctx.send(from, Event::new("Exists", m.accounts.contains_key(&name)));
                    Ok(Transition::None)
                })
                .on_event("Insert", |m: &mut Store, ctx, event| {
                    let (name, from) = account_request(event)?;
                    m.accounts.insert(name, 0);
                    ctx.send(from, Event::unit("Created"));
                    Ok(Transition::None)
                })
        })
    }
}

fn account_request(event: &Event) -> Result<(String, ActorId), ActorError> {
    let name = event.payload.field("name").and_then(Value::as_str);
    let from = event.payload.field("from").and_then(Value::as_actor);
    match (name, from) {
        (Some(name), Some(from)) => Ok((name.to_owned(), from)),
        _ => Err(ActorError::failure(format!("malformed request {event}"))),
    }
}

fn account_payload(name: &str, from: ActorId) -> Value {
    Value::record([("name", Value::from(name)), ("from", Value::from(from))])
}

/// Creates one account and reports the answer to [`AccountOutcomes`].
pub struct AccountClient {
    store: ActorId,
    name: &'static str,
    atomic: bool,
}

impl AccountClient {
    fn report(ctx: &mut ActorContext<'_>, reply: &Event) -> ActionResult<Self> {
        ctx.notify_monitor::<AccountOutcomes>(Event::unit(reply.kind.clone()));
        Ok(Transition::Halt)
    }
}

impl StateMachine for AccountClient {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("AccountClient").state("Creating", |s| {
            s.start()
                .on_entry(|m: &mut AccountClient, ctx, _initial| {
                    let me = ctx.actor_id();
                    let payload = account_payload(m.name, me);
                    if m.atomic {
                        ctx.send(m.store, Event::new("CreateIfAbsent", payload));
                        return Ok(Transition::receive(
                            ReceiveFilter::kinds(["Created", "Conflict"]),
                            |_m: &mut AccountClient, ctx, reply| AccountClient::report(ctx, reply),
                        ));
                    }
                    ctx.send(m.store, Event::new("Exists", payload));
                    Ok(Transition::receive(
                        ReceiveFilter::kind("Exists"),
                        |m: &mut AccountClient, ctx, reply| {
                            if reply.payload.as_bool().unwrap_or(true) {
                                return AccountClient::report(ctx, &Event::unit("Conflict"));
                            }
                            let me = ctx.actor_id();
                            ctx.send(m.store, Event::new("Insert", account_payload(m.name, me)));
                            Ok(Transition::receive(
                                ReceiveFilter::kind("Created"),
                                |_m: &mut AccountClient, ctx, reply| {
                                    AccountClient::report(ctx, reply)
                                },
                            ))
                        },
                    ))
                })
        })
    }
}

/// Both requests get an answer, and at most one of them creates the account.
#[derive(Default)]
pub struct AccountOutcomes {
    created: u32,
    conflicts: u32,
}

impl Monitor for AccountOutcomes {
    fn definition() -> MonitorBuilder<Self> {
        MonitorBuilder::new("AccountOutcomes")
            .state("Waiting", |s| {
                s.start()
                    .hot()
                    .on_event("Created", |m: &mut AccountOutcomes, ctx, _event| {
                        m.created += 1;
                        ctx.assert(m.created <= 1, "account created twice")?;
                        Ok(m.settle())
                    })
                    .on_event("Conflict", |m: &mut AccountOutcomes, _ctx, _event| {
                        m.conflicts += 1;
                        Ok(m.settle())
                    })
            })
            .state("Settled", |s| s.cold())
    }
}

impl AccountOutcomes {
    fn settle(&self) -> MonitorTransition {
        if self.created + self.conflicts == 2 {
            MonitorTransition::goto("Settled")
        } else {
            MonitorTransition::None
        }
    }
}

pub fn account_outcomes() -> MonitorRegistration {
    MonitorRegistration::new(AccountOutcomes::default)
}

/// Two clients create the same account concurrently.
pub fn duplicate_accounts(atomic: bool) -> TestEntry {
    test_entry(move |ctx| {
        let store = ctx.create_actor(Store::default());
        for _ in 0..2 {
            ctx.create_actor(AccountClient {
                store,
                name: "alice",
                atomic,
            });
        }
        Ok(())
    })
}

// ============================================================================
// Liveness
// ============================================================================

/// Hot until a "Cooled" event that nobody sends.
#[derive(Default)]
pub struct NeverCools;

impl Monitor for NeverCools {
    fn definition() -> MonitorBuilder<Self> {
        MonitorBuilder::new("NeverCools").state("Heating", |s| {
            s.start().hot().on_event("Cooled", |_m: &mut NeverCools, _ctx, _event| {
                Ok(MonitorTransition::None)
            })
        })
    }
}

/// Pings itself forever.
pub struct Heartbeat;

impl StateMachine for Heartbeat {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Heartbeat").state("Beating", |s| {
            s.start()
                .on_entry(|_m: &mut Heartbeat, ctx, _initial| {
                    let me = ctx.actor_id();
                    ctx.send(me, Event::unit("Beat"));
                    Ok(Transition::None)
                })
                .on_event("Beat", |_m: &mut Heartbeat, ctx, _event| {
                    let me = ctx.actor_id();
                    ctx.send(me, Event::unit("Beat"));
                    Ok(Transition::None)
                })
        })
    }
}

pub fn heartbeat() -> TestEntry {
    test_entry(|ctx| {
        ctx.create_actor(Heartbeat);
        Ok(())
    })
}

/// Alternates hot and cold on every beat.
#[derive(Default)]
pub struct Breathing;

impl Monitor for Breathing {
    fn definition() -> MonitorBuilder<Self> {
        MonitorBuilder::new("Breathing")
            .state("Inhale", |s| s.start().hot().on_goto("Beat", "Exhale"))
            .state("Exhale", |s| s.cold().on_goto("Beat", "Inhale"))
    }
}

/// Pings itself forever and reports every beat to [`Breathing`].
pub struct Breather;

impl StateMachine for Breather {
    fn definition() -> MachineBuilder<Self> {
        MachineBuilder::new("Breather").state("Breathing", |s| {
            s.start()
                .on_entry(|_m: &mut Breather, ctx, _initial| {
                    let me = ctx.actor_id();
                    ctx.send(me, Event::unit("Beat"));
                    Ok(Transition::None)
                })
                .on_event("Beat", |_m: &mut Breather, ctx, _event| {
                    ctx.notify_monitor::<Breathing>(Event::unit("Beat"));
                    let me = ctx.actor_id();
                    ctx.send(me, Event::unit("Beat"));
                    Ok(Transition::None)
                })
        })
    }
}

pub fn breather() -> TestEntry {
    test_entry(|ctx| {
        ctx.create_actor(Breather);
        Ok(())
    })
}
