//! Execution log of one iteration.
//!
//! Every observable runtime action is recorded as a [`LogEntry`]. The log is
//! rendered as the human-readable interleaving written next to a bug's
//! schedule trace, and each entry is mirrored to `tracing` at trace level.

use std::fmt;

use serde::{Deserialize, Serialize};
use tangle_types::{ActorId, Event, GroupId, MachineName, OperationId, StateName, TaskId, TimerId};

/// How the state stack changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackChange {
    /// Top replaced.
    Goto,
    /// State pushed.
    Push,
    /// Top popped.
    Pop,
}

impl fmt::Display for StackChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Goto => "goto",
            Self::Push => "push",
            Self::Pop => "pop",
        })
    }
}

/// One observable runtime action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogKind {
    /// The scheduler picked an operation.
    Scheduled { operation: OperationId },
    /// An actor was created.
    ActorCreated {
        actor: ActorId,
        machine: MachineName,
        creator: Option<OperationId>,
        group: GroupId,
    },
    /// An event was sent.
    Sent {
        from: Option<ActorId>,
        to: ActorId,
        event: Event,
        group: GroupId,
    },
    /// An event was dequeued for handling.
    Dequeued {
        actor: ActorId,
        state: StateName,
        event: Event,
    },
    /// A raised event is being handled.
    Raised {
        actor: ActorId,
        state: StateName,
        event: Event,
    },
    /// The default handler fired.
    DefaultFired { actor: ActorId, state: StateName },
    /// An entry action is running.
    Entered { actor: ActorId, state: StateName },
    /// An exit action is running.
    Exited { actor: ActorId, state: StateName },
    /// The state stack changed.
    StateChanged {
        actor: ActorId,
        change: StackChange,
        from: StateName,
        to: StateName,
    },
    /// An actor is waiting for a matching event.
    WaitingToReceive {
        actor: ActorId,
        state: StateName,
        filter: String,
    },
    /// A pending receive completed.
    Received {
        actor: ActorId,
        state: StateName,
        event: Event,
    },
    /// An event was dropped as ignored.
    Ignored { actor: ActorId, event: Event },
    /// An event could not be delivered because its target halted.
    Dropped { actor: ActorId, event: Event },
    /// An actor halted.
    Halted { actor: ActorId },
    /// A user exception hook classified an error.
    ExceptionHandled {
        actor: ActorId,
        error: String,
        outcome: String,
    },
    /// A controlled boolean choice.
    RandomBool { value: bool, fair: bool },
    /// A controlled integer choice.
    RandomInteger { value: u64, bound: u64 },
    /// A monitor handled an event.
    MonitorProcessed {
        monitor: MachineName,
        state: StateName,
        event: Event,
    },
    /// A monitor changed state.
    MonitorStateChanged {
        monitor: MachineName,
        from: StateName,
        to: StateName,
        temperature: String,
    },
    /// A task was spawned.
    TaskSpawned { task: TaskId, name: String },
    /// A task ran to completion.
    TaskCompleted { task: TaskId },
    /// A timer was started.
    TimerStarted {
        timer: TimerId,
        owner: ActorId,
        periodic: bool,
    },
    /// A timer delivered its event.
    TimerFired { timer: TimerId, owner: ActorId },
    /// A timer was stopped.
    TimerStopped { timer: TimerId },
    /// User log line.
    User { message: String },
    /// The iteration found a bug.
    Bug { message: String },
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled { operation } => write!(f, "<ScheduleLog> scheduled {operation}"),
            Self::ActorCreated {
                actor,
                machine,
                creator,
                group,
            } => {
                write!(f, "<CreateLog> {actor} ({machine}) created")?;
                if let Some(creator) = creator {
                    write!(f, " by {creator}")?;
                }
                if *group != GroupId::NONE {
                    write!(f, " in {group}")?;
                }
                Ok(())
            }
            Self::Sent {
                from,
                to,
                event,
                group,
            } => {
                match from {
                    Some(from) => write!(f, "<SendLog> {from} sent {event} to {to}")?,
                    None => write!(f, "<SendLog> {event} sent to {to}")?,
                }
                if *group != GroupId::NONE {
                    write!(f, " in {group}")?;
                }
                Ok(())
            }
            Self::Dequeued { actor, state, event } => {
                write!(f, "<DequeueLog> {actor} in state {state} dequeued {event}")
            }
            Self::Raised { actor, state, event } => {
                write!(f, "<RaiseLog> {actor} in state {state} raised {event}")
            }
            Self::DefaultFired { actor, state } => {
                write!(f, "<DefaultLog> {actor} in state {state} is executing the default handler")
            }
            Self::Entered { actor, state } => write!(f, "<StateLog> {actor} enters state {state}"),
            Self::Exited { actor, state } => write!(f, "<StateLog> {actor} exits state {state}"),
            Self::StateChanged {
                actor,
                change,
                from,
                to,
            } => write!(f, "<TransitionLog> {actor} {change} from {from} to {to}"),
            Self::WaitingToReceive {
                actor,
                state,
                filter,
            } => write!(f, "<ReceiveLog> {actor} in state {state} is waiting for {filter}"),
            Self::Received { actor, state, event } => {
                write!(f, "<ReceiveLog> {actor} in state {state} received {event}")
            }
            Self::Ignored { actor, event } => write!(f, "<IgnoreLog> {actor} ignored {event}"),
            Self::Dropped { actor, event } => {
                write!(f, "<DropLog> {event} to halted {actor} was dropped")
            }
            Self::Halted { actor } => write!(f, "<HaltLog> {actor} halted"),
            Self::ExceptionHandled {
                actor,
                error,
                outcome,
            } => write!(f, "<ExceptionLog> {actor} classified '{error}' as {outcome}"),
            Self::RandomBool { value, fair } => {
                let label = if *fair { "fair random" } else { "random" };
                write!(f, "<RandomLog> {label} boolean {value}")
            }
            Self::RandomInteger { value, bound } => {
                write!(f, "<RandomLog> random integer {value} below {bound}")
            }
            Self::MonitorProcessed {
                monitor,
                state,
                event,
            } => write!(f, "<MonitorLog> {monitor} in state {state} processed {event}"),
            Self::MonitorStateChanged {
                monitor,
                from,
                to,
                temperature,
            } => write!(f, "<MonitorLog> {monitor} moved from {from} to {to} ({temperature})"),
            Self::TaskSpawned { task, name } => write!(f, "<TaskLog> {task} '{name}' spawned"),
            Self::TaskCompleted { task } => write!(f, "<TaskLog> {task} completed"),
            Self::TimerStarted {
                timer,
                owner,
                periodic,
            } => {
                let label = if *periodic { "periodic" } else { "one-shot" };
                write!(f, "<TimerLog> {owner} started {label} {timer}")
            }
            Self::TimerFired { timer, owner } => write!(f, "<TimerLog> {timer} fired for {owner}"),
            Self::TimerStopped { timer } => write!(f, "<TimerLog> {timer} stopped"),
            Self::User { message } => write!(f, "<UserLog> {message}"),
            Self::Bug { message } => write!(f, "<ErrorLog> {message}"),
        }
    }
}

/// A log record tagged with the step and operation that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Scheduler step.
    pub step: u64,
    /// Operation that was running.
    pub operation: Option<OperationId>,
    /// What happened.
    #[serde(flatten)]
    pub kind: LogKind,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>5}] {}", self.step, self.kind)
    }
}

/// Ordered log of an iteration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionLog {
    entries: Vec<LogEntry>,
    #[serde(skip)]
    disabled: bool,
}

impl ExecutionLog {
    /// Empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A log that drops entries (tracing still sees them).
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            entries: Vec::new(),
            disabled: true,
        }
    }

    /// Append an entry.
    pub fn push(&mut self, step: u64, operation: Option<OperationId>, kind: LogKind) {
        tracing::trace!(step, ?operation, "{kind}");
        if !self.disabled {
            self.entries.push(LogEntry {
                step,
                operation,
                kind,
            });
        }
    }

    /// Recorded entries.
    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render one line per entry.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }
}
