//! Controlled tasks and timers.
//!
//! A task is a resumable step function: each scheduling decision runs one
//! step, and the step's [`TaskStep`] says whether the task yields, waits on
//! another operation, or is done. Timers are operations whose only action
//! is delivering an event to their owner, so when they fire is itself a
//! scheduling decision.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tangle_types::{ActorId, Event, EventInfo, GroupId, OperationId, TaskId, TimerId};

use crate::context::{RuntimeHandle, RuntimeServices, TaskContext};
use crate::error::{ActorError, Bug};
use crate::log::LogKind;
use crate::queue::QueuedEvent;

/// Outcome of one task step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStep {
    /// Give up the processor; the task stays enabled.
    Yield,
    /// The task finished.
    Done,
    /// Resume once the actor has halted (or never existed).
    WaitActorHalted(ActorId),
    /// Resume once the task has completed.
    WaitTask(TaskId),
}

/// Resource a task is blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskWait {
    /// Waiting for an actor to halt.
    ActorHalted(ActorId),
    /// Waiting for a task to complete.
    Task(TaskId),
}

impl fmt::Display for TaskWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActorHalted(actor) => write!(f, "waiting for {actor} to halt"),
            Self::Task(task) => write!(f, "waiting for {task} to complete"),
        }
    }
}

/// Body of a task.
pub type TaskBody = Box<dyn FnMut(&mut TaskContext<'_>) -> Result<TaskStep, ActorError> + Send>;

pub(crate) struct TaskCell {
    id: TaskId,
    name: String,
    body: TaskBody,
    group: GroupId,
    wait: Option<TaskWait>,
    done: bool,
}

impl TaskCell {
    pub(crate) fn new(id: TaskId, name: String, body: TaskBody, group: GroupId) -> Self {
        Self {
            id,
            name,
            body,
            group,
            wait: None,
            done: false,
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn group(&self) -> GroupId {
        self.group
    }

    pub(crate) fn wait(&self) -> Option<TaskWait> {
        self.wait
    }

    pub(crate) fn clear_wait(&mut self) {
        self.wait = None;
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    /// Run one step of the body.
    pub(crate) fn run_step(&mut self, services: &mut dyn RuntimeServices) -> Result<(), Bug> {
        let handle = RuntimeHandle::new(services, OperationId::from(self.id), None, self.group);
        let mut ctx = TaskContext::new(handle, self.id);
        let body = &mut self.body;
        let result = catch_unwind(AssertUnwindSafe(|| body(&mut ctx)))
            .unwrap_or_else(|payload| Err(ActorError::from_panic(payload.as_ref())));
        drop(ctx);
        match result {
            Ok(TaskStep::Yield) => {
                self.wait = None;
                Ok(())
            }
            Ok(TaskStep::Done) => {
                self.done = true;
                services.record(LogKind::TaskCompleted { task: self.id });
                Ok(())
            }
            Ok(TaskStep::WaitActorHalted(actor)) => {
                self.wait = Some(TaskWait::ActorHalted(actor));
                Ok(())
            }
            Ok(TaskStep::WaitTask(task)) => {
                self.wait = Some(TaskWait::Task(task));
                Ok(())
            }
            Err(err) => {
                self.done = true;
                Err(Bug::new(
                    err.bug_kind(),
                    format!("task {} '{}': {err}", self.id, self.name),
                ))
            }
        }
    }
}

pub(crate) struct TimerCell {
    id: TimerId,
    owner: ActorId,
    event: Event,
    periodic: bool,
    group: GroupId,
    fired: bool,
}

impl TimerCell {
    pub(crate) fn new(
        id: TimerId,
        owner: ActorId,
        event: Event,
        periodic: bool,
        group: GroupId,
    ) -> Self {
        Self {
            id,
            owner,
            event,
            periodic,
            group,
            fired: false,
        }
    }

    pub(crate) fn id(&self) -> TimerId {
        self.id
    }

    pub(crate) fn owner(&self) -> ActorId {
        self.owner
    }

    pub(crate) fn is_periodic(&self) -> bool {
        self.periodic
    }

    pub(crate) fn group(&self) -> GroupId {
        self.group
    }

    /// One-shot timers complete after firing once.
    pub(crate) fn is_done(&self) -> bool {
        self.fired && !self.periodic
    }

    /// Deliver the timer event to its owner.
    pub(crate) fn fire(&mut self, services: &mut dyn RuntimeServices) {
        self.fired = true;
        let info = EventInfo::external(self.group, services.step());
        services.record(LogKind::TimerFired {
            timer: self.id,
            owner: self.owner,
        });
        services.deliver(
            self.owner,
            QueuedEvent::from_timer(self.event.clone(), info, self.id),
        );
    }
}
