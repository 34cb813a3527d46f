//! Handles through which user code talks to the runtime.
//!
//! [`RuntimeHandle`] carries the operations every kind of user code may
//! perform: creating actors, sending, controlled nondeterminism, monitor
//! notification and task spawning. [`ActorContext`] adds the state-stack
//! transitions and timers available to actions; [`TaskContext`] is the
//! handle passed to task steps. Both dereference to the shared handle.
//!
//! The handles sit on the [`RuntimeServices`] seam, implemented by the
//! controlled scheduler and by the production runtime.

use std::any::TypeId;
use std::ops::{Deref, DerefMut};
use std::panic::Location;

use tangle_types::{
    ActorId, Event, EventInfo, GroupId, MachineName, OperationId, StateName, TaskId, TimerId,
};

use crate::actor::{ActorCell, ActorCellDyn};
use crate::error::{ActorError, Bug, BugKind};
use crate::log::LogKind;
use crate::machine::StateMachine;
use crate::monitor::Monitor;
use crate::queue::QueuedEvent;
use crate::registry::DefinitionRegistry;
use crate::task::{TaskCell, TaskStep, TimerCell};

/// Runtime operations behind the user-facing handles.
pub(crate) trait RuntimeServices {
    /// Current scheduler step.
    fn step(&self) -> u64;
    /// Shared definition cache.
    fn registry(&self) -> &DefinitionRegistry;
    /// Allocate the next operation number.
    fn next_id(&mut self) -> u64;
    /// Allocate a fresh causal group.
    fn new_group(&mut self) -> GroupId;
    /// Register a created actor and its operation.
    fn add_actor(&mut self, cell: Box<dyn ActorCellDyn>, creator: Option<OperationId>);
    /// Deliver an event to an actor's queue.
    fn deliver(&mut self, target: ActorId, item: QueuedEvent);
    /// Report an event that could not be delivered.
    fn dropped(&mut self, target: ActorId, item: QueuedEvent);
    /// Controlled boolean; `site` is set for fair choices.
    fn random_bool(&mut self, site: Option<&'static Location<'static>>) -> bool;
    /// Controlled integer in `[0, bound)`.
    fn random_integer(&mut self, bound: u64) -> u64;
    /// Deliver an event synchronously to the monitor of the given type.
    fn notify_monitor(&mut self, monitor: TypeId, event: Event);
    /// Deliver an event to every monitor whose current state handles it.
    fn broadcast(&mut self, event: Event);
    /// Register a spawned task and its operation.
    fn add_task(&mut self, task: TaskCell);
    /// Register a timer and its operation.
    fn add_timer(&mut self, timer: TimerCell);
    /// Cancel a timer.
    fn stop_timer(&mut self, timer: TimerId);
    /// Append to the execution log.
    fn record(&mut self, kind: LogKind);
    /// Report a bug found outside the normal error path.
    fn fail(&mut self, bug: Bug);
}

/// Operations shared by actor and task code.
pub struct RuntimeHandle<'a> {
    services: &'a mut dyn RuntimeServices,
    operation: OperationId,
    actor: Option<ActorId>,
    group: GroupId,
}

impl<'a> RuntimeHandle<'a> {
    pub(crate) fn new(
        services: &'a mut dyn RuntimeServices,
        operation: OperationId,
        actor: Option<ActorId>,
        group: GroupId,
    ) -> Self {
        Self {
            services,
            operation,
            actor,
            group,
        }
    }

    /// Operation running this code.
    #[must_use]
    pub fn operation_id(&self) -> OperationId {
        self.operation
    }

    /// Current scheduler step.
    #[must_use]
    pub fn step(&self) -> u64 {
        self.services.step()
    }

    /// Causal group of the work being done.
    #[must_use]
    pub fn current_group(&self) -> GroupId {
        self.group
    }

    /// Allocate a fresh causal group.
    pub fn new_group(&mut self) -> GroupId {
        self.services.new_group()
    }

    /// Create an actor in the current group. It starts when first scheduled.
    pub fn create_actor<M: StateMachine>(&mut self, machine: M) -> ActorId {
        self.create_actor_in_group(machine, None, self.group)
    }

    /// Create an actor whose start state's entry action receives `initial`.
    pub fn create_actor_with<M: StateMachine>(&mut self, machine: M, initial: Event) -> ActorId {
        self.create_actor_in_group(machine, Some(initial), self.group)
    }

    /// Create an actor in an explicit group.
    ///
    /// An invalid declaration for `M` is reported as a bug and the returned
    /// id refers to no actor.
    pub fn create_actor_in_group<M: StateMachine>(
        &mut self,
        machine: M,
        initial: Option<Event>,
        group: GroupId,
    ) -> ActorId {
        let id = ActorId(self.services.next_id());
        match self.services.registry().machine::<M>() {
            Ok(definition) => {
                let cell = ActorCell::new(id, machine, definition, initial, group);
                self.services.add_actor(Box::new(cell), Some(self.operation));
            }
            Err(err) => self
                .services
                .fail(Bug::new(BugKind::InvalidDeclaration, err.to_string())),
        }
        id
    }

    /// Send `event` to `target` in the current group.
    pub fn send(&mut self, target: ActorId, event: Event) {
        self.send_in_group(target, event, self.group);
    }

    /// Send `event` to `target` tagged with `group`.
    pub fn send_in_group(&mut self, target: ActorId, event: Event, group: GroupId) {
        let info = EventInfo {
            origin: self.actor,
            group,
            sent_at_step: self.services.step(),
        };
        self.services.deliver(target, QueuedEvent::new(event, info));
    }

    /// Controlled boolean choice.
    pub fn random_bool(&mut self) -> bool {
        self.services.random_bool(None)
    }

    /// Controlled boolean choice that fair executions must resolve both ways.
    ///
    /// The call site identifies the choice for liveness cycle detection.
    #[track_caller]
    pub fn fair_random(&mut self) -> bool {
        self.services.random_bool(Some(Location::caller()))
    }

    /// Controlled integer choice in `[0, bound)`.
    pub fn random_integer(&mut self, bound: u64) -> u64 {
        self.services.random_integer(bound)
    }

    /// Fail with an assertion error unless `condition` holds.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::Assertion`], which always surfaces as a bug.
    pub fn assert(&self, condition: bool, message: impl Into<String>) -> Result<(), ActorError> {
        if condition {
            Ok(())
        } else {
            Err(ActorError::Assertion(message.into()))
        }
    }

    /// Deliver `event` synchronously to the registered monitor of type `M`.
    pub fn notify_monitor<M: Monitor>(&mut self, event: Event) {
        self.services.notify_monitor(TypeId::of::<M>(), event);
    }

    /// Deliver `event` to every monitor whose current state handles it.
    pub fn notify_monitors(&mut self, event: Event) {
        self.services.broadcast(event);
    }

    /// Spawn a task that runs `body` one step per scheduling decision.
    pub fn spawn_task<F>(&mut self, name: impl Into<String>, body: F) -> TaskId
    where
        F: FnMut(&mut TaskContext<'_>) -> Result<TaskStep, ActorError> + Send + 'static,
    {
        let id = TaskId(self.services.next_id());
        let cell = TaskCell::new(id, name.into(), Box::new(body), self.group);
        self.services.add_task(cell);
        id
    }

    /// Append a line to the execution log.
    pub fn log(&mut self, message: impl Into<String>) {
        self.services.record(LogKind::User {
            message: message.into(),
        });
    }

    pub(crate) fn services(&mut self) -> &mut dyn RuntimeServices {
        &mut *self.services
    }
}

/// Transition requested through the context rather than the return value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TransitionRequest {
    Raise(Event),
    Goto(StateName),
    Push(StateName),
    Pop,
    Halt,
}

/// Handle passed to actions of a state machine.
pub struct ActorContext<'a> {
    handle: RuntimeHandle<'a>,
    actor: ActorId,
    machine: MachineName,
    state: Option<StateName>,
    requests: Vec<TransitionRequest>,
}

impl<'a> ActorContext<'a> {
    pub(crate) fn new(
        handle: RuntimeHandle<'a>,
        actor: ActorId,
        machine: MachineName,
        state: Option<StateName>,
    ) -> Self {
        Self {
            handle,
            actor,
            machine,
            state,
            requests: Vec::new(),
        }
    }

    /// This actor.
    #[must_use]
    pub fn actor_id(&self) -> ActorId {
        self.actor
    }

    /// Machine type name.
    #[must_use]
    pub fn machine_name(&self) -> &MachineName {
        &self.machine
    }

    /// State on top of the stack when the action started.
    #[must_use]
    pub fn current_state(&self) -> Option<&StateName> {
        self.state.as_ref()
    }

    /// Raise `event` once the action returns.
    pub fn raise(&mut self, event: Event) {
        self.requests.push(TransitionRequest::Raise(event));
    }

    /// Go to `state` once the action returns.
    pub fn goto(&mut self, state: impl Into<StateName>) {
        self.requests.push(TransitionRequest::Goto(state.into()));
    }

    /// Push `state` once the action returns.
    pub fn push(&mut self, state: impl Into<StateName>) {
        self.requests.push(TransitionRequest::Push(state.into()));
    }

    /// Pop the current state once the action returns.
    pub fn pop(&mut self) {
        self.requests.push(TransitionRequest::Pop);
    }

    /// Halt once the action returns.
    pub fn halt(&mut self) {
        self.requests.push(TransitionRequest::Halt);
    }

    /// Start a one-shot timer delivering `event` to this actor.
    pub fn start_timer(&mut self, event: Event) -> TimerId {
        self.add_timer(event, false)
    }

    /// Start a periodic timer delivering `event` to this actor.
    ///
    /// A periodic timer fires again only after its previous event has left
    /// the queue.
    pub fn start_periodic_timer(&mut self, event: Event) -> TimerId {
        self.add_timer(event, true)
    }

    /// Stop a timer. Events already delivered stay queued.
    pub fn stop_timer(&mut self, timer: TimerId) {
        self.handle.services().stop_timer(timer);
    }

    fn add_timer(&mut self, event: Event, periodic: bool) -> TimerId {
        let group = self.handle.current_group();
        let services = self.handle.services();
        let id = TimerId(services.next_id());
        services.add_timer(TimerCell::new(id, self.actor, event, periodic, group));
        id
    }

    pub(crate) fn take_requests(&mut self) -> Vec<TransitionRequest> {
        std::mem::take(&mut self.requests)
    }
}

impl<'a> Deref for ActorContext<'a> {
    type Target = RuntimeHandle<'a>;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl DerefMut for ActorContext<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.handle
    }
}

/// Handle passed to task steps.
pub struct TaskContext<'a> {
    handle: RuntimeHandle<'a>,
    task: TaskId,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(handle: RuntimeHandle<'a>, task: TaskId) -> Self {
        Self { handle, task }
    }

    /// This task.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task
    }
}

impl<'a> Deref for TaskContext<'a> {
    type Target = RuntimeHandle<'a>;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl DerefMut for TaskContext<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.handle
    }
}
