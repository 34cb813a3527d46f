//! Actor execution: state stack, handler dispatch and exception routing.
//!
//! One scheduled step of an actor handles exactly one event (a dequeued
//! event, a completed receive, the default event, or the initial entry)
//! followed by every event raised while handling it.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tangle_types::{
    ActorId, Event, EventInfo, EventKind, GroupId, MachineName, OperationId, StateName, TimerId,
    DEFAULT_EVENT,
};

use crate::context::{ActorContext, RuntimeHandle, RuntimeServices, TransitionRequest};
use crate::error::{ActorError, Bug};
use crate::fingerprint::StateHasher;
use crate::log::{LogKind, StackChange};
use crate::machine::{
    Action, ActionResult, Binding, ExceptionOutcome, MachineDefinition, ResolvedState,
    StateMachine, Transition,
};
use crate::queue::{DequeueStatus, Disposition, EnqueueStatus, EventQueue, QueuedEvent, ReceiveStatus};

/// Scheduling-relevant status of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorStatus {
    /// Has an event (or its start) to process.
    Enabled,
    /// Nothing dequeueable; re-enabled by the next enqueue.
    Idle,
    /// Suspended in a receive.
    WaitingToReceive,
    /// Halted for good.
    Halted,
}

/// Type-erased actor, as stored by the runtimes.
pub(crate) trait ActorCellDyn: Send {
    fn id(&self) -> ActorId;
    fn machine_name(&self) -> &MachineName;
    fn group(&self) -> GroupId;
    fn current_state(&self) -> Option<&StateName>;
    fn status(&self) -> ActorStatus;
    fn receive_filter(&self) -> Option<String>;
    fn enqueue(&mut self, item: QueuedEvent) -> EnqueueStatus;
    fn holds_timer_event(&self, timer: TimerId) -> bool;
    fn run_step(&mut self, services: &mut dyn RuntimeServices) -> Result<(), Bug>;
    fn event_dropped(&mut self, event: &Event);
    /// Report every queued event as dropped, leaving the queue empty.
    fn close_queue(&mut self, services: &mut dyn RuntimeServices);
    fn hash_into(&self, hasher: &mut StateHasher);
}

/// Handler table of one stack frame.
struct Frame<M> {
    state: StateName,
    bindings: BTreeMap<EventKind, Binding<M>>,
    wildcard: Option<Binding<M>>,
}

impl<M> Frame<M> {
    fn root(state: &ResolvedState<M>) -> Self {
        Self {
            state: state.name().clone(),
            bindings: state.bindings.clone(),
            wildcard: state.wildcard.clone(),
        }
    }

    /// Frame for `state` pushed over `below`: everything but goto bindings
    /// falls through, and the pushed state's own bindings win.
    fn pushed(below: &Frame<M>, state: &ResolvedState<M>) -> Self {
        let mut bindings: BTreeMap<EventKind, Binding<M>> = below
            .bindings
            .iter()
            .filter(|(_, binding)| binding.survives_push())
            .map(|(kind, binding)| (kind.clone(), binding.clone()))
            .collect();
        for (kind, binding) in &state.bindings {
            bindings.insert(kind.clone(), binding.clone());
        }
        let wildcard = state
            .wildcard
            .clone()
            .or_else(|| below.wildcard.clone().filter(Binding::survives_push));
        Self {
            state: state.name().clone(),
            bindings,
            wildcard,
        }
    }

    fn lookup(&self, event: &Event) -> Option<&Binding<M>> {
        self.bindings.get(&event.kind).or_else(|| {
            if event.is_halt() || event.is_default() {
                None
            } else {
                self.wildcard.as_ref()
            }
        })
    }

    fn classify(&self, event: &Event) -> Disposition {
        match self.lookup(event) {
            Some(Binding::Ignore) => Disposition::Ignore,
            Some(Binding::Defer) => Disposition::Defer,
            _ => Disposition::Handle,
        }
    }

    fn has_default(&self) -> bool {
        self.bindings.keys().any(|kind| *kind == DEFAULT_EVENT)
    }
}

/// A live actor of machine type `M`.
pub(crate) struct ActorCell<M: StateMachine> {
    id: ActorId,
    machine: M,
    definition: Arc<MachineDefinition<M>>,
    stack: Vec<Frame<M>>,
    queue: EventQueue,
    continuation: Option<Action<M>>,
    initial: Option<Event>,
    started: bool,
    halted: bool,
    group: GroupId,
}

impl<M: StateMachine> ActorCell<M> {
    pub(crate) fn new(
        id: ActorId,
        machine: M,
        definition: Arc<MachineDefinition<M>>,
        initial: Option<Event>,
        group: GroupId,
    ) -> Self {
        Self {
            id,
            machine,
            definition,
            stack: Vec::new(),
            queue: EventQueue::new(),
            continuation: None,
            initial,
            started: false,
            halted: false,
            group,
        }
    }

    fn state_name(&self) -> StateName {
        self.stack
            .last()
            .map_or_else(|| self.definition.start_state().clone(), |f| f.state.clone())
    }

    fn context<'s>(&self, services: &'s mut dyn RuntimeServices) -> ActorContext<'s> {
        let handle = RuntimeHandle::new(
            services,
            OperationId::from(self.id),
            Some(self.id),
            self.group,
        );
        ActorContext::new(
            handle,
            self.id,
            self.definition.name().clone(),
            self.stack.last().map(|f| f.state.clone()),
        )
    }

    fn dequeue(&mut self) -> DequeueStatus {
        let Some(top) = self.stack.last() else {
            return DequeueStatus::NotAvailable;
        };
        let has_default = top.has_default();
        self.queue.dequeue(|event| top.classify(event), has_default)
    }

    fn step(&mut self, services: &mut dyn RuntimeServices) -> Result<(), Bug> {
        if !self.started {
            self.started = true;
            let initial = self.initial.take();
            let result = self.start(services, initial.clone());
            self.settle_error(services, result, initial.as_ref())?;
        } else if let Some(item) = self.queue.take_received() {
            self.group = item.info.group;
            services.record(LogKind::Received {
                actor: self.id,
                state: self.state_name(),
                event: item.event.clone(),
            });
            let result = self.resume(services, &item.event);
            self.settle_error(services, result, Some(&item.event))?;
        } else {
            let event = match self.dequeue() {
                DequeueStatus::Success(item) => {
                    self.group = item.info.group;
                    services.record(LogKind::Dequeued {
                        actor: self.id,
                        state: self.state_name(),
                        event: item.event.clone(),
                    });
                    Some(item.event)
                }
                DequeueStatus::Raised(item) => {
                    services.record(LogKind::Raised {
                        actor: self.id,
                        state: self.state_name(),
                        event: item.event.clone(),
                    });
                    Some(item.event)
                }
                DequeueStatus::Default => {
                    services.record(LogKind::DefaultFired {
                        actor: self.id,
                        state: self.state_name(),
                    });
                    Some(Event::default_event())
                }
                DequeueStatus::NotAvailable => None,
            };
            self.report_ignored(services);
            if let Some(event) = event {
                self.process(services, event)?;
            }
        }

        while !self.halted && !self.queue.is_waiting() && self.queue.has_raised() {
            if let DequeueStatus::Raised(item) = self.dequeue() {
                services.record(LogKind::Raised {
                    actor: self.id,
                    state: self.state_name(),
                    event: item.event.clone(),
                });
                self.process(services, item.event)?;
            }
        }
        Ok(())
    }

    fn report_ignored(&mut self, services: &mut dyn RuntimeServices) {
        for item in self.queue.take_ignored() {
            services.record(LogKind::Ignored {
                actor: self.id,
                event: item.event,
            });
        }
    }

    fn start(
        &mut self,
        services: &mut dyn RuntimeServices,
        initial: Option<Event>,
    ) -> Result<(), ActorError> {
        let start = self.definition.start_state().clone();
        self.push_frame(&start)?;
        let transition = self.run_entry(services, initial.as_ref())?;
        self.apply(services, transition, initial)
    }

    fn resume(&mut self, services: &mut dyn RuntimeServices, event: &Event) -> Result<(), ActorError> {
        let Some(continuation) = self.continuation.take() else {
            return Err(ActorError::InvalidTransition(format!(
                "{} resumed a receive without a continuation",
                self.definition.name()
            )));
        };
        let transition = self.invoke(services, &continuation, event)?;
        self.apply(services, transition, Some(event.clone()))
    }

    fn process(&mut self, services: &mut dyn RuntimeServices, event: Event) -> Result<(), Bug> {
        let result = self.handle_event(services, &event);
        self.settle_error(services, result, Some(&event))
    }

    fn handle_event(
        &mut self,
        services: &mut dyn RuntimeServices,
        event: &Event,
    ) -> Result<(), ActorError> {
        let binding = self
            .stack
            .last()
            .and_then(|top| top.lookup(event))
            .cloned();
        match binding {
            Some(Binding::Do(action)) => {
                let transition = self.invoke(services, &action, event)?;
                self.apply(services, transition, Some(event.clone()))
            }
            Some(Binding::Goto(target)) => {
                self.apply(services, Transition::Goto(target), Some(event.clone()))
            }
            Some(Binding::Push(target)) => {
                self.apply(services, Transition::Push(target), Some(event.clone()))
            }
            Some(Binding::Ignore) => {
                services.record(LogKind::Ignored {
                    actor: self.id,
                    event: event.clone(),
                });
                Ok(())
            }
            Some(Binding::Defer) => {
                // Only a raised event reaches here; park it at the back of the queue.
                let info = EventInfo {
                    origin: Some(self.id),
                    group: self.group,
                    sent_at_step: services.step(),
                };
                self.queue.enqueue(QueuedEvent::new(event.clone(), info));
                Ok(())
            }
            None if event.is_halt() => self.halt(services),
            None => Err(ActorError::UnhandledEvent {
                machine: self.definition.name().clone(),
                event: event.kind.clone(),
                state: self.state_name(),
            }),
        }
    }

    /// Route an action error through the exception hook.
    fn settle_error(
        &mut self,
        services: &mut dyn RuntimeServices,
        result: Result<(), ActorError>,
        event: Option<&Event>,
    ) -> Result<(), Bug> {
        let Err(error) = result else {
            return Ok(());
        };
        if !error.is_recoverable() {
            return Err(Bug::from_actor_error(&error));
        }
        let machine = &mut self.machine;
        let outcome = catch_unwind(AssertUnwindSafe(|| machine.on_exception(&error, event)))
            .unwrap_or(ExceptionOutcome::Rethrow);
        services.record(LogKind::ExceptionHandled {
            actor: self.id,
            error: error.to_string(),
            outcome: format!("{outcome:?}"),
        });
        match outcome {
            ExceptionOutcome::Handled => Ok(()),
            ExceptionOutcome::Halt => self
                .halt(services)
                .map_err(|err| Bug::from_actor_error(&err)),
            ExceptionOutcome::Rethrow => Err(Bug::from_actor_error(&error)),
        }
    }

    fn invoke(
        &mut self,
        services: &mut dyn RuntimeServices,
        action: &Action<M>,
        event: &Event,
    ) -> ActionResult<M> {
        let mut ctx = self.context(services);
        let machine = &mut self.machine;
        let result = catch_unwind(AssertUnwindSafe(|| action(machine, &mut ctx, event)))
            .unwrap_or_else(|payload| Err(ActorError::from_panic(payload.as_ref())));
        let requests = ctx.take_requests();
        self.combine(result, requests)
    }

    fn run_entry(
        &mut self,
        services: &mut dyn RuntimeServices,
        trigger: Option<&Event>,
    ) -> ActionResult<M> {
        let state = self.state_name();
        services.record(LogKind::Entered {
            actor: self.id,
            state: state.clone(),
        });
        let Some(entry) = self.definition.state(&state).and_then(|s| s.entry.clone()) else {
            return Ok(Transition::None);
        };
        let mut ctx = self.context(services);
        let machine = &mut self.machine;
        let result = catch_unwind(AssertUnwindSafe(|| entry(machine, &mut ctx, trigger)))
            .unwrap_or_else(|payload| Err(ActorError::from_panic(payload.as_ref())));
        let requests = ctx.take_requests();
        self.combine(result, requests)
    }

    fn run_exit(&mut self, services: &mut dyn RuntimeServices) -> Result<(), ActorError> {
        let state = self.state_name();
        services.record(LogKind::Exited {
            actor: self.id,
            state: state.clone(),
        });
        let Some(exit) = self.definition.state(&state).and_then(|s| s.exit.clone()) else {
            return Ok(());
        };
        let mut ctx = self.context(services);
        let machine = &mut self.machine;
        let result = catch_unwind(AssertUnwindSafe(|| exit(machine, &mut ctx)))
            .unwrap_or_else(|payload| Err(ActorError::from_panic(payload.as_ref())));
        if !ctx.take_requests().is_empty() {
            return Err(ActorError::InvalidTransition(format!(
                "{} requested a transition from the exit action of state {state}",
                self.definition.name()
            )));
        }
        result
    }

    /// Merge the returned transition with transitions requested via the context.
    fn combine(
        &self,
        result: ActionResult<M>,
        mut requests: Vec<TransitionRequest>,
    ) -> ActionResult<M> {
        let transition = result?;
        let returned = usize::from(!matches!(transition, Transition::None));
        let total = requests.len() + returned;
        if total > 1 {
            return Err(ActorError::InvalidTransition(format!(
                "{} requested {total} transitions in one action in state {}",
                self.definition.name(),
                self.state_name()
            )));
        }
        Ok(match requests.pop() {
            Some(TransitionRequest::Raise(event)) => Transition::Raise(event),
            Some(TransitionRequest::Goto(state)) => Transition::Goto(state),
            Some(TransitionRequest::Push(state)) => Transition::Push(state),
            Some(TransitionRequest::Pop) => Transition::Pop,
            Some(TransitionRequest::Halt) => Transition::Halt,
            None => transition,
        })
    }

    fn push_frame(&mut self, target: &StateName) -> Result<(), ActorError> {
        let Some(state) = self.definition.state(target) else {
            return Err(ActorError::InvalidTransition(format!(
                "{} has no state {target}",
                self.definition.name()
            )));
        };
        let frame = match self.stack.last() {
            Some(below) => Frame::pushed(below, state),
            None => Frame::root(state),
        };
        self.stack.push(frame);
        Ok(())
    }

    fn ensure_state(&self, target: &StateName) -> Result<(), ActorError> {
        if self.definition.state(target).is_some() {
            Ok(())
        } else {
            Err(ActorError::InvalidTransition(format!(
                "{} has no state {target}",
                self.definition.name()
            )))
        }
    }

    /// Apply a transition and every transition it triggers.
    fn apply(
        &mut self,
        services: &mut dyn RuntimeServices,
        transition: Transition<M>,
        trigger: Option<Event>,
    ) -> Result<(), ActorError> {
        let mut transition = transition;
        let mut trigger = trigger;
        loop {
            transition = match transition {
                Transition::None => return Ok(()),
                Transition::Raise(event) => {
                    let info = EventInfo {
                        origin: Some(self.id),
                        group: self.group,
                        sent_at_step: services.step(),
                    };
                    self.queue.raise(QueuedEvent::new(event, info));
                    return Ok(());
                }
                Transition::Halt => {
                    let info = EventInfo {
                        origin: Some(self.id),
                        group: self.group,
                        sent_at_step: services.step(),
                    };
                    self.queue.raise(QueuedEvent::new(Event::halt(), info));
                    return Ok(());
                }
                Transition::Goto(target) => {
                    self.ensure_state(&target)?;
                    let from = self.state_name();
                    self.run_exit(services)?;
                    self.stack.pop();
                    self.push_frame(&target)?;
                    services.record(LogKind::StateChanged {
                        actor: self.id,
                        change: StackChange::Goto,
                        from,
                        to: target,
                    });
                    self.run_entry(services, trigger.as_ref())?
                }
                Transition::Push(target) => {
                    self.ensure_state(&target)?;
                    let from = self.state_name();
                    self.push_frame(&target)?;
                    services.record(LogKind::StateChanged {
                        actor: self.id,
                        change: StackChange::Push,
                        from,
                        to: target,
                    });
                    self.run_entry(services, trigger.as_ref())?
                }
                Transition::Pop => {
                    if self.stack.len() <= 1 {
                        return Err(ActorError::InvalidTransition(format!(
                            "{} popped state {} with no state below it",
                            self.definition.name(),
                            self.state_name()
                        )));
                    }
                    let from = self.state_name();
                    self.run_exit(services)?;
                    self.stack.pop();
                    services.record(LogKind::StateChanged {
                        actor: self.id,
                        change: StackChange::Pop,
                        from,
                        to: self.state_name(),
                    });
                    return Ok(());
                }
                Transition::Receive(receive) => match self.queue.receive(receive.filter.clone()) {
                    ReceiveStatus::ReceivedWithoutWaiting(item) => {
                        self.group = item.info.group;
                        services.record(LogKind::Received {
                            actor: self.id,
                            state: self.state_name(),
                            event: item.event.clone(),
                        });
                        let next = self.invoke(services, &receive.continuation, &item.event)?;
                        trigger = Some(item.event);
                        next
                    }
                    ReceiveStatus::Waiting => {
                        services.record(LogKind::WaitingToReceive {
                            actor: self.id,
                            state: self.state_name(),
                            filter: receive.filter.to_string(),
                        });
                        self.continuation = Some(receive.continuation);
                        return Ok(());
                    }
                },
            };
        }
    }

    fn halt(&mut self, services: &mut dyn RuntimeServices) -> Result<(), ActorError> {
        if self.halted {
            return Ok(());
        }
        let mut ctx = self.context(services);
        let machine = &mut self.machine;
        let result = catch_unwind(AssertUnwindSafe(|| machine.on_halt(&mut ctx)))
            .unwrap_or_else(|payload| Err(ActorError::from_panic(payload.as_ref())));
        let requested = !ctx.take_requests().is_empty();
        drop(ctx);

        self.halted = true;
        self.continuation = None;
        self.drop_queued(services);
        services.record(LogKind::Halted { actor: self.id });

        if requested {
            return Err(ActorError::InvalidTransition(format!(
                "{} requested a transition while halting",
                self.definition.name()
            )));
        }
        result
    }

    fn drop_queued(&mut self, services: &mut dyn RuntimeServices) {
        for item in self.queue.close() {
            self.notify_dropped(&item.event);
            services.dropped(self.id, item);
        }
    }

    fn notify_dropped(&mut self, event: &Event) {
        let machine = &mut self.machine;
        if catch_unwind(AssertUnwindSafe(|| machine.on_event_dropped(event))).is_err() {
            tracing::warn!(actor = %self.id, event = %event.kind, "drop hook panicked");
        }
    }
}

impl<M: StateMachine> ActorCellDyn for ActorCell<M> {
    fn id(&self) -> ActorId {
        self.id
    }

    fn machine_name(&self) -> &MachineName {
        self.definition.name()
    }

    fn group(&self) -> GroupId {
        self.group
    }

    fn current_state(&self) -> Option<&StateName> {
        self.stack.last().map(|f| &f.state)
    }

    fn status(&self) -> ActorStatus {
        if self.halted {
            return ActorStatus::Halted;
        }
        if !self.started || self.queue.has_received() {
            return ActorStatus::Enabled;
        }
        if self.queue.is_waiting() {
            return ActorStatus::WaitingToReceive;
        }
        match self.stack.last() {
            Some(top) if top.has_default() => ActorStatus::Enabled,
            Some(top) if self.queue.has_dequeueable(|e| top.classify(e)) => ActorStatus::Enabled,
            _ => ActorStatus::Idle,
        }
    }

    fn receive_filter(&self) -> Option<String> {
        self.queue.pending_receive().map(ToString::to_string)
    }

    fn enqueue(&mut self, item: QueuedEvent) -> EnqueueStatus {
        self.queue.enqueue(item)
    }

    fn holds_timer_event(&self, timer: TimerId) -> bool {
        self.queue.holds_timer_event(timer)
    }

    fn run_step(&mut self, services: &mut dyn RuntimeServices) -> Result<(), Bug> {
        self.step(services)
    }

    fn event_dropped(&mut self, event: &Event) {
        self.notify_dropped(event);
    }

    fn close_queue(&mut self, services: &mut dyn RuntimeServices) {
        self.drop_queued(services);
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.write_u64(self.id.get());
        hasher.write_str(self.definition.name().as_str());
        hasher.write_bool(self.started);
        hasher.write_bool(self.halted);
        hasher.write_u64(self.stack.len() as u64);
        for frame in &self.stack {
            hasher.write_str(frame.state.as_str());
        }
        hasher.write_u64(self.queue.len() as u64);
        for item in self.queue.iter() {
            hasher.write_event(&item.event);
        }
        hasher.write_bool(self.queue.has_raised());
        hasher.write_bool(self.queue.has_received());
        match self.queue.pending_receive() {
            Some(filter) => hasher.write_str(&filter.to_string()),
            None => hasher.write_tag(0),
        }
        self.machine.hash_state(hasher);
    }
}
