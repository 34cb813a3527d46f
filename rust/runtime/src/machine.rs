//! State-machine declarations.
//!
//! A machine type declares its states once through [`MachineBuilder`]. The
//! builder validates the declaration and flattens state inheritance into a
//! per-state handler table, yielding an immutable [`MachineDefinition`] that
//! is shared by every instance of the type.
//!
//! Actions run to completion and return a [`Transition`]; an action that
//! needs to wait for a reply returns [`Transition::Receive`] with the
//! continuation that resumes once a matching event arrives.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tangle_types::{Event, EventKind, MachineName, StateName, DEFAULT_EVENT, HALT_EVENT};

use crate::context::ActorContext;
use crate::error::{ActorError, DefinitionError};
use crate::fingerprint::StateHasher;
use crate::queue::ReceiveFilter;

/// Result of an action.
pub type ActionResult<M> = Result<Transition<M>, ActorError>;

/// Event handler bound to a state.
pub type Action<M> =
    Arc<dyn Fn(&mut M, &mut ActorContext<'_>, &Event) -> ActionResult<M> + Send + Sync>;

/// Entry action. Receives the event that caused the transition, or the
/// initial event (if any) for the start state.
pub type EntryAction<M> =
    Arc<dyn Fn(&mut M, &mut ActorContext<'_>, Option<&Event>) -> ActionResult<M> + Send + Sync>;

/// Exit action. May not request transitions.
pub type ExitAction<M> =
    Arc<dyn Fn(&mut M, &mut ActorContext<'_>) -> Result<(), ActorError> + Send + Sync>;

/// Transition requested when an action completes.
pub enum Transition<M> {
    /// Stay in the current state.
    None,
    /// Handle this event next, before anything queued.
    Raise(Event),
    /// Replace the top of the state stack.
    Goto(StateName),
    /// Push a state onto the stack.
    Push(StateName),
    /// Pop the top state and resume the one below.
    Pop,
    /// Halt the actor.
    Halt,
    /// Suspend until an event matching the filter arrives.
    Receive(Receive<M>),
}

impl<M> Transition<M> {
    /// Goto `state`.
    #[must_use]
    pub fn goto(state: impl Into<StateName>) -> Self {
        Self::Goto(state.into())
    }

    /// Push `state`.
    #[must_use]
    pub fn push(state: impl Into<StateName>) -> Self {
        Self::Push(state.into())
    }

    /// Raise `event`.
    #[must_use]
    pub fn raise(event: Event) -> Self {
        Self::Raise(event)
    }

    /// Wait for an event matching `filter`, then run `continuation` with it.
    #[must_use]
    pub fn receive<F>(filter: ReceiveFilter, continuation: F) -> Self
    where
        F: Fn(&mut M, &mut ActorContext<'_>, &Event) -> ActionResult<M> + Send + Sync + 'static,
    {
        Self::Receive(Receive {
            filter,
            continuation: Arc::new(continuation),
        })
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Self::None => "none".into(),
            Self::Raise(event) => format!("raise {event}"),
            Self::Goto(state) => format!("goto {state}"),
            Self::Push(state) => format!("push {state}"),
            Self::Pop => "pop".into(),
            Self::Halt => "halt".into(),
            Self::Receive(receive) => format!("receive {}", receive.filter),
        }
    }
}

impl<M> fmt::Debug for Transition<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// A pending receive with its continuation.
pub struct Receive<M> {
    pub(crate) filter: ReceiveFilter,
    pub(crate) continuation: Action<M>,
}

/// What a user exception hook decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionOutcome {
    /// Swallow the error; the actor continues with its next event.
    Handled,
    /// Report the error as a bug.
    Rethrow,
    /// Halt the actor.
    Halt,
}

/// A state-machine actor type.
///
/// `definition` is called once per type per test run; the result is cached.
pub trait StateMachine: Send + Sized + 'static {
    /// Declare the states of this machine.
    fn definition() -> MachineBuilder<Self>;

    /// Classify a recoverable error raised by an action.
    fn on_exception(&mut self, _error: &ActorError, _event: Option<&Event>) -> ExceptionOutcome {
        ExceptionOutcome::Rethrow
    }

    /// Runs once when the actor halts, before its queue is discarded.
    ///
    /// # Errors
    ///
    /// An error is reported as a bug.
    fn on_halt(&mut self, _ctx: &mut ActorContext<'_>) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called for every event this actor will never handle: events still
    /// queued when it halted and events sent to it afterwards.
    fn on_event_dropped(&mut self, _event: &Event) {}

    /// Contribute user fields to the program-state fingerprint.
    ///
    /// Machines that leave this empty are distinguished by state stack and
    /// queue contents only.
    fn hash_state(&self, _hasher: &mut StateHasher) {}
}

pub(crate) enum Binding<M> {
    Do(Action<M>),
    Goto(StateName),
    Push(StateName),
    Ignore,
    Defer,
}

impl<M> Clone for Binding<M> {
    fn clone(&self) -> Self {
        match self {
            Self::Do(action) => Self::Do(Arc::clone(action)),
            Self::Goto(state) => Self::Goto(state.clone()),
            Self::Push(state) => Self::Push(state.clone()),
            Self::Ignore => Self::Ignore,
            Self::Defer => Self::Defer,
        }
    }
}

impl<M> Binding<M> {
    /// Goto bindings apply only to the state that declares them.
    pub(crate) fn survives_push(&self) -> bool {
        !matches!(self, Self::Goto(_))
    }

    pub(crate) fn kind(&self) -> BindingKind {
        match self {
            Self::Do(_) => BindingKind::Do,
            Self::Goto(state) => BindingKind::Goto(state.clone()),
            Self::Push(state) => BindingKind::Push(state.clone()),
            Self::Ignore => BindingKind::Ignore,
            Self::Defer => BindingKind::Defer,
        }
    }

    fn target(&self) -> Option<&StateName> {
        match self {
            Self::Goto(state) | Self::Push(state) => Some(state),
            _ => None,
        }
    }
}

/// Shape of a handler-table entry, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingKind {
    /// Run an action.
    Do,
    /// Go to a state.
    Goto(StateName),
    /// Push a state.
    Push(StateName),
    /// Drop the event.
    Ignore,
    /// Leave the event queued.
    Defer,
}

/// Declaration of one state.
pub struct StateBuilder<M> {
    name: StateName,
    is_start: bool,
    entry: Option<EntryAction<M>>,
    exit: Option<ExitAction<M>>,
    bindings: Vec<(EventKind, Binding<M>)>,
    wildcard: Option<Binding<M>>,
    bases: Vec<StateName>,
}

impl<M: StateMachine> StateBuilder<M> {
    fn new(name: StateName) -> Self {
        Self {
            name,
            is_start: false,
            entry: None,
            exit: None,
            bindings: Vec::new(),
            wildcard: None,
            bases: Vec::new(),
        }
    }

    /// Mark as the start state.
    #[must_use]
    pub fn start(mut self) -> Self {
        self.is_start = true;
        self
    }

    /// Entry action.
    #[must_use]
    pub fn on_entry<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut M, &mut ActorContext<'_>, Option<&Event>) -> ActionResult<M>
            + Send
            + Sync
            + 'static,
    {
        self.entry = Some(Arc::new(action));
        self
    }

    /// Exit action.
    #[must_use]
    pub fn on_exit<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut M, &mut ActorContext<'_>) -> Result<(), ActorError> + Send + Sync + 'static,
    {
        self.exit = Some(Arc::new(action));
        self
    }

    /// Run `action` when `kind` is dequeued.
    #[must_use]
    pub fn on_event<F>(mut self, kind: impl Into<EventKind>, action: F) -> Self
    where
        F: Fn(&mut M, &mut ActorContext<'_>, &Event) -> ActionResult<M> + Send + Sync + 'static,
    {
        self.bindings.push((kind.into(), Binding::Do(Arc::new(action))));
        self
    }

    /// Go to `target` when `kind` is dequeued.
    #[must_use]
    pub fn on_goto(mut self, kind: impl Into<EventKind>, target: impl Into<StateName>) -> Self {
        self.bindings.push((kind.into(), Binding::Goto(target.into())));
        self
    }

    /// Push `target` when `kind` is dequeued.
    #[must_use]
    pub fn on_push(mut self, kind: impl Into<EventKind>, target: impl Into<StateName>) -> Self {
        self.bindings.push((kind.into(), Binding::Push(target.into())));
        self
    }

    /// Drop `kind` without handling it.
    #[must_use]
    pub fn ignore(mut self, kind: impl Into<EventKind>) -> Self {
        self.bindings.push((kind.into(), Binding::Ignore));
        self
    }

    /// Leave `kind` queued while in this state.
    #[must_use]
    pub fn defer(mut self, kind: impl Into<EventKind>) -> Self {
        self.bindings.push((kind.into(), Binding::Defer));
        self
    }

    /// Run `action` when nothing is dequeueable.
    #[must_use]
    pub fn on_default<F>(self, action: F) -> Self
    where
        F: Fn(&mut M, &mut ActorContext<'_>, &Event) -> ActionResult<M> + Send + Sync + 'static,
    {
        self.on_event(EventKind::from_static(DEFAULT_EVENT), action)
    }

    /// Run `action` for any event without a more specific binding.
    #[must_use]
    pub fn on_any<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut M, &mut ActorContext<'_>, &Event) -> ActionResult<M> + Send + Sync + 'static,
    {
        self.wildcard = Some(Binding::Do(Arc::new(action)));
        self
    }

    /// Go to `target` on any event without a more specific binding.
    #[must_use]
    pub fn on_any_goto(mut self, target: impl Into<StateName>) -> Self {
        self.wildcard = Some(Binding::Goto(target.into()));
        self
    }

    /// Defer every event without a more specific binding.
    #[must_use]
    pub fn defer_any(mut self) -> Self {
        self.wildcard = Some(Binding::Defer);
        self
    }

    /// Inherit bindings and entry/exit actions from `base`.
    ///
    /// Bases listed earlier take precedence over later ones; the state's
    /// own declarations take precedence over all bases.
    #[must_use]
    pub fn inherits(mut self, base: impl Into<StateName>) -> Self {
        self.bases.push(base.into());
        self
    }
}

/// Builder for a [`MachineDefinition`].
pub struct MachineBuilder<M> {
    name: MachineName,
    states: Vec<StateBuilder<M>>,
}

impl<M: StateMachine> MachineBuilder<M> {
    /// Start declaring machine `name`.
    #[must_use]
    pub fn new(name: impl Into<MachineName>) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
        }
    }

    /// Declare a state.
    #[must_use]
    pub fn state<F>(mut self, name: impl Into<StateName>, configure: F) -> Self
    where
        F: FnOnce(StateBuilder<M>) -> StateBuilder<M>,
    {
        self.states.push(configure(StateBuilder::new(name.into())));
        self
    }

    /// Validate the declaration and flatten inheritance.
    ///
    /// # Errors
    ///
    /// Returns the first declaration error found.
    pub fn build(self) -> Result<MachineDefinition<M>, DefinitionError> {
        let machine = self.name;
        let mut declared: BTreeMap<StateName, StateBuilder<M>> = BTreeMap::new();
        let mut start: Option<StateName> = None;

        for state in self.states {
            if state.is_start {
                if let Some(first) = &start {
                    return Err(DefinitionError::MultipleStartStates {
                        machine,
                        first: first.clone(),
                        second: state.name,
                    });
                }
                start = Some(state.name.clone());
            }
            check_bindings(&machine, &state)?;
            if declared.contains_key(&state.name) {
                return Err(DefinitionError::DuplicateState {
                    machine,
                    state: state.name,
                });
            }
            declared.insert(state.name.clone(), state);
        }

        let Some(start) = start else {
            return Err(DefinitionError::NoStartState { machine });
        };

        for state in declared.values() {
            let targets = state
                .bindings
                .iter()
                .filter_map(|(_, binding)| binding.target())
                .chain(state.wildcard.as_ref().and_then(Binding::target))
                .chain(state.bases.iter());
            for target in targets {
                if !declared.contains_key(target) {
                    return Err(DefinitionError::UnknownState {
                        machine,
                        from: state.name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        let mut resolved = BTreeMap::new();
        let mut visiting = BTreeSet::new();
        for name in declared.keys() {
            resolve(&machine, name, &declared, &mut resolved, &mut visiting)?;
        }

        Ok(MachineDefinition {
            name: machine,
            start,
            states: resolved,
        })
    }
}

fn check_bindings<M>(machine: &MachineName, state: &StateBuilder<M>) -> Result<(), DefinitionError> {
    let mut seen = BTreeSet::new();
    for (kind, _) in &state.bindings {
        if *kind == HALT_EVENT {
            return Err(DefinitionError::ReservedEvent {
                machine: machine.clone(),
                state: state.name.clone(),
                event: kind.clone(),
            });
        }
        if !seen.insert(kind.clone()) {
            return Err(DefinitionError::DuplicateBinding {
                machine: machine.clone(),
                state: state.name.clone(),
                event: kind.clone(),
            });
        }
    }
    Ok(())
}

fn resolve<M>(
    machine: &MachineName,
    name: &StateName,
    declared: &BTreeMap<StateName, StateBuilder<M>>,
    resolved: &mut BTreeMap<StateName, ResolvedState<M>>,
    visiting: &mut BTreeSet<StateName>,
) -> Result<(), DefinitionError> {
    if resolved.contains_key(name) {
        return Ok(());
    }
    if !visiting.insert(name.clone()) {
        return Err(DefinitionError::InheritanceCycle {
            machine: machine.clone(),
            state: name.clone(),
        });
    }
    let Some(decl) = declared.get(name) else {
        return Err(DefinitionError::UnknownState {
            machine: machine.clone(),
            from: name.clone(),
            target: name.clone(),
        });
    };

    let mut state = ResolvedState {
        name: name.clone(),
        entry: None,
        exit: None,
        bindings: BTreeMap::new(),
        wildcard: None,
    };
    // Lowest precedence first so later overlays win.
    for base in decl.bases.iter().rev() {
        resolve(machine, base, declared, resolved, visiting)?;
        if let Some(base_state) = resolved.get(base) {
            state.overlay(base_state);
        }
    }
    if decl.entry.is_some() {
        state.entry.clone_from(&decl.entry);
    }
    if decl.exit.is_some() {
        state.exit.clone_from(&decl.exit);
    }
    for (kind, binding) in &decl.bindings {
        state.bindings.insert(kind.clone(), binding.clone());
    }
    if decl.wildcard.is_some() {
        state.wildcard.clone_from(&decl.wildcard);
    }

    visiting.remove(name);
    resolved.insert(name.clone(), state);
    Ok(())
}

/// A state after inheritance has been flattened.
pub struct ResolvedState<M> {
    name: StateName,
    pub(crate) entry: Option<EntryAction<M>>,
    pub(crate) exit: Option<ExitAction<M>>,
    pub(crate) bindings: BTreeMap<EventKind, Binding<M>>,
    pub(crate) wildcard: Option<Binding<M>>,
}

impl<M> ResolvedState<M> {
    fn overlay(&mut self, base: &ResolvedState<M>) {
        if base.entry.is_some() {
            self.entry.clone_from(&base.entry);
        }
        if base.exit.is_some() {
            self.exit.clone_from(&base.exit);
        }
        for (kind, binding) in &base.bindings {
            self.bindings.insert(kind.clone(), binding.clone());
        }
        if base.wildcard.is_some() {
            self.wildcard.clone_from(&base.wildcard);
        }
    }

    /// State name.
    #[must_use]
    pub fn name(&self) -> &StateName {
        &self.name
    }

    /// Binding for `kind` declared on or inherited by this state.
    #[must_use]
    pub fn binding(&self, kind: &str) -> Option<BindingKind> {
        self.bindings
            .iter()
            .find(|(k, _)| k.as_str() == kind)
            .map(|(_, b)| b.kind())
    }

    /// Whether the state has an entry action.
    #[must_use]
    pub fn has_entry(&self) -> bool {
        self.entry.is_some()
    }
}

/// Immutable, validated declaration of a machine type.
pub struct MachineDefinition<M> {
    name: MachineName,
    start: StateName,
    states: BTreeMap<StateName, ResolvedState<M>>,
}

impl<M> MachineDefinition<M> {
    /// Machine type name.
    #[must_use]
    pub fn name(&self) -> &MachineName {
        &self.name
    }

    /// Start state.
    #[must_use]
    pub fn start_state(&self) -> &StateName {
        &self.start
    }

    /// Look up a state.
    #[must_use]
    pub fn state(&self, name: &StateName) -> Option<&ResolvedState<M>> {
        self.states.get(name)
    }

    /// All declared state names in order.
    pub fn state_names(&self) -> impl Iterator<Item = &StateName> {
        self.states.keys()
    }
}

impl<M> fmt::Debug for MachineDefinition<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineDefinition")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .finish()
    }
}
