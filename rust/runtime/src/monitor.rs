//! Specification monitors.
//!
//! A monitor is a state machine that observes the program through
//! notifications. It has no queue: an event notified by an action is
//! processed synchronously, to completion, before the action continues.
//! States carry a [`Temperature`]; lingering in a hot state is how a
//! monitor expresses "something good has not happened yet".

use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tangle_types::{Event, EventKind, MachineName, StateName, HALT_EVENT};

use crate::error::{ActorError, Bug, BugKind, DefinitionError};
use crate::fingerprint::StateHasher;
use crate::log::LogKind;
use crate::registry::DefinitionRegistry;

/// Liveness classification of a monitor state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temperature {
    /// A liveness obligation is pending.
    Hot,
    /// The obligation was met.
    Cold,
    /// Neither.
    #[default]
    Neutral,
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hot => "hot",
            Self::Cold => "cold",
            Self::Neutral => "neutral",
        })
    }
}

/// Transition requested by a monitor action.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorTransition {
    /// Stay.
    None,
    /// Move to another state.
    Goto(StateName),
    /// Process another event immediately.
    Raise(Event),
}

impl MonitorTransition {
    /// Goto `state`.
    #[must_use]
    pub fn goto(state: impl Into<StateName>) -> Self {
        Self::Goto(state.into())
    }
}

/// Result of a monitor action.
pub type MonitorResult = Result<MonitorTransition, ActorError>;

/// Event handler of a monitor state.
pub type MonitorAction<M> =
    Arc<dyn Fn(&mut M, &mut MonitorContext, &Event) -> MonitorResult + Send + Sync>;

/// Entry or exit action of a monitor state.
pub type MonitorHook<M> = Arc<dyn Fn(&mut M, &mut MonitorContext) -> MonitorResult + Send + Sync>;

/// Read-only view handed to monitor actions.
#[derive(Debug, Clone)]
pub struct MonitorContext {
    name: MachineName,
    state: StateName,
    step: u64,
}

impl MonitorContext {
    /// Monitor type name.
    #[must_use]
    pub fn name(&self) -> &MachineName {
        &self.name
    }

    /// Current monitor state.
    #[must_use]
    pub fn state(&self) -> &StateName {
        &self.state
    }

    /// Current scheduler step.
    #[must_use]
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Fail with an assertion error unless `condition` holds.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::Assertion`].
    pub fn assert(&self, condition: bool, message: impl Into<String>) -> Result<(), ActorError> {
        if condition {
            Ok(())
        } else {
            Err(ActorError::Assertion(message.into()))
        }
    }
}

/// A monitor type.
pub trait Monitor: Send + Sized + 'static {
    /// Declare the states of this monitor.
    fn definition() -> MonitorBuilder<Self>;

    /// Contribute user fields to the program-state fingerprint.
    fn hash_state(&self, _hasher: &mut StateHasher) {}
}

enum MonitorBinding<M> {
    Do(MonitorAction<M>),
    Goto(StateName),
    Ignore,
}

/// Declaration of one monitor state.
pub struct MonitorStateBuilder<M> {
    name: StateName,
    is_start: bool,
    temperature: Temperature,
    entry: Option<MonitorHook<M>>,
    exit: Option<MonitorHook<M>>,
    bindings: Vec<(EventKind, MonitorBinding<M>)>,
}

impl<M: Monitor> MonitorStateBuilder<M> {
    /// Mark as the start state.
    #[must_use]
    pub fn start(mut self) -> Self {
        self.is_start = true;
        self
    }

    /// Mark as hot.
    #[must_use]
    pub fn hot(mut self) -> Self {
        self.temperature = Temperature::Hot;
        self
    }

    /// Mark as cold.
    #[must_use]
    pub fn cold(mut self) -> Self {
        self.temperature = Temperature::Cold;
        self
    }

    /// Entry action.
    #[must_use]
    pub fn on_entry<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut M, &mut MonitorContext) -> MonitorResult + Send + Sync + 'static,
    {
        self.entry = Some(Arc::new(action));
        self
    }

    /// Exit action. Its transition result is ignored.
    #[must_use]
    pub fn on_exit<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut M, &mut MonitorContext) -> MonitorResult + Send + Sync + 'static,
    {
        self.exit = Some(Arc::new(action));
        self
    }

    /// Run `action` when notified of `kind`.
    #[must_use]
    pub fn on_event<F>(mut self, kind: impl Into<EventKind>, action: F) -> Self
    where
        F: Fn(&mut M, &mut MonitorContext, &Event) -> MonitorResult + Send + Sync + 'static,
    {
        self.bindings
            .push((kind.into(), MonitorBinding::Do(Arc::new(action))));
        self
    }

    /// Move to `target` when notified of `kind`.
    #[must_use]
    pub fn on_goto(mut self, kind: impl Into<EventKind>, target: impl Into<StateName>) -> Self {
        self.bindings
            .push((kind.into(), MonitorBinding::Goto(target.into())));
        self
    }

    /// Accept and discard `kind`.
    #[must_use]
    pub fn ignore(mut self, kind: impl Into<EventKind>) -> Self {
        self.bindings.push((kind.into(), MonitorBinding::Ignore));
        self
    }
}

/// Builder for a [`MonitorDefinition`].
pub struct MonitorBuilder<M> {
    name: MachineName,
    states: Vec<MonitorStateBuilder<M>>,
}

impl<M: Monitor> MonitorBuilder<M> {
    /// Start declaring monitor `name`.
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
        F: FnOnce(MonitorStateBuilder<M>) -> MonitorStateBuilder<M>,
    {
        let builder = MonitorStateBuilder {
            name: name.into(),
            is_start: false,
            temperature: Temperature::Neutral,
            entry: None,
            exit: None,
            bindings: Vec::new(),
        };
        self.states.push(configure(builder));
        self
    }

    /// Validate the declaration.
    ///
    /// # Errors
    ///
    /// Returns the first declaration error found.
    pub fn build(self) -> Result<MonitorDefinition<M>, DefinitionError> {
        let machine = self.name;
        let names: BTreeSet<StateName> = self.states.iter().map(|s| s.name.clone()).collect();
        let mut start: Option<StateName> = None;
        let mut states = BTreeMap::new();

        for decl in self.states {
            if decl.is_start {
                if let Some(first) = &start {
                    return Err(DefinitionError::MultipleStartStates {
                        machine,
                        first: first.clone(),
                        second: decl.name,
                    });
                }
                start = Some(decl.name.clone());
            }
            let mut bindings = BTreeMap::new();
            for (kind, binding) in decl.bindings {
                if kind == HALT_EVENT {
                    return Err(DefinitionError::ReservedEvent {
                        machine,
                        state: decl.name,
                        event: kind,
                    });
                }
                if let MonitorBinding::Goto(target) = &binding {
                    if !names.contains(target) {
                        return Err(DefinitionError::UnknownState {
                            machine,
                            from: decl.name,
                            target: target.clone(),
                        });
                    }
                }
                if bindings.contains_key(&kind) {
                    return Err(DefinitionError::DuplicateBinding {
                        machine,
                        state: decl.name,
                        event: kind,
                    });
                }
                bindings.insert(kind, binding);
            }
            let state = MonitorState {
                temperature: decl.temperature,
                entry: decl.entry,
                exit: decl.exit,
                bindings,
            };
            if states.insert(decl.name.clone(), state).is_some() {
                return Err(DefinitionError::DuplicateState {
                    machine,
                    state: decl.name,
                });
            }
        }

        let Some(start) = start else {
            return Err(DefinitionError::NoStartState { machine });
        };
        Ok(MonitorDefinition {
            name: machine,
            start,
            states,
        })
    }
}

struct MonitorState<M> {
    temperature: Temperature,
    entry: Option<MonitorHook<M>>,
    exit: Option<MonitorHook<M>>,
    bindings: BTreeMap<EventKind, MonitorBinding<M>>,
}

/// Immutable, validated declaration of a monitor type.
pub struct MonitorDefinition<M> {
    name: MachineName,
    start: StateName,
    states: BTreeMap<StateName, MonitorState<M>>,
}

impl<M> MonitorDefinition<M> {
    /// Monitor type name.
    #[must_use]
    pub fn name(&self) -> &MachineName {
        &self.name
    }

    /// Start state.
    #[must_use]
    pub fn start_state(&self) -> &StateName {
        &self.start
    }

    /// Temperature of `state`.
    #[must_use]
    pub fn temperature(&self, state: &StateName) -> Option<Temperature> {
        self.states.get(state).map(|s| s.temperature)
    }
}

type MonitorFactory =
    Arc<dyn Fn(&DefinitionRegistry) -> Result<Box<dyn MonitorCellDyn>, DefinitionError> + Send + Sync>;

/// A monitor to instantiate fresh at the start of every iteration.
#[derive(Clone)]
pub struct MonitorRegistration {
    type_name: &'static str,
    create: MonitorFactory,
}

impl MonitorRegistration {
    /// Register monitor type `M`, built by `factory` for each iteration.
    #[must_use]
    pub fn new<M, F>(factory: F) -> Self
    where
        M: Monitor,
        F: Fn() -> M + Send + Sync + 'static,
    {
        Self {
            type_name: std::any::type_name::<M>(),
            create: Arc::new(move |registry: &DefinitionRegistry| {
                let definition = registry.monitor::<M>()?;
                Ok(Box::new(MonitorCell::new(factory(), definition)) as Box<dyn MonitorCellDyn>)
            }),
        }
    }

    /// Rust type name of the monitor.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn instantiate(
        &self,
        registry: &DefinitionRegistry,
    ) -> Result<Box<dyn MonitorCellDyn>, DefinitionError> {
        (self.create)(registry)
    }
}

impl fmt::Debug for MonitorRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorRegistration")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Type-erased monitor instance.
pub(crate) trait MonitorCellDyn: Send {
    fn monitor_type(&self) -> TypeId;
    fn name(&self) -> &MachineName;
    fn state(&self) -> &StateName;
    fn temperature(&self) -> Temperature;
    fn handles(&self, kind: &EventKind) -> bool;
    fn start(&mut self, step: u64, log: &mut Vec<LogKind>) -> Result<(), Bug>;
    fn process(&mut self, event: Event, step: u64, log: &mut Vec<LogKind>) -> Result<(), Bug>;
    /// Number of consecutive scheduling steps spent hot.
    fn hot_steps(&self) -> u64;
    fn tick(&mut self);
    fn hash_into(&self, hasher: &mut StateHasher);
}

/// A live monitor of type `M`.
pub(crate) struct MonitorCell<M: Monitor> {
    monitor: M,
    definition: Arc<MonitorDefinition<M>>,
    state: StateName,
    hot_steps: u64,
}

impl<M: Monitor> MonitorCell<M> {
    pub(crate) fn new(monitor: M, definition: Arc<MonitorDefinition<M>>) -> Self {
        let state = definition.start.clone();
        Self {
            monitor,
            definition,
            state,
            hot_steps: 0,
        }
    }

    fn context(&self, step: u64) -> MonitorContext {
        MonitorContext {
            name: self.definition.name.clone(),
            state: self.state.clone(),
            step,
        }
    }

    fn bug(&self, error: &ActorError) -> Bug {
        Bug::new(
            error.bug_kind(),
            format!("monitor {}: {error}", self.definition.name),
        )
    }

    fn run_hook(&mut self, hook: Option<MonitorHook<M>>, step: u64) -> Result<MonitorTransition, Bug> {
        let Some(hook) = hook else {
            return Ok(MonitorTransition::None);
        };
        let mut ctx = self.context(step);
        let monitor = &mut self.monitor;
        catch_unwind(AssertUnwindSafe(|| hook(monitor, &mut ctx)))
            .unwrap_or_else(|payload| Err(ActorError::from_panic(payload.as_ref())))
            .map_err(|err| self.bug(&err))
    }

    /// Follow `transition` and whatever it triggers; returns a raised event.
    fn apply(
        &mut self,
        transition: MonitorTransition,
        step: u64,
        log: &mut Vec<LogKind>,
    ) -> Result<Option<Event>, Bug> {
        let mut transition = transition;
        loop {
            match transition {
                MonitorTransition::None => return Ok(None),
                MonitorTransition::Raise(event) => return Ok(Some(event)),
                MonitorTransition::Goto(target) => {
                    let Some(next) = self.definition.states.get(&target) else {
                        return Err(Bug::new(
                            BugKind::InvalidTransition,
                            format!("monitor {} has no state {target}", self.definition.name),
                        ));
                    };
                    let (entry, temperature) = (next.entry.clone(), next.temperature);
                    let exit = self
                        .definition
                        .states
                        .get(&self.state)
                        .and_then(|s| s.exit.clone());
                    self.run_hook(exit, step)?;
                    log.push(LogKind::MonitorStateChanged {
                        monitor: self.definition.name.clone(),
                        from: self.state.clone(),
                        to: target.clone(),
                        temperature: temperature.to_string(),
                    });
                    self.state = target;
                    if temperature != Temperature::Hot {
                        self.hot_steps = 0;
                    }
                    transition = self.run_hook(entry, step)?;
                }
            }
        }
    }
}

impl<M: Monitor> MonitorCellDyn for MonitorCell<M> {
    fn monitor_type(&self) -> TypeId {
        TypeId::of::<M>()
    }

    fn name(&self) -> &MachineName {
        &self.definition.name
    }

    fn state(&self) -> &StateName {
        &self.state
    }

    fn temperature(&self) -> Temperature {
        self.definition
            .temperature(&self.state)
            .unwrap_or_default()
    }

    fn handles(&self, kind: &EventKind) -> bool {
        self.definition
            .states
            .get(&self.state)
            .is_some_and(|s| s.bindings.contains_key(kind))
    }

    fn start(&mut self, step: u64, log: &mut Vec<LogKind>) -> Result<(), Bug> {
        let entry = self
            .definition
            .states
            .get(&self.state)
            .and_then(|s| s.entry.clone());
        let transition = self.run_hook(entry, step)?;
        if let Some(event) = self.apply(transition, step, log)? {
            self.process(event, step, log)?;
        }
        Ok(())
    }

    fn process(&mut self, event: Event, step: u64, log: &mut Vec<LogKind>) -> Result<(), Bug> {
        let mut next = Some(event);
        while let Some(event) = next.take() {
            let definition = Arc::clone(&self.definition);
            let binding = definition
                .states
                .get(&self.state)
                .and_then(|s| s.bindings.get(&event.kind));
            log.push(LogKind::MonitorProcessed {
                monitor: definition.name.clone(),
                state: self.state.clone(),
                event: event.clone(),
            });
            let transition = match binding {
                Some(MonitorBinding::Do(action)) => {
                    let mut ctx = self.context(step);
                    let monitor = &mut self.monitor;
                    catch_unwind(AssertUnwindSafe(|| action(monitor, &mut ctx, &event)))
                        .unwrap_or_else(|payload| Err(ActorError::from_panic(payload.as_ref())))
                        .map_err(|err| self.bug(&err))?
                }
                Some(MonitorBinding::Goto(target)) => MonitorTransition::Goto(target.clone()),
                Some(MonitorBinding::Ignore) => MonitorTransition::None,
                None => {
                    return Err(Bug::new(
                        BugKind::UnhandledEvent,
                        format!(
                            "monitor {} received event '{}' that cannot be handled in state '{}'",
                            definition.name, event.kind, self.state
                        ),
                    ));
                }
            };
            next = self.apply(transition, step, log)?;
        }
        Ok(())
    }

    fn hot_steps(&self) -> u64 {
        self.hot_steps
    }

    fn tick(&mut self) {
        if self.temperature() == Temperature::Hot {
            self.hot_steps += 1;
        } else {
            self.hot_steps = 0;
        }
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.write_str(self.definition.name.as_str());
        hasher.write_str(self.state.as_str());
        self.monitor.hash_state(hasher);
    }
}
