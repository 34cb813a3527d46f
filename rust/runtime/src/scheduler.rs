//! The controlled runtime.
//!
//! One [`ControlledRuntime`] runs one test iteration. Every operation (actor
//! handler, task, timer) executes only when the scheduling strategy picks
//! it, one step at a time, on the calling thread. After each step the
//! runtime refreshes operation statuses, checks monitors for liveness
//! violations and records the program-state fingerprint for cycle
//! detection. The iteration ends at quiescence, at the step bound, when the
//! strategy stops, or at the first bug.

use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::Location;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tangle_types::{ActorId, Event, GroupId, OperationId, TaskId, TimerId};

use crate::actor::{ActorCellDyn, ActorStatus};
use crate::context::{RuntimeServices, TaskContext};
use crate::error::{ActorError, Bug, BugKind};
use crate::fingerprint::{Fingerprint, StateHasher};
use crate::liveness::{CycleDetector, StepRecord};
use crate::log::{ExecutionLog, LogKind};
use crate::monitor::{MonitorCellDyn, MonitorRegistration, Temperature};
use crate::operation::{Operation, OperationKind, OperationStatus};
use crate::queue::QueuedEvent;
use crate::registry::DefinitionRegistry;
use crate::strategy::SchedulingStrategy;
use crate::task::{TaskCell, TaskStep, TaskWait, TimerCell};
use crate::trace::{ScheduleStep, ScheduleTrace};

/// Body of a test: runs once, as the first task of every iteration.
pub type TestEntry = Arc<dyn Fn(&mut TaskContext<'_>) -> Result<(), ActorError> + Send + Sync>;

fn default_max_fair_steps() -> u64 {
    100_000
}

fn default_max_unfair_steps() -> u64 {
    10_000
}

fn default_cycle_detection_threshold() -> u64 {
    0
}

fn default_record_log() -> bool {
    true
}

/// Per-iteration limits and checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Step bound under fair strategies.
    #[serde(default = "default_max_fair_steps")]
    pub max_fair_steps: u64,
    /// Step bound under unfair strategies.
    #[serde(default = "default_max_unfair_steps")]
    pub max_unfair_steps: u64,
    /// Consecutive hot steps after which a monitor reports a liveness
    /// violation under a fair strategy. Defaults to half the fair bound.
    #[serde(default)]
    pub liveness_temperature_threshold: Option<u64>,
    /// Detect fair cycles in the program-state graph.
    #[serde(default)]
    pub cycle_detection: bool,
    /// Steps to run before fingerprints are recorded.
    #[serde(default = "default_cycle_detection_threshold")]
    pub cycle_detection_threshold: u64,
    /// Report reaching the step bound as a bug.
    #[serde(default)]
    pub consider_depth_bound_hit_as_bug: bool,
    /// Keep the execution log.
    #[serde(default = "default_record_log")]
    pub record_log: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_fair_steps: default_max_fair_steps(),
            max_unfair_steps: default_max_unfair_steps(),
            liveness_temperature_threshold: None,
            cycle_detection: false,
            cycle_detection_threshold: default_cycle_detection_threshold(),
            consider_depth_bound_hit_as_bug: false,
            record_log: default_record_log(),
        }
    }
}

impl SchedulerConfig {
    /// Step bound for a strategy of the given fairness.
    #[must_use]
    pub fn step_bound(&self, fair: bool) -> u64 {
        if fair {
            self.max_fair_steps
        } else {
            self.max_unfair_steps
        }
    }

    /// Effective hot-step threshold.
    #[must_use]
    pub fn temperature_threshold(&self) -> u64 {
        self.liveness_temperature_threshold
            .unwrap_or(self.max_fair_steps / 2)
    }
}

/// Why an iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// No operation was enabled or blocked.
    Quiescent,
    /// The step bound was reached.
    BoundReached,
    /// The strategy declined to continue.
    StrategyStopped,
    /// A bug was found.
    Bug,
}

/// Everything observed during one iteration.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    /// Iteration number.
    pub iteration: u64,
    /// Scheduling steps taken.
    pub steps: u64,
    /// Why the iteration ended.
    pub termination: Termination,
    /// First bug found, if any.
    pub bug: Option<Bug>,
    /// Decisions made, replayable.
    pub trace: ScheduleTrace,
    /// Execution log.
    pub log: ExecutionLog,
    /// Events that reached halted actors.
    pub dropped_events: usize,
    /// Actors created.
    pub actors_created: usize,
    /// `Machine.State` pairs entered during the iteration.
    pub visited_states: BTreeSet<String>,
}

impl IterationOutcome {
    /// Whether a bug was found.
    #[must_use]
    pub fn is_bug(&self) -> bool {
        self.bug.is_some()
    }
}

/// Scheduler of one controlled iteration.
pub struct ControlledRuntime<'s> {
    strategy: &'s mut dyn SchedulingStrategy,
    registry: &'s DefinitionRegistry,
    config: &'s SchedulerConfig,
    iteration: u64,
    fair: bool,
    operations: BTreeMap<OperationId, Operation>,
    // `None` while the actor is running.
    actors: BTreeMap<ActorId, Option<Box<dyn ActorCellDyn>>>,
    // Halted actors stay around to observe dropped events.
    halted: BTreeMap<ActorId, Box<dyn ActorCellDyn>>,
    tasks: BTreeMap<TaskId, Option<TaskCell>>,
    timers: BTreeMap<TimerId, TimerCell>,
    monitors: Vec<Box<dyn MonitorCellDyn>>,
    // Events sent by an actor to itself while its handler runs.
    parked: Vec<(ActorId, QueuedEvent)>,
    next_id: u64,
    next_group: u64,
    current: Option<OperationId>,
    step: u64,
    trace: ScheduleTrace,
    log: ExecutionLog,
    bug: Option<Bug>,
    fair_choices: Vec<(String, bool)>,
    cycles: Option<CycleDetector>,
    dropped_events: usize,
    actors_created: usize,
    visited_states: BTreeSet<String>,
}

impl<'s> ControlledRuntime<'s> {
    /// Runtime for iteration `iteration`; the strategy must already be prepared.
    pub fn new(
        strategy: &'s mut dyn SchedulingStrategy,
        registry: &'s DefinitionRegistry,
        config: &'s SchedulerConfig,
        iteration: u64,
    ) -> Self {
        let fair = strategy.is_fair();
        let trace = ScheduleTrace::new(strategy.name(), fair, strategy.iteration_seed());
        let log = if config.record_log {
            ExecutionLog::new()
        } else {
            ExecutionLog::disabled()
        };
        Self {
            strategy,
            registry,
            config,
            iteration,
            fair,
            operations: BTreeMap::new(),
            actors: BTreeMap::new(),
            halted: BTreeMap::new(),
            tasks: BTreeMap::new(),
            timers: BTreeMap::new(),
            monitors: Vec::new(),
            parked: Vec::new(),
            next_id: 1,
            next_group: 1,
            current: None,
            step: 0,
            trace,
            log,
            bug: None,
            fair_choices: Vec::new(),
            cycles: config.cycle_detection.then(CycleDetector::new),
            dropped_events: 0,
            actors_created: 0,
            visited_states: BTreeSet::new(),
        }
    }

    /// Instantiate a monitor and run its start state's entry action.
    pub fn register_monitor(&mut self, registration: &MonitorRegistration) {
        let mut cell = match registration.instantiate(self.registry) {
            Ok(cell) => cell,
            Err(err) => {
                self.fail(Bug::new(BugKind::InvalidDeclaration, err.to_string()));
                return;
            }
        };
        let monitor_type = cell.monitor_type();
        if self.monitors.iter().any(|m| m.monitor_type() == monitor_type) {
            tracing::warn!(monitor = %cell.name(), "monitor registered twice; keeping the first");
            return;
        }
        let mut entries = Vec::new();
        let started = cell.start(self.step, &mut entries);
        self.record_all(entries);
        if let Err(bug) = started {
            self.fail(bug);
        }
        self.monitors.push(cell);
    }

    /// Run the iteration to its end.
    pub fn run(mut self, entry: &TestEntry) -> IterationOutcome {
        let body = Arc::clone(entry);
        let id = TaskId(self.next_id());
        self.add_task(TaskCell::new(
            id,
            "entry".to_owned(),
            Box::new(move |ctx: &mut TaskContext<'_>| -> Result<TaskStep, ActorError> {
                body(ctx)?;
                Ok(TaskStep::Done)
            }),
            GroupId::NONE,
        ));

        let bound = self.config.step_bound(self.fair);
        let termination = loop {
            if self.bug.is_some() {
                break Termination::Bug;
            }
            self.refresh();
            let enabled: Vec<OperationId> = self
                .operations
                .values()
                .filter(|op| op.status.is_enabled())
                .map(|op| op.id)
                .collect();

            if enabled.is_empty() {
                if let Some(bug) = self.deadlock() {
                    self.fail(bug);
                    continue;
                }
                if let Some((name, state)) = self.hot_monitor() {
                    self.fail(Bug::new(
                        BugKind::LivenessViolation,
                        format!(
                            "monitor '{name}' is in hot state '{state}' at the end of execution"
                        ),
                    ));
                    continue;
                }
                break Termination::Quiescent;
            }

            if self.step >= bound {
                if self.fair {
                    if let Some((name, state)) = self.hot_monitor() {
                        self.fail(Bug::new(
                            BugKind::LivenessViolation,
                            format!(
                                "monitor '{name}' is in hot state '{state}' after {bound} fair steps"
                            ),
                        ));
                        continue;
                    }
                }
                if self.config.consider_depth_bound_hit_as_bug {
                    self.fail(Bug::new(
                        BugKind::DepthBoundReached,
                        format!("reached the bound of {bound} steps"),
                    ));
                    continue;
                }
                break Termination::BoundReached;
            }

            let choice = match self.strategy.next_operation(&enabled, self.current) {
                Some(op) if enabled.contains(&op) => op,
                Some(op) => {
                    self.fail(Bug::new(
                        BugKind::ReplayDivergence,
                        format!("strategy chose {op}, which is not enabled"),
                    ));
                    continue;
                }
                None => match self.strategy.failure() {
                    Some(reason) => {
                        self.fail(Bug::new(BugKind::ReplayDivergence, reason));
                        continue;
                    }
                    None => break Termination::StrategyStopped,
                },
            };

            self.trace.push(ScheduleStep::Operation { id: choice });
            self.step += 1;
            self.current = Some(choice);
            self.fair_choices.clear();
            self.record(LogKind::Scheduled { operation: choice });
            self.execute(choice);
            if self.bug.is_none() {
                self.refresh();
                self.after_step(choice, enabled);
            }
        };

        if let Some(bug) = &self.bug {
            tracing::debug!(iteration = self.iteration, step = self.step, %bug, "bug found");
            let message = bug.to_string();
            self.record(LogKind::Bug { message });
        }

        IterationOutcome {
            iteration: self.iteration,
            steps: self.step,
            termination,
            bug: self.bug,
            trace: self.trace,
            log: self.log,
            dropped_events: self.dropped_events,
            actors_created: self.actors_created,
            visited_states: self.visited_states,
        }
    }

    fn execute(&mut self, choice: OperationId) {
        let Some(kind) = self.operations.get(&choice).map(|op| op.kind) else {
            return;
        };
        match kind {
            OperationKind::Actor => {
                let id = ActorId(choice.get());
                let Some(mut cell) = self.actors.get_mut(&id).and_then(Option::take) else {
                    return;
                };
                let result = cell.run_step(self);
                if let Some(state) = cell.current_state() {
                    self.visited_states
                        .insert(format!("{}.{state}", cell.machine_name()));
                }
                self.actors.insert(id, Some(cell));
                for (target, item) in std::mem::take(&mut self.parked) {
                    self.enqueue(target, item);
                }
                if let Err(bug) = result {
                    self.fail(bug);
                }
            }
            OperationKind::Task => {
                let id = TaskId(choice.get());
                let Some(mut task) = self.tasks.get_mut(&id).and_then(Option::take) else {
                    return;
                };
                let result = task.run_step(self);
                self.tasks.insert(id, Some(task));
                if let Err(bug) = result {
                    self.fail(bug);
                }
            }
            OperationKind::Timer => {
                let id = TimerId(choice.get());
                if let Some(mut timer) = self.timers.remove(&id) {
                    timer.fire(self);
                    self.timers.insert(id, timer);
                }
            }
        }
    }

    /// Recompute operation statuses and retire what has finished.
    fn refresh(&mut self) {
        let mut halted = Vec::new();
        for (id, slot) in &self.actors {
            let Some(cell) = slot else { continue };
            let status = match cell.status() {
                ActorStatus::Enabled => OperationStatus::Enabled,
                ActorStatus::Idle => OperationStatus::Completed,
                ActorStatus::WaitingToReceive => {
                    OperationStatus::BlockedOnReceive(cell.receive_filter().unwrap_or_default())
                }
                ActorStatus::Halted => {
                    halted.push(*id);
                    continue;
                }
            };
            if let Some(op) = self.operations.get_mut(&OperationId::from(*id)) {
                op.status = status;
            }
        }
        for id in halted {
            if let Some(Some(cell)) = self.actors.remove(&id) {
                self.halted.insert(id, cell);
            }
            self.operations.remove(&OperationId::from(id));
        }

        let finished: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(_, slot)| slot.as_ref().is_some_and(TaskCell::is_done))
            .map(|(id, _)| *id)
            .collect();
        for id in finished {
            self.tasks.remove(&id);
            self.operations.remove(&OperationId::from(id));
        }
        let live_tasks: BTreeSet<TaskId> = self.tasks.keys().copied().collect();
        for (id, slot) in &mut self.tasks {
            let Some(task) = slot else { continue };
            let status = match task.wait() {
                Some(wait) if !wait_satisfied(wait, &self.actors, &live_tasks) => {
                    OperationStatus::BlockedOnResource(wait)
                }
                Some(_) => {
                    task.clear_wait();
                    OperationStatus::Enabled
                }
                None => OperationStatus::Enabled,
            };
            if let Some(op) = self.operations.get_mut(&OperationId::from(*id)) {
                op.status = status;
            }
        }

        let retired: Vec<TimerId> = self
            .timers
            .values()
            .filter(|t| t.is_done() || !self.actors.contains_key(&t.owner()))
            .map(TimerCell::id)
            .collect();
        for id in retired {
            self.timers.remove(&id);
            self.operations.remove(&OperationId::from(id));
        }
        for timer in self.timers.values() {
            let in_flight = timer.is_periodic()
                && self
                    .actors
                    .get(&timer.owner())
                    .and_then(Option::as_ref)
                    .is_some_and(|owner| owner.holds_timer_event(timer.id()));
            let status = if in_flight {
                OperationStatus::Completed
            } else {
                OperationStatus::Enabled
            };
            if let Some(op) = self.operations.get_mut(&OperationId::from(timer.id())) {
                op.status = status;
            }
        }
    }

    fn deadlock(&self) -> Option<Bug> {
        let blocked: Vec<String> = self
            .operations
            .values()
            .filter(|op| op.status.is_blocked())
            .map(ToString::to_string)
            .collect();
        if blocked.is_empty() {
            return None;
        }
        Some(Bug::new(
            BugKind::Deadlock,
            format!("deadlock detected: {}", blocked.join("; ")),
        ))
    }

    fn hot_monitor(&self) -> Option<(String, String)> {
        self.monitors
            .iter()
            .find(|m| m.temperature() == Temperature::Hot)
            .map(|m| (m.name().to_string(), m.state().to_string()))
    }

    fn after_step(&mut self, scheduled: OperationId, enabled: Vec<OperationId>) {
        for monitor in &mut self.monitors {
            monitor.tick();
        }

        if self.fair {
            let threshold = self.config.temperature_threshold();
            if let Some(monitor) = self.monitors.iter().find(|m| m.hot_steps() > threshold) {
                let message = format!(
                    "monitor '{}' stayed in hot state '{}' for more than {threshold} steps",
                    monitor.name(),
                    monitor.state()
                );
                self.fail(Bug::new(BugKind::LivenessViolation, message));
                return;
            }
        }

        // Task bodies are opaque to the fingerprint.
        if self.step < self.config.cycle_detection_threshold || !self.tasks.is_empty() {
            return;
        }
        if self.cycles.is_none() {
            return;
        }
        let record = StepRecord {
            fingerprint: self.fingerprint(),
            scheduled,
            enabled,
            hot_monitors: self
                .monitors
                .iter()
                .filter(|m| m.temperature() == Temperature::Hot)
                .map(|m| m.name().clone())
                .collect(),
            fair_choices: std::mem::take(&mut self.fair_choices),
        };
        let cycle = self.cycles.as_mut().and_then(|c| c.record(record));
        if let Some(cycle) = cycle {
            self.fail(Bug::new(
                BugKind::LivenessViolation,
                format!(
                    "monitor '{}' stays hot in a fair cycle of {} steps",
                    cycle.monitor, cycle.length
                ),
            ));
        }
    }

    fn fingerprint(&self) -> Fingerprint {
        let mut hasher = StateHasher::new();
        hasher.write_u64(self.actors.len() as u64);
        for cell in self.actors.values().flatten() {
            cell.hash_into(&mut hasher);
        }
        hasher.write_u64(self.halted.len() as u64);
        for id in self.halted.keys() {
            hasher.write_u64(id.get());
        }
        for monitor in &self.monitors {
            monitor.hash_into(&mut hasher);
        }
        hasher.write_u64(self.timers.len() as u64);
        for timer in self.timers.values() {
            hasher.write_u64(timer.id().get());
            hasher.write_bool(timer.is_periodic());
        }
        hasher.finish()
    }

    fn add_operation(&mut self, id: OperationId, kind: OperationKind, group: GroupId, label: String) {
        self.operations.insert(
            id,
            Operation {
                id,
                kind,
                status: OperationStatus::Enabled,
                group,
                label,
                created_at: self.step,
            },
        );
    }

    fn enqueue(&mut self, target: ActorId, item: QueuedEvent) {
        match self.actors.get_mut(&target) {
            Some(Some(cell)) if cell.status() == ActorStatus::Halted => {
                cell.event_dropped(&item.event);
                self.dropped(target, item);
            }
            Some(Some(cell)) => {
                cell.enqueue(item);
            }
            Some(None) => self.parked.push((target, item)),
            None if self.halted.contains_key(&target) => {
                if let Some(cell) = self.halted.get_mut(&target) {
                    cell.event_dropped(&item.event);
                }
                self.dropped(target, item);
            }
            None => {
                let message = format!("{} sent to unknown {target}", item.event.kind);
                self.fail(Bug::new(BugKind::UnhandledException, message));
            }
        }
    }

    fn record_all(&mut self, entries: Vec<LogKind>) {
        for kind in entries {
            self.record(kind);
        }
    }

    fn process_monitor(&mut self, index: usize, event: Event) {
        let mut entries = Vec::new();
        let result = self.monitors[index].process(event, self.step, &mut entries);
        self.record_all(entries);
        if let Err(bug) = result {
            self.fail(bug);
        }
    }

    fn strategy_stopped(&mut self) {
        let reason = self
            .strategy
            .failure()
            .unwrap_or_else(|| "strategy produced no value".to_owned());
        self.fail(Bug::new(BugKind::ReplayDivergence, reason));
    }
}

fn wait_satisfied(
    wait: TaskWait,
    actors: &BTreeMap<ActorId, Option<Box<dyn ActorCellDyn>>>,
    live_tasks: &BTreeSet<TaskId>,
) -> bool {
    match wait {
        TaskWait::ActorHalted(actor) => !actors.contains_key(&actor),
        TaskWait::Task(task) => !live_tasks.contains(&task),
    }
}

impl RuntimeServices for ControlledRuntime<'_> {
    fn step(&self) -> u64 {
        self.step
    }

    fn registry(&self) -> &DefinitionRegistry {
        self.registry
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn new_group(&mut self) -> GroupId {
        let group = GroupId(self.next_group);
        self.next_group += 1;
        group
    }

    fn add_actor(&mut self, cell: Box<dyn ActorCellDyn>, creator: Option<OperationId>) {
        let id = cell.id();
        let machine = cell.machine_name().clone();
        let group = cell.group();
        self.add_operation(id.into(), OperationKind::Actor, group, machine.to_string());
        self.record(LogKind::ActorCreated {
            actor: id,
            machine,
            creator,
            group,
        });
        self.actors_created += 1;
        self.actors.insert(id, Some(cell));
    }

    fn deliver(&mut self, target: ActorId, item: QueuedEvent) {
        self.record(LogKind::Sent {
            from: item.info.origin,
            to: target,
            event: item.event.clone(),
            group: item.info.group,
        });
        self.enqueue(target, item);
    }

    fn dropped(&mut self, target: ActorId, item: QueuedEvent) {
        tracing::debug!(actor = %target, event = %item.event.kind, "event dropped");
        self.dropped_events += 1;
        self.record(LogKind::Dropped {
            actor: target,
            event: item.event,
        });
    }

    fn random_bool(&mut self, site: Option<&'static Location<'static>>) -> bool {
        let Some(current) = self.current else {
            return false;
        };
        match self.strategy.next_boolean(current) {
            Some(value) => {
                self.trace.push(ScheduleStep::Boolean { value });
                if let Some(site) = site {
                    let key = format!("{}:{}:{}", site.file(), site.line(), site.column());
                    self.fair_choices.push((key, value));
                }
                self.record(LogKind::RandomBool {
                    value,
                    fair: site.is_some(),
                });
                value
            }
            None => {
                self.strategy_stopped();
                false
            }
        }
    }

    fn random_integer(&mut self, bound: u64) -> u64 {
        let Some(current) = self.current else {
            return 0;
        };
        if bound == 0 {
            self.fail(Bug::new(
                BugKind::UnhandledException,
                "random integer requested with bound 0",
            ));
            return 0;
        }
        match self.strategy.next_integer(current, bound) {
            Some(value) => {
                self.trace.push(ScheduleStep::Integer { value });
                self.record(LogKind::RandomInteger { value, bound });
                value
            }
            None => {
                self.strategy_stopped();
                0
            }
        }
    }

    fn notify_monitor(&mut self, monitor: TypeId, event: Event) {
        match self.monitors.iter().position(|m| m.monitor_type() == monitor) {
            Some(index) => self.process_monitor(index, event),
            None => tracing::debug!(event = %event.kind, "notification for unregistered monitor"),
        }
    }

    fn broadcast(&mut self, event: Event) {
        let targets: Vec<usize> = self
            .monitors
            .iter()
            .enumerate()
            .filter(|(_, m)| m.handles(&event.kind))
            .map(|(index, _)| index)
            .collect();
        for index in targets {
            if self.bug.is_some() {
                break;
            }
            self.process_monitor(index, event.clone());
        }
    }

    fn add_task(&mut self, task: TaskCell) {
        let id = task.id();
        let name = task.name().to_owned();
        self.add_operation(id.into(), OperationKind::Task, task.group(), name.clone());
        self.record(LogKind::TaskSpawned { task: id, name });
        self.tasks.insert(id, Some(task));
    }

    fn add_timer(&mut self, timer: TimerCell) {
        let id = timer.id();
        let owner = timer.owner();
        let periodic = timer.is_periodic();
        self.add_operation(
            id.into(),
            OperationKind::Timer,
            timer.group(),
            format!("timer of {owner}"),
        );
        self.record(LogKind::TimerStarted {
            timer: id,
            owner,
            periodic,
        });
        self.timers.insert(id, timer);
    }

    fn stop_timer(&mut self, timer: TimerId) {
        if self.timers.remove(&timer).is_some() {
            self.operations.remove(&OperationId::from(timer));
            self.record(LogKind::TimerStopped { timer });
        }
    }

    fn record(&mut self, kind: LogKind) {
        self.log.push(self.step, self.current, kind);
    }

    fn fail(&mut self, bug: Bug) {
        if self.bug.is_none() {
            self.bug = Some(bug.at(self.current, self.step));
        }
    }
}
