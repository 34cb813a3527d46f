//! Production runtime (feature-gated).
//!
//! Runs the same machine, monitor and task definitions without a
//! scheduler. Actors execute on a `rayon` pool: each actor has its own cell
//! lock and inbox, and at most one pool job drives an actor at a time.
//! Random choices come from an entropy-seeded generator. Timers fire as
//! soon as the pool picks them up; a periodic timer fires once per start.

use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};

use rayon::{ThreadPool, ThreadPoolBuilder};
use tangle_types::{ActorId, Event, EventInfo, GroupId, OperationId, TaskId, TimerId};

use crate::actor::{ActorCell, ActorCellDyn, ActorStatus};
use crate::context::{RuntimeServices, TaskContext};
use crate::error::{ActorError, Bug, BugKind, DefinitionError};
use crate::log::LogKind;
use crate::machine::StateMachine;
use crate::monitor::{MonitorCellDyn, MonitorRegistration, Temperature};
use crate::queue::QueuedEvent;
use crate::registry::DefinitionRegistry;
use crate::rng::SimRng;
use crate::task::{TaskCell, TaskStep, TaskWait, TimerCell};

/// Errors setting up the production runtime.
#[derive(Debug, thiserror::Error)]
pub enum ProductionError {
    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    /// A machine or monitor declaration is invalid.
    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

/// What was observed once the runtime went idle.
#[derive(Debug, Clone, Default)]
pub struct IdleReport {
    /// Bugs raised by actions, tasks and monitors.
    pub failures: Vec<Bug>,
    /// Events that reached halted actors.
    pub dropped: Vec<(ActorId, Event)>,
    /// Tasks still waiting on a resource.
    pub blocked_tasks: Vec<TaskId>,
    /// Monitors left in a hot state.
    pub hot_monitors: Vec<String>,
}

impl IdleReport {
    /// Whether nothing went wrong.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.hot_monitors.is_empty()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Slot {
    cell: Mutex<Option<Box<dyn ActorCellDyn>>>,
    inbox: Mutex<VecDeque<QueuedEvent>>,
    scheduled: AtomicBool,
    halted: AtomicBool,
}

struct Shared {
    pool: ThreadPool,
    registry: DefinitionRegistry,
    actors: RwLock<BTreeMap<ActorId, Arc<Slot>>>,
    monitors: Mutex<Vec<Box<dyn MonitorCellDyn>>>,
    live_tasks: Mutex<BTreeSet<TaskId>>,
    waiting: Mutex<Vec<TaskCell>>,
    stopped_timers: Mutex<BTreeSet<TimerId>>,
    next_id: AtomicU64,
    next_group: AtomicU64,
    steps: AtomicU64,
    rng: Mutex<SimRng>,
    failures: Mutex<Vec<Bug>>,
    dropped: Mutex<Vec<(ActorId, Event)>>,
    active: Mutex<usize>,
    idle: Condvar,
}

impl Shared {
    fn slot(&self, id: ActorId) -> Option<Arc<Slot>> {
        self.actors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn fail(&self, bug: Bug) {
        tracing::warn!(%bug, "failure in production runtime");
        lock(&self.failures).push(bug);
    }

    fn spawn_job<F>(self: &Arc<Self>, job: F)
    where
        F: FnOnce(&Arc<Self>) + Send + 'static,
    {
        *lock(&self.active) += 1;
        let shared = Arc::clone(self);
        self.pool.spawn(move || {
            job(&shared);
            let mut active = lock(&shared.active);
            *active -= 1;
            if *active == 0 {
                shared.idle.notify_all();
            }
        });
    }

    fn add_actor(self: &Arc<Self>, cell: Box<dyn ActorCellDyn>) {
        let id = cell.id();
        tracing::debug!(actor = %id, machine = %cell.machine_name(), "actor created");
        let slot = Arc::new(Slot {
            cell: Mutex::new(Some(cell)),
            inbox: Mutex::new(VecDeque::new()),
            scheduled: AtomicBool::new(false),
            halted: AtomicBool::new(false),
        });
        self.actors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&slot));
        self.schedule(id, slot);
    }

    fn deliver(self: &Arc<Self>, target: ActorId, item: QueuedEvent) {
        let Some(slot) = self.slot(target) else {
            self.fail(Bug::new(
                BugKind::UnhandledException,
                format!("{} sent to unknown {target}", item.event.kind),
            ));
            return;
        };
        lock(&slot.inbox).push_back(item);
        self.schedule(target, slot);
    }

    fn schedule(self: &Arc<Self>, id: ActorId, slot: Arc<Slot>) {
        if slot.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.spawn_job(move |shared| shared.drive(id, &slot));
    }

    fn drive(self: &Arc<Self>, id: ActorId, slot: &Slot) {
        let mut services = ProductionServices::new(Arc::clone(self), OperationId::from(id));
        loop {
            {
                let mut guard = lock(&slot.cell);
                if let Some(cell) = guard.as_mut() {
                    self.run_actor(cell.as_mut(), slot, &mut services);
                }
            }
            slot.scheduled.store(false, Ordering::Release);
            // A send may have landed after the last drain.
            if lock(&slot.inbox).is_empty() || slot.scheduled.swap(true, Ordering::AcqRel) {
                return;
            }
        }
    }

    fn run_actor(
        self: &Arc<Self>,
        cell: &mut dyn ActorCellDyn,
        slot: &Slot,
        services: &mut ProductionServices,
    ) {
        loop {
            let pending: Vec<QueuedEvent> = lock(&slot.inbox).drain(..).collect();
            for item in pending {
                if slot.halted.load(Ordering::Acquire) || cell.status() == ActorStatus::Halted {
                    cell.event_dropped(&item.event);
                    services.dropped(cell.id(), item);
                } else {
                    cell.enqueue(item);
                }
            }
            if slot.halted.load(Ordering::Acquire) || cell.status() != ActorStatus::Enabled {
                return;
            }
            self.steps.fetch_add(1, Ordering::Relaxed);
            let result = cell.run_step(services);
            let stopped = match result {
                Ok(()) => cell.status() == ActorStatus::Halted,
                Err(bug) => {
                    self.fail(bug);
                    cell.close_queue(services);
                    true
                }
            };
            if stopped {
                slot.halted.store(true, Ordering::Release);
                self.wake_waiters();
            }
        }
    }

    fn schedule_task(self: &Arc<Self>, task: TaskCell) {
        lock(&self.live_tasks).insert(task.id());
        self.spawn_job(move |shared| shared.run_task(task));
    }

    fn run_task(self: &Arc<Self>, mut task: TaskCell) {
        let mut services = ProductionServices::new(Arc::clone(self), OperationId::from(task.id()));
        loop {
            if let Err(bug) = task.run_step(&mut services) {
                self.fail(bug);
            }
            if task.is_done() {
                lock(&self.live_tasks).remove(&task.id());
                self.wake_waiters();
                return;
            }
            match task.wait() {
                None => {
                    self.spawn_job(move |shared| shared.run_task(task));
                    return;
                }
                Some(wait) if self.wait_satisfied(wait) => task.clear_wait(),
                Some(_) => {
                    lock(&self.waiting).push(task);
                    // The resource may have been released before the push.
                    self.wake_waiters();
                    return;
                }
            }
        }
    }

    fn wait_satisfied(&self, wait: TaskWait) -> bool {
        match wait {
            TaskWait::ActorHalted(actor) => self
                .slot(actor)
                .map_or(true, |slot| slot.halted.load(Ordering::Acquire)),
            TaskWait::Task(task) => !lock(&self.live_tasks).contains(&task),
        }
    }

    fn wake_waiters(self: &Arc<Self>) {
        let ready: Vec<TaskCell> = {
            let mut waiting = lock(&self.waiting);
            let (ready, blocked): (Vec<TaskCell>, Vec<TaskCell>) = std::mem::take(&mut *waiting)
                .into_iter()
                .partition(|task| task.wait().is_some_and(|wait| self.wait_satisfied(wait)));
            *waiting = blocked;
            ready
        };
        for mut task in ready {
            task.clear_wait();
            self.spawn_job(move |shared| shared.run_task(task));
        }
    }

    fn start_timer(self: &Arc<Self>, timer: TimerCell) {
        self.spawn_job(move |shared| {
            let mut timer = timer;
            if lock(&shared.stopped_timers).remove(&timer.id()) {
                return;
            }
            let mut services =
                ProductionServices::new(Arc::clone(shared), OperationId::from(timer.id()));
            timer.fire(&mut services);
        });
    }

    fn process_monitors<F>(&self, event: &Event, mut select: F)
    where
        F: FnMut(&dyn MonitorCellDyn) -> bool,
    {
        let step = self.steps.load(Ordering::Relaxed);
        let mut monitors = lock(&self.monitors);
        for monitor in monitors.iter_mut() {
            if !select(&**monitor) {
                continue;
            }
            let mut entries = Vec::new();
            let result = monitor.process(event.clone(), step, &mut entries);
            for entry in entries {
                tracing::trace!(%entry, "monitor");
            }
            if let Err(bug) = result {
                self.fail(bug);
            }
        }
    }
}

/// Services handed to one running operation.
struct ProductionServices {
    shared: Arc<Shared>,
    operation: OperationId,
}

impl ProductionServices {
    fn new(shared: Arc<Shared>, operation: OperationId) -> Self {
        Self { shared, operation }
    }
}

impl RuntimeServices for ProductionServices {
    fn step(&self) -> u64 {
        self.shared.steps.load(Ordering::Relaxed)
    }

    fn registry(&self) -> &DefinitionRegistry {
        &self.shared.registry
    }

    fn next_id(&mut self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn new_group(&mut self) -> GroupId {
        GroupId(self.shared.next_group.fetch_add(1, Ordering::Relaxed))
    }

    fn add_actor(&mut self, cell: Box<dyn ActorCellDyn>, _creator: Option<OperationId>) {
        self.shared.add_actor(cell);
    }

    fn deliver(&mut self, target: ActorId, item: QueuedEvent) {
        self.shared.deliver(target, item);
    }

    fn dropped(&mut self, target: ActorId, item: QueuedEvent) {
        tracing::debug!(actor = %target, event = %item.event.kind, "event dropped");
        lock(&self.shared.dropped).push((target, item.event));
    }

    fn random_bool(&mut self, _site: Option<&'static Location<'static>>) -> bool {
        lock(&self.shared.rng).next_bool()
    }

    fn random_integer(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            self.fail(Bug::new(
                BugKind::UnhandledException,
                "random integer requested with bound 0",
            ));
            return 0;
        }
        lock(&self.shared.rng).next_below(bound)
    }

    fn notify_monitor(&mut self, monitor: TypeId, event: Event) {
        self.shared
            .process_monitors(&event, |m| m.monitor_type() == monitor);
    }

    fn broadcast(&mut self, event: Event) {
        let kind = event.kind.clone();
        self.shared.process_monitors(&event, |m| m.handles(&kind));
    }

    fn add_task(&mut self, task: TaskCell) {
        self.shared.schedule_task(task);
    }

    fn add_timer(&mut self, timer: TimerCell) {
        self.shared.start_timer(timer);
    }

    fn stop_timer(&mut self, timer: TimerId) {
        lock(&self.shared.stopped_timers).insert(timer);
    }

    fn record(&mut self, kind: LogKind) {
        tracing::trace!(operation = %self.operation, %kind, "production");
    }

    fn fail(&mut self, bug: Bug) {
        let step = self.step();
        self.shared.fail(bug.at(Some(self.operation), step));
    }
}

/// Runs actors on a thread pool without controlled scheduling.
pub struct ProductionRuntime {
    shared: Arc<Shared>,
}

impl ProductionRuntime {
    /// Runtime with `workers` pool threads (0 picks the rayon default).
    pub fn new(workers: usize) -> Result<Self, ProductionError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("tangle-worker-{index}"))
            .build()?;
        Ok(Self {
            shared: Arc::new(Shared {
                pool,
                registry: DefinitionRegistry::new(),
                actors: RwLock::new(BTreeMap::new()),
                monitors: Mutex::new(Vec::new()),
                live_tasks: Mutex::new(BTreeSet::new()),
                waiting: Mutex::new(Vec::new()),
                stopped_timers: Mutex::new(BTreeSet::new()),
                next_id: AtomicU64::new(1),
                next_group: AtomicU64::new(1),
                steps: AtomicU64::new(0),
                rng: Mutex::new(SimRng::new(rand::random())),
                failures: Mutex::new(Vec::new()),
                dropped: Mutex::new(Vec::new()),
                active: Mutex::new(0),
                idle: Condvar::new(),
            }),
        })
    }

    /// Instantiate a monitor.
    pub fn register_monitor(&self, registration: &MonitorRegistration) -> Result<(), ProductionError> {
        let mut cell = registration.instantiate(&self.shared.registry)?;
        let mut entries = Vec::new();
        if let Err(bug) = cell.start(0, &mut entries) {
            self.shared.fail(bug);
        }
        lock(&self.shared.monitors).push(cell);
        Ok(())
    }

    /// Create an actor; it starts on the pool right away.
    pub fn create_actor<M: StateMachine>(
        &self,
        machine: M,
        initial: Option<Event>,
    ) -> Result<ActorId, ProductionError> {
        let definition = self.shared.registry.machine::<M>()?;
        let id = ActorId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let cell = ActorCell::new(id, machine, definition, initial, GroupId::NONE);
        self.shared.add_actor(Box::new(cell));
        Ok(id)
    }

    /// Send an event from outside any actor.
    pub fn send(&self, target: ActorId, event: Event) {
        let info = EventInfo::external(GroupId::NONE, self.shared.steps.load(Ordering::Relaxed));
        self.shared.deliver(target, QueuedEvent::new(event, info));
    }

    /// Spawn a task on the pool.
    pub fn spawn_task<F>(&self, name: impl Into<String>, body: F) -> TaskId
    where
        F: FnMut(&mut TaskContext<'_>) -> Result<TaskStep, ActorError> + Send + 'static,
    {
        let id = TaskId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared
            .schedule_task(TaskCell::new(id, name.into(), Box::new(body), GroupId::NONE));
        id
    }

    /// Whether `actor` has halted (or stopped on a failure).
    #[must_use]
    pub fn is_halted(&self, actor: ActorId) -> bool {
        self.shared
            .slot(actor)
            .is_some_and(|slot| slot.halted.load(Ordering::Acquire))
    }

    /// Block until no job is queued or running, then collect what happened
    /// since the previous call.
    pub fn wait_idle(&self) -> IdleReport {
        let mut active = lock(&self.shared.active);
        while *active > 0 {
            active = self
                .shared
                .idle
                .wait(active)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(active);

        IdleReport {
            failures: std::mem::take(&mut *lock(&self.shared.failures)),
            dropped: std::mem::take(&mut *lock(&self.shared.dropped)),
            blocked_tasks: lock(&self.shared.waiting).iter().map(TaskCell::id).collect(),
            hot_monitors: lock(&self.shared.monitors)
                .iter()
                .filter(|m| m.temperature() == Temperature::Hot)
                .map(|m| format!("{}.{}", m.name(), m.state()))
                .collect(),
        }
    }
}
