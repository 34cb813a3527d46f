//! Controlled runtime for systematic concurrency testing of actor programs.
//!
//! Actors are event-driven state machines with hierarchical states,
//! specification monitors watch them for safety and liveness, and the
//! [`scheduler::ControlledRuntime`] serializes every concurrent step so a
//! [`strategy::SchedulingStrategy`] decides the interleaving. Every decision
//! is recorded in a [`trace::ScheduleTrace`] that replays the run exactly.

// Lock poisoning only follows a panic that already failed the run.
#![allow(clippy::missing_panics_doc)]
// Queue lengths and step counters cross between usize and u64.
#![allow(
    clippy::as_conversions,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
// Transition application and the scheduling loop are long by nature.
#![allow(clippy::cognitive_complexity, clippy::too_many_lines)]
// Error variants are documented on the error enums.
#![allow(clippy::missing_errors_doc)]

mod actor;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod liveness;
pub mod log;
pub mod machine;
pub mod monitor;
pub mod operation;
#[cfg(feature = "multi-thread")]
pub mod production;
pub mod queue;
pub mod registry;
pub mod rng;
pub mod scheduler;
pub mod strategy;
pub mod task;
pub mod trace;

pub use actor::ActorStatus;
pub use context::{ActorContext, RuntimeHandle, TaskContext};
pub use error::{ActorError, Bug, BugKind, DefinitionError};
pub use fingerprint::{Fingerprint, StateHasher};
pub use log::{ExecutionLog, LogEntry, LogKind};
pub use machine::{
    ActionResult, BindingKind, ExceptionOutcome, MachineBuilder, MachineDefinition, Receive,
    StateBuilder, StateMachine, Transition,
};
pub use monitor::{
    Monitor, MonitorBuilder, MonitorContext, MonitorRegistration, MonitorResult,
    MonitorTransition, Temperature,
};
pub use operation::{Operation, OperationKind, OperationStatus};
#[cfg(feature = "multi-thread")]
pub use production::{IdleReport, ProductionError, ProductionRuntime};
pub use queue::ReceiveFilter;
pub use registry::DefinitionRegistry;
pub use rng::SimRng;
pub use scheduler::{ControlledRuntime, IterationOutcome, SchedulerConfig, Termination, TestEntry};
pub use strategy::{SchedulingStrategy, StrategyKind};
pub use task::{TaskStep, TaskWait};
pub use trace::{ScheduleStep, ScheduleTrace, TraceError};
