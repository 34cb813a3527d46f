//! Systematic concurrency testing for actor programs.
//!
//! Programs are written as event-driven state machines, run under a
//! controlled scheduler that serializes every concurrent step, and explored
//! across many interleavings. Bugs come back with a schedule that replays
//! the failing run exactly.
//!
//! # Crates
//!
//! - [`types`] - Events, payload values and identifiers
//! - [`runtime`] - Actors, monitors, the controlled scheduler and strategies
//! - [`tester`] - Test configuration, the iteration engine and reports
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `multi-thread` | Production runtime that runs actors on a thread pool |
//! | `full` | Enable all optional features |
//!
//! # Example
//!
//! ```no_run
//! use tangle::prelude::*;
//!
//! struct Greeter;
//!
//! impl StateMachine for Greeter {
//!     fn definition() -> MachineBuilder<Self> {
//!         MachineBuilder::new("Greeter").state("Idle", |s| {
//!             s.start().on_event("Hello", |_m: &mut Greeter, ctx, _event| {
//!                 ctx.log("hello received");
//!                 Ok(Transition::Halt)
//!             })
//!         })
//!     }
//! }
//!
//! let entry = test_entry(|ctx| {
//!     let greeter = ctx.create_actor(Greeter);
//!     ctx.send(greeter, Event::unit("Hello"));
//!     Ok(())
//! });
//! let engine = TestEngine::new(TestConfig::default().with_iterations(10))?;
//! let report = engine.run(&entry)?;
//! assert!(report.passed());
//! # Ok::<(), tangle::tester::EngineError>(())
//! ```

pub use tangle_runtime as runtime;
pub use tangle_tester as tester;
pub use tangle_types as types;

pub use tangle_runtime::{Bug, BugKind, ScheduleTrace, SchedulingStrategy};
pub use tangle_tester::{TestConfig, TestEngine, TestReport};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use tangle_runtime::{
        ActionResult, ActorContext, ActorError, ExceptionOutcome, MachineBuilder, Monitor,
        MonitorBuilder, MonitorContext, MonitorRegistration, MonitorResult, MonitorTransition,
        ReceiveFilter, StateMachine, TaskContext, TaskStep, Transition,
    };
    pub use tangle_tester::{test_entry, StrategyConfig, TestConfig, TestEngine, TestReport};
    pub use tangle_types::{ActorId, Event, EventKind, StateName, Value};
}
