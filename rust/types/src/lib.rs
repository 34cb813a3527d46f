//! Shared vocabulary for the tangle concurrency tester.
//!
//! This crate holds the plain-data types that flow between actors, the
//! controlled scheduler and recorded traces:
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Event`] | immutable message (kind + payload) |
//! | [`EventInfo`] | sender, causal group and send step of an enqueued event |
//! | [`Value`] | serializable payload |
//! | [`EventKind`], [`StateName`], [`MachineName`] | validated identifiers |
//! | [`ActorId`], [`TaskId`], [`TimerId`], [`OperationId`], [`GroupId`] | numeric identifiers |

mod event;
mod identifiers;
mod value;

pub use event::{Event, EventInfo, DEFAULT_EVENT, HALT_EVENT, TIMER_ELAPSED_EVENT};
pub use identifiers::{
    ActorId, EventKind, GroupId, IdentifierError, IdentifierProblem, MachineName, OperationId,
    StateName, TaskId, TimerId,
};
pub use value::Value;
