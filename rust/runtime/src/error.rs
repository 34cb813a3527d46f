//! Error taxonomy for actions and for bugs found by the scheduler.

use std::fmt;

use serde::{Deserialize, Serialize};
use tangle_types::{EventKind, MachineName, OperationId, StateName};

/// Error raised by user code inside an action, task step or monitor handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActorError {
    /// A user or monitor assertion failed. Never offered to exception hooks.
    #[error("assertion failed: {0}")]
    Assertion(String),
    /// Application-level failure returned by an action.
    #[error("{0}")]
    Failure(String),
    /// An action panicked; the panic payload is captured as text.
    #[error("panic: {0}")]
    Panic(String),
    /// No handler matched an event in the full state stack.
    #[error("{machine} received event '{event}' that cannot be handled in state '{state}'")]
    UnhandledEvent {
        /// Machine type that received the event.
        machine: MachineName,
        /// Event kind.
        event: EventKind,
        /// State on top of the stack.
        state: StateName,
    },
    /// Illegal transition usage. Never recoverable by user code.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

impl ActorError {
    /// Application failure with a message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }

    /// Whether user exception hooks may classify this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Assertion(_) | Self::InvalidTransition(_))
    }

    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panic(message)
    }

    /// Classify this error as a bug kind once it escapes all hooks.
    #[must_use]
    pub fn bug_kind(&self) -> BugKind {
        match self {
            Self::Assertion(_) => BugKind::AssertionFailure,
            Self::UnhandledEvent { .. } => BugKind::UnhandledEvent,
            Self::InvalidTransition(_) => BugKind::InvalidTransition,
            Self::Failure(_) | Self::Panic(_) => BugKind::UnhandledException,
        }
    }
}

/// Classification of a bug reported for an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugKind {
    /// A user or monitor assertion failed.
    AssertionFailure,
    /// An event reached a machine with no matching handler.
    UnhandledEvent,
    /// Multiple transitions in one action, stack misuse, or a transition from `on_exit`.
    InvalidTransition,
    /// A user error or panic was rethrown by the exception hook.
    UnhandledException,
    /// No operation is enabled while some are blocked.
    Deadlock,
    /// An execution violates a liveness property.
    LivenessViolation,
    /// The program escaped the scheduler's control.
    UncontrolledConcurrency,
    /// The step bound was reached and bound hits are configured as bugs.
    DepthBoundReached,
    /// Replay could not follow the recorded trace.
    ReplayDivergence,
    /// A machine or monitor declaration was rejected.
    InvalidDeclaration,
}

impl fmt::Display for BugKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AssertionFailure => "assertion failure",
            Self::UnhandledEvent => "unhandled event",
            Self::InvalidTransition => "invalid transition",
            Self::UnhandledException => "unhandled exception",
            Self::Deadlock => "deadlock",
            Self::LivenessViolation => "liveness violation",
            Self::UncontrolledConcurrency => "uncontrolled concurrency",
            Self::DepthBoundReached => "depth bound reached",
            Self::ReplayDivergence => "replay divergence",
            Self::InvalidDeclaration => "invalid declaration",
        };
        f.write_str(s)
    }
}

/// A bug found during one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Bug {
    /// Classification.
    pub kind: BugKind,
    /// Human-readable description.
    pub message: String,
    /// Operation that was running when the bug surfaced, if any.
    pub operation: Option<OperationId>,
    /// Scheduler step at which the bug surfaced.
    pub step: u64,
}

impl Bug {
    /// Create a bug without operation/step attribution.
    #[must_use]
    pub fn new(kind: BugKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            operation: None,
            step: 0,
        }
    }

    /// Bug raised from an action error that escaped all hooks.
    #[must_use]
    pub fn from_actor_error(error: &ActorError) -> Self {
        Self::new(error.bug_kind(), error.to_string())
    }

    /// Attach the operation and step that surfaced the bug.
    #[must_use]
    pub fn at(mut self, operation: Option<OperationId>, step: u64) -> Self {
        self.operation = operation;
        self.step = step;
        self
    }
}

/// Errors in machine or monitor declarations, detected when a definition is built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    /// No state was marked as the start state.
    #[error("{machine} declares no start state")]
    NoStartState {
        /// Declaring machine.
        machine: MachineName,
    },
    /// More than one start state.
    #[error("{machine} declares multiple start states: {first} and {second}")]
    MultipleStartStates {
        /// Declaring machine.
        machine: MachineName,
        /// First start state.
        first: StateName,
        /// Second start state.
        second: StateName,
    },
    /// A state was declared twice.
    #[error("{machine} declares state {state} twice")]
    DuplicateState {
        /// Declaring machine.
        machine: MachineName,
        /// Duplicated state.
        state: StateName,
    },
    /// A transition or inheritance refers to an undeclared state.
    #[error("{machine}: state {from} refers to unknown state {target}")]
    UnknownState {
        /// Declaring machine.
        machine: MachineName,
        /// Referring state.
        from: StateName,
        /// Missing state.
        target: StateName,
    },
    /// State inheritance forms a cycle.
    #[error("{machine}: state inheritance cycle through {state}")]
    InheritanceCycle {
        /// Declaring machine.
        machine: MachineName,
        /// State on the cycle.
        state: StateName,
    },
    /// Two bindings for the same event in one state.
    #[error("{machine}: state {state} binds event {event} more than once")]
    DuplicateBinding {
        /// Declaring machine.
        machine: MachineName,
        /// State with the duplicate.
        state: StateName,
        /// Event kind.
        event: EventKind,
    },
    /// A binding targets a reserved event that cannot be handled explicitly.
    #[error("{machine}: state {state} cannot bind reserved event {event}")]
    ReservedEvent {
        /// Declaring machine.
        machine: MachineName,
        /// Offending state.
        state: StateName,
        /// Reserved kind.
        event: EventKind,
    },
}
