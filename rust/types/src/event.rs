//! Events and the metadata that travels with them through mailboxes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identifiers::{ActorId, EventKind, GroupId};
use crate::value::Value;

/// Kind of the cooperative halt request.
pub const HALT_EVENT: &str = "halt";
/// Kind synthesised when a state declares a default handler and nothing is dequeueable.
pub const DEFAULT_EVENT: &str = "default";
/// Kind delivered by timers.
pub const TIMER_ELAPSED_EVENT: &str = "timer_elapsed";

/// An immutable message with a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type.
    pub kind: EventKind,
    /// Payload.
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    /// Create an event with a payload.
    #[must_use]
    pub fn new(kind: impl Into<EventKind>, payload: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// Create an event without payload.
    #[must_use]
    pub fn unit(kind: impl Into<EventKind>) -> Self {
        Self {
            kind: kind.into(),
            payload: Value::Unit,
        }
    }

    /// The halt request event.
    #[must_use]
    pub fn halt() -> Self {
        Self::unit(EventKind::from_static(HALT_EVENT))
    }

    /// The synthesised default event.
    #[must_use]
    pub fn default_event() -> Self {
        Self::unit(EventKind::from_static(DEFAULT_EVENT))
    }

    /// Whether this is the halt request.
    #[must_use]
    pub fn is_halt(&self) -> bool {
        self.kind == HALT_EVENT
    }

    /// Whether this is the synthesised default event.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.kind == DEFAULT_EVENT
    }

    /// Whether the event has the given kind.
    #[must_use]
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Stable byte encoding used for fingerprinting.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = self.kind.as_str().as_bytes().to_vec();
        bytes.push(0);
        bytes.extend(self.payload.canonical_bytes());
        bytes
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload {
            Value::Unit => write!(f, "{}", self.kind),
            ref payload => write!(f, "{}({payload})", self.kind),
        }
    }
}

/// Metadata recorded alongside an enqueued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    /// Sending actor, if sent from an actor.
    pub origin: Option<ActorId>,
    /// Causal group the send belongs to.
    pub group: GroupId,
    /// Scheduler step at which the event was sent.
    pub sent_at_step: u64,
}

impl EventInfo {
    /// Metadata for an event with no sender.
    #[must_use]
    pub fn external(group: GroupId, sent_at_step: u64) -> Self {
        Self {
            origin: None,
            group,
            sent_at_step,
        }
    }
}
