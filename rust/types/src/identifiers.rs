//! Typed identifiers used by machine declarations, the scheduler and traces.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Why a name was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierProblem {
    Empty,
    /// Names start with a letter or underscore.
    BadStart(char),
    /// Only letters, digits, `_`, `.` and `:` may follow.
    BadChar(char),
}

/// A machine, state or event name that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("{what} name {text:?} rejected: {problem:?}")]
pub struct IdentifierError {
    /// Which kind of name was being built.
    pub what: &'static str,
    /// The rejected text.
    pub text: String,
    pub problem: IdentifierProblem,
}

fn check_name(what: &'static str, text: &str) -> Result<(), IdentifierError> {
    let problem = match text.chars().next() {
        None => Some(IdentifierProblem::Empty),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => Some(IdentifierProblem::BadStart(c)),
        Some(_) => text
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':')))
            .map(IdentifierProblem::BadChar),
    };
    problem.map_or(Ok(()), |problem| {
        Err(IdentifierError {
            what,
            text: text.to_owned(),
            problem,
        })
    })
}

/// Interned, validated names. Cloning shares the text.
macro_rules! name_type {
    ($(#[$doc:meta])* $ty:ident => $what:literal) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $ty(Arc<str>);

        impl $ty {
            /// Check `text` and wrap it.
            ///
            /// # Errors
            ///
            /// [`IdentifierError`] when `text` is not a valid name.
            pub fn new(text: impl Into<String>) -> Result<Self, IdentifierError> {
                let text = text.into();
                check_name($what, &text)?;
                Ok(Self(text.into()))
            }

            /// Wrap a literal. Literals are checked in debug builds only.
            #[must_use]
            pub fn from_static(text: &'static str) -> Self {
                debug_assert!(check_name($what, text).is_ok(), "bad {} name {text:?}", $what);
                Self(text.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&'static str> for $ty {
            fn from(text: &'static str) -> Self {
                Self::from_static(text)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = IdentifierError;

            fn try_from(text: String) -> Result<Self, IdentifierError> {
                Self::new(text)
            }
        }

        impl From<$ty> for String {
            fn from(name: $ty) -> String {
                name.0.as_ref().to_owned()
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<&str> for $ty {
            fn eq(&self, other: &&str) -> bool {
                &*self.0 == *other
            }
        }

        impl PartialEq<$ty> for &str {
            fn eq(&self, other: &$ty) -> bool {
                *self == &*other.0
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(&*self.0, f)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

name_type!(
    /// Name of an event type, used as the key of handler tables.
    EventKind => "event"
);
name_type!(
    /// Name of a declared machine or monitor state.
    StateName => "state"
);
name_type!(
    /// Name of a machine or monitor type.
    MachineName => "machine"
);

macro_rules! define_numeric_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw numeric value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_numeric_id!(
    /// Scheduler-wide identifier of a schedulable operation.
    ///
    /// Identifiers are allocated in creation order, so the same sequence of
    /// scheduling decisions always produces the same identifiers.
    OperationId,
    "op"
);
define_numeric_id!(
    /// Identifier of an actor instance. Shares its number with the actor's operation.
    ActorId,
    "actor#"
);
define_numeric_id!(
    /// Identifier of a spawned task. Shares its number with the task's operation.
    TaskId,
    "task#"
);
define_numeric_id!(
    /// Identifier of a timer. Shares its number with the timer's operation.
    TimerId,
    "timer#"
);
define_numeric_id!(
    /// Causal group identifier propagated across sends and creations.
    GroupId,
    "group#"
);

impl GroupId {
    /// Group used when no causal group has been assigned.
    pub const NONE: Self = Self(0);
}

impl From<ActorId> for OperationId {
    fn from(value: ActorId) -> Self {
        Self(value.0)
    }
}

impl From<TaskId> for OperationId {
    fn from(value: TaskId) -> Self {
        Self(value.0)
    }
}

impl From<TimerId> for OperationId {
    fn from(value: TimerId) -> Self {
        Self(value.0)
    }
}
