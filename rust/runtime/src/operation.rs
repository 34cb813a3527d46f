//! Schedulable operations and their status.

use std::fmt;

use serde::{Deserialize, Serialize};
use tangle_types::{GroupId, OperationId};

use crate::task::TaskWait;

/// What an operation drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// An actor's event handler.
    Actor,
    /// A task.
    Task,
    /// A timer.
    Timer,
}

/// Scheduling status of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// May be picked by the strategy.
    Enabled,
    /// Waiting on another operation.
    BlockedOnResource(TaskWait),
    /// Waiting for an event matching a receive filter.
    BlockedOnReceive(String),
    /// Nothing to do; an actor is re-enabled when an event arrives.
    Completed,
}

impl OperationStatus {
    /// Whether the strategy may pick this operation.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }

    /// Whether the operation is waiting on something.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::BlockedOnResource(_) | Self::BlockedOnReceive(_))
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => f.write_str("enabled"),
            Self::BlockedOnResource(wait) => write!(f, "blocked {wait}"),
            Self::BlockedOnReceive(filter) => write!(f, "blocked waiting to receive {filter}"),
            Self::Completed => f.write_str("completed"),
        }
    }
}

/// Scheduler-side record of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Identifier, shared with the actor/task/timer it drives.
    pub id: OperationId,
    /// Kind.
    pub kind: OperationKind,
    /// Current status.
    pub status: OperationStatus,
    /// Causal group at creation.
    pub group: GroupId,
    /// Human-readable label (machine name, task name, timer owner).
    pub label: String,
    /// Step at which the operation was created.
    pub created_at: u64,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) {}", self.id, self.label, self.status)
    }
}
