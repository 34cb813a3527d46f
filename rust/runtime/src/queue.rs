//! Per-actor event queue.
//!
//! Holds pending events in FIFO order, a single raised event that takes
//! precedence over the queue, and at most one pending receive. Deferred
//! events are skipped in place and ignored events are dropped when the
//! dequeue scan reaches them.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use tangle_types::{Event, EventInfo, EventKind, TimerId};

/// An event together with its delivery metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    /// The event.
    pub event: Event,
    /// Sender, group and send step.
    pub info: EventInfo,
    /// Timer that produced this event, if any.
    pub(crate) timer: Option<TimerId>,
}

impl QueuedEvent {
    /// Wrap an event with its metadata.
    #[must_use]
    pub fn new(event: Event, info: EventInfo) -> Self {
        Self {
            event,
            info,
            timer: None,
        }
    }

    pub(crate) fn from_timer(event: Event, info: EventInfo, timer: TimerId) -> Self {
        Self {
            event,
            info,
            timer: Some(timer),
        }
    }
}

/// Predicate over events used by receive filters.
pub type EventPredicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Selects which event completes a pending receive.
#[derive(Clone)]
pub enum ReceiveFilter {
    /// Any event whose kind is in the set.
    Kinds(BTreeSet<EventKind>),
    /// An event of `kind` for which `predicate` holds.
    Predicate {
        /// Required kind.
        kind: EventKind,
        /// Additional payload check.
        predicate: EventPredicate,
    },
}

impl ReceiveFilter {
    /// Match a single kind.
    #[must_use]
    pub fn kind(kind: impl Into<EventKind>) -> Self {
        Self::Kinds(BTreeSet::from([kind.into()]))
    }

    /// Match any of several kinds.
    #[must_use]
    pub fn kinds<I, K>(kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<EventKind>,
    {
        Self::Kinds(kinds.into_iter().map(Into::into).collect())
    }

    /// Match a kind with a payload predicate.
    #[must_use]
    pub fn predicate<F>(kind: impl Into<EventKind>, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self::Predicate {
            kind: kind.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Whether `event` satisfies this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::Kinds(kinds) => kinds.contains(&event.kind),
            Self::Predicate { kind, predicate } => event.kind == *kind && predicate(event),
        }
    }
}

impl fmt::Debug for ReceiveFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kinds(kinds) => f.debug_tuple("Kinds").field(kinds).finish(),
            Self::Predicate { kind, .. } => f
                .debug_struct("Predicate")
                .field("kind", kind)
                .finish_non_exhaustive(),
        }
    }
}

impl fmt::Display for ReceiveFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kinds(kinds) => {
                let names: Vec<&str> = kinds.iter().map(EventKind::as_str).collect();
                write!(f, "{}", names.join(" | "))
            }
            Self::Predicate { kind, .. } => write!(f, "{kind} if <predicate>"),
        }
    }
}

/// How the current state treats an event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Dequeue and run a handler (or fail as unhandled).
    Handle,
    /// Drop on dequeue.
    Ignore,
    /// Leave in the queue and keep scanning.
    Defer,
}

/// Result of enqueueing an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueStatus {
    /// The owner is already processing; nothing to restart.
    EventHandlerRunning,
    /// The owner was idle; its operation must be re-enabled.
    EventHandlerNotRunning,
    /// The event completed a pending receive directly.
    Received,
    /// The owner has halted and the event was discarded.
    Dropped,
}

/// Result of a dequeue attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DequeueStatus {
    /// A queued event was selected.
    Success(QueuedEvent),
    /// The raised event was selected.
    Raised(QueuedEvent),
    /// Nothing dequeueable; the state has a default handler.
    Default,
    /// Nothing dequeueable and no default handler.
    NotAvailable,
}

/// Result of starting a receive.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveStatus {
    /// A matching event was already queued and has been removed.
    ReceivedWithoutWaiting(QueuedEvent),
    /// The owner must wait until a matching event is enqueued.
    Waiting,
}

/// FIFO mailbox of one actor.
#[derive(Debug, Default)]
pub struct EventQueue {
    items: VecDeque<QueuedEvent>,
    raised: Option<QueuedEvent>,
    pending_receive: Option<ReceiveFilter>,
    received: Option<QueuedEvent>,
    handler_running: bool,
    closed: bool,
    ignored: Vec<QueuedEvent>,
}

impl EventQueue {
    /// Empty open queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, or hand it to a matching pending receive.
    pub fn enqueue(&mut self, item: QueuedEvent) -> EnqueueStatus {
        if self.closed {
            return EnqueueStatus::Dropped;
        }
        if self.received.is_none()
            && self
                .pending_receive
                .as_ref()
                .is_some_and(|filter| filter.matches(&item.event))
        {
            self.pending_receive = None;
            self.received = Some(item);
            return EnqueueStatus::Received;
        }
        self.items.push_back(item);
        if self.handler_running {
            EnqueueStatus::EventHandlerRunning
        } else {
            self.handler_running = true;
            EnqueueStatus::EventHandlerNotRunning
        }
    }

    /// Select the next event to handle.
    ///
    /// A raised event always wins. Otherwise the queue is scanned from the
    /// front: ignored events are dropped, deferred events are skipped and
    /// the first handled event is removed. Without such an event the
    /// default handler fires if the state has one.
    pub fn dequeue<F>(&mut self, classify: F, has_default: bool) -> DequeueStatus
    where
        F: Fn(&Event) -> Disposition,
    {
        if let Some(raised) = self.raised.take() {
            return DequeueStatus::Raised(raised);
        }
        let mut idx = 0;
        while idx < self.items.len() {
            match classify(&self.items[idx].event) {
                Disposition::Defer => idx += 1,
                Disposition::Ignore => {
                    if let Some(item) = self.items.remove(idx) {
                        self.ignored.push(item);
                    }
                }
                Disposition::Handle => {
                    if let Some(item) = self.items.remove(idx) {
                        return DequeueStatus::Success(item);
                    }
                }
            }
        }
        if has_default {
            return DequeueStatus::Default;
        }
        self.handler_running = false;
        DequeueStatus::NotAvailable
    }

    /// Inject an event ahead of everything queued.
    pub fn raise(&mut self, item: QueuedEvent) {
        debug_assert!(self.raised.is_none(), "raised event overwritten");
        self.raised = Some(item);
    }

    /// Begin a receive. A queued match (deferred or not) is taken immediately.
    pub fn receive(&mut self, filter: ReceiveFilter) -> ReceiveStatus {
        if let Some(pos) = self.items.iter().position(|i| filter.matches(&i.event)) {
            if let Some(item) = self.items.remove(pos) {
                return ReceiveStatus::ReceivedWithoutWaiting(item);
            }
        }
        self.pending_receive = Some(filter);
        ReceiveStatus::Waiting
    }

    /// Take the event that completed a pending receive.
    pub fn take_received(&mut self) -> Option<QueuedEvent> {
        self.received.take()
    }

    /// Events dropped as ignored since the last call.
    pub fn take_ignored(&mut self) -> Vec<QueuedEvent> {
        std::mem::take(&mut self.ignored)
    }

    /// Close the queue and return every undelivered event.
    pub fn close(&mut self) -> Vec<QueuedEvent> {
        self.closed = true;
        self.handler_running = false;
        self.pending_receive = None;
        let mut dropped: Vec<QueuedEvent> = self.raised.take().into_iter().collect();
        dropped.extend(self.received.take());
        dropped.extend(self.items.drain(..));
        dropped
    }

    /// Whether a receive is outstanding and unmatched.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.pending_receive.is_some() && self.received.is_none()
    }

    /// Filter of the outstanding receive.
    #[must_use]
    pub fn pending_receive(&self) -> Option<&ReceiveFilter> {
        self.pending_receive.as_ref()
    }

    /// Whether a raised event is pending.
    #[must_use]
    pub fn has_raised(&self) -> bool {
        self.raised.is_some()
    }

    /// Whether a receive has been satisfied but not yet resumed.
    #[must_use]
    pub fn has_received(&self) -> bool {
        self.received.is_some()
    }

    /// Whether some queued event would be handled under `classify`.
    #[must_use]
    pub fn has_dequeueable<F>(&self, classify: F) -> bool
    where
        F: Fn(&Event) -> Disposition,
    {
        self.raised.is_some()
            || self
                .items
                .iter()
                .any(|item| classify(&item.event) == Disposition::Handle)
    }

    /// Whether an event from `timer` is still queued.
    #[must_use]
    pub fn holds_timer_event(&self, timer: TimerId) -> bool {
        self.items.iter().any(|item| item.timer == Some(timer))
    }

    /// Whether the owner is processing events.
    #[must_use]
    pub fn is_handler_running(&self) -> bool {
        self.handler_running
    }

    /// Whether the owner halted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of queued events, excluding raised and received ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Queued events in FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedEvent> {
        self.items.iter()
    }
}
