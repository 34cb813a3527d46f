//! Lasso detection for liveness checking.
//!
//! After every scheduling step the runtime records the program-state
//! fingerprint together with what was enabled, what ran, which monitors
//! were hot and which fair choices were made. When a fingerprint repeats,
//! the steps in between form a cycle the program can repeat forever. Such a
//! cycle is a liveness violation only if some monitor stayed hot on every
//! step of it and the cycle is fair: every operation enabled in it was also
//! scheduled in it, and every fair choice made in it went both ways.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tangle_types::{MachineName, OperationId};

use crate::fingerprint::Fingerprint;

/// What happened at one scheduling step.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// Program state after the step.
    pub fingerprint: Fingerprint,
    /// Operation that ran.
    pub scheduled: OperationId,
    /// Operations that were enabled when the choice was made.
    pub enabled: Vec<OperationId>,
    /// Monitors in a hot state after the step.
    pub hot_monitors: BTreeSet<MachineName>,
    /// Fair choices made during the step, keyed by call site.
    pub fair_choices: Vec<(String, bool)>,
}

/// A fair cycle during which a monitor never cooled down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessCycle {
    /// Monitor that stayed hot.
    pub monitor: MachineName,
    /// Index of the first step of the cycle.
    pub start: usize,
    /// Number of steps in the cycle.
    pub length: usize,
}

/// Earlier occurrences of a fingerprint tried as cycle starts, newest first.
const CANDIDATES: usize = 4;

/// Fingerprint history of one iteration.
#[derive(Debug, Default)]
pub struct CycleDetector {
    history: Vec<StepRecord>,
    seen: HashMap<Fingerprint, Vec<usize>>,
    /// First step of the current uninterrupted hot stretch of each monitor.
    hot_since: BTreeMap<MachineName, usize>,
}

impl CycleDetector {
    /// Empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Record a step and report a violating cycle that it closes.
    pub fn record(&mut self, record: StepRecord) -> Option<LivenessCycle> {
        let index = self.history.len();
        self.hot_since
            .retain(|monitor, _| record.hot_monitors.contains(monitor));
        for monitor in &record.hot_monitors {
            self.hot_since.entry(monitor.clone()).or_insert(index);
        }
        let fingerprint = record.fingerprint;
        self.history.push(record);

        let earlier = self.seen.entry(fingerprint).or_default();
        let candidates: Vec<usize> = earlier.iter().rev().copied().collect();
        earlier.push(index);
        if earlier.len() > CANDIDATES {
            earlier.remove(0);
        }
        if self.hot_since.is_empty() {
            return None;
        }

        candidates
            .into_iter()
            .find_map(|previous| self.check(previous + 1, index))
    }

    fn check(&self, start: usize, end: usize) -> Option<LivenessCycle> {
        let monitor = self
            .hot_since
            .iter()
            .find(|(_, since)| **since <= start)
            .map(|(monitor, _)| monitor.clone())?;
        let cycle = &self.history[start..=end];

        let scheduled: BTreeSet<OperationId> = cycle.iter().map(|s| s.scheduled).collect();
        let starved = cycle
            .iter()
            .flat_map(|s| s.enabled.iter())
            .any(|op| !scheduled.contains(op));
        if starved {
            return None;
        }

        let mut choices: BTreeMap<&str, (bool, bool)> = BTreeMap::new();
        for (site, value) in cycle.iter().flat_map(|s| s.fair_choices.iter()) {
            let entry = choices.entry(site.as_str()).or_default();
            if *value {
                entry.1 = true;
            } else {
                entry.0 = true;
            }
        }
        if choices.values().any(|(f, t)| !(*f && *t)) {
            return None;
        }

        Some(LivenessCycle {
            monitor,
            start,
            length: end + 1 - start,
        })
    }
}
