//! Binary-heap deadline scheduler.
//!
//! # Responsibilities
//! - Order registered entries by deadline
//! - Hand back due entries when the owning loop ticks
//! - Drop cancelled entries lazily when they reach the top
//!
//! # Design Decisions
//! - Ties broken by registration order so expiry is deterministic
//! - The mutex only exists so one heap can be shared by several connections

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::timers::{Clock, FiredTimer, Scheduler, TimerEntry, TimerHandle};

struct Scheduled {
    deadline: u64,
    seq: u64,
    entry: TimerEntry,
    cancelled: Arc<AtomicBool>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

#[derive(Default)]
struct HeapState {
    entries: BinaryHeap<Reverse<Scheduled>>,
    next_seq: u64,
}

/// Deadline scheduler backed by a min-heap.
pub struct TimeHeap {
    clock: Arc<dyn Clock>,
    state: Mutex<HeapState>,
}

impl TimeHeap {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(HeapState::default()),
        }
    }

    /// Pop every live entry whose deadline is at or before `now`, in deadline order.
    pub fn expire(&self, now: u64) -> Vec<FiredTimer> {
        let mut state = self.state.lock().expect("time heap mutex poisoned");
        let mut fired = Vec::new();

        while let Some(Reverse(top)) = state.entries.peek() {
            if top.deadline > now {
                break;
            }
            let Some(Reverse(due)) = state.entries.pop() else {
                break;
            };
            if due.cancelled.load(Ordering::Acquire) {
                continue;
            }
            fired.push(FiredTimer {
                key: due.entry.key,
                fired_at: now,
            });
        }

        fired
    }

    /// Earliest deadline among live entries.
    pub fn next_deadline(&self) -> Option<u64> {
        let state = self.state.lock().expect("time heap mutex poisoned");
        state
            .entries
            .iter()
            .filter(|Reverse(s)| !s.cancelled.load(Ordering::Acquire))
            .map(|Reverse(s)| s.deadline)
            .min()
    }

    /// Number of scheduled entries that have not been cancelled.
    pub fn len(&self) -> usize {
        let state = self.state.lock().expect("time heap mutex poisoned");
        state
            .entries
            .iter()
            .filter(|Reverse(s)| !s.cancelled.load(Ordering::Acquire))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Scheduler for TimeHeap {
    fn update(&self, entry: TimerEntry, deadline: Option<u64>) -> TimerHandle {
        let deadline =
            deadline.unwrap_or_else(|| self.clock.now().saturating_add(entry.timeout_ms));
        let cancelled = Arc::new(AtomicBool::new(false));

        let mut state = self.state.lock().expect("time heap mutex poisoned");
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(Reverse(Scheduled {
            deadline,
            seq,
            entry,
            cancelled: Arc::clone(&cancelled),
        }));

        TimerHandle::new(cancelled)
    }
}

impl std::fmt::Debug for TimeHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeHeap")
            .field("live_entries", &self.len())
            .finish()
    }
}
