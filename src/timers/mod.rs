//! Timer subsystem.
//!
//! # Data Flow
//! ```text
//! Ledger registers a request or tombstone
//!     → Scheduler::update (deadline = now + timeout, or explicit override)
//!     → TimerHandle stored on the request
//!
//! Driver tick:
//!     → TimeHeap::expire(now)
//!     → FiredTimer { key, fired_at } routed back to the owning connection
//! ```
//!
//! # Design Decisions
//! - Scheduler is a trait; the ledger never sees the heap directly
//! - Fire "callbacks" are typed keys, delivered on the owning task
//! - Cancellation is a shared flag, idempotent, and always wins over a later tick

pub mod clock;
pub mod heap;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::ledger::request::{Direction, RequestId};

pub use clock::{Clock, ManualClock, SystemClock};
pub use heap::TimeHeap;

/// Identity of a single registration in the ledger.
///
/// Two registrations for the same id never share a token, so a fired timer
/// can tell whether the slot it was scheduled for has since been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

impl TimerToken {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TimerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tok-{}", self.0)
    }
}

/// What a timer refers to when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKey {
    /// A live request's timeout.
    Request {
        direction: Direction,
        id: RequestId,
        token: TimerToken,
    },
    /// A tombstone's grace period ending.
    Tombstone { id: RequestId, token: TimerToken },
}

/// An entry handed to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEntry {
    pub key: TimerKey,
    /// Duration used for the default deadline (`now + timeout_ms`).
    pub timeout_ms: u64,
}

/// A timer that reached its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTimer {
    pub key: TimerKey,
    pub fired_at: u64,
}

/// Deadline-ordered scheduler contract.
pub trait Scheduler: Send + Sync {
    /// Register an entry. The deadline defaults to `now + entry.timeout_ms`.
    fn update(&self, entry: TimerEntry, deadline: Option<u64>) -> TimerHandle;
}

/// Cancelable handle to a scheduled entry.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub(crate) fn new(cancelled: Arc<AtomicBool>) -> Self {
        Self { cancelled }
    }

    /// Cancel the entry. Safe to call more than once.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
