//! Per-connection request ledger.
//!
//! # Data Flow
//! ```text
//! Connection creates a request
//!     → add_out_req / add_in_req (slot becomes Active, timeout scheduled)
//!     → get_out_req / get_in_req when a matching frame arrives
//!     → pop_in_req  (slot removed)
//!     → pop_out_req (slot replaced by a tombstone, tombstone expiry scheduled)
//!     → expire_tombstone (slot removed if the tombstone is still the occupant)
//!
//! Periodic:
//!     → check_last_timeout_time on every observed timeout (stale.rs)
//!     → sanity_sweep reclaims timed-out leftovers (sweep.rs)
//! ```
//!
//! # Design Decisions
//! - Single-threaded: no internal locking, the owning task serializes all calls
//! - Tombstoned ids look exactly like absent ids to lookups
//! - Expected network anomalies are logged, never returned as errors
//! - Registering a colliding id overwrites the old slot and still counts it

pub mod context;
pub mod error;
pub mod request;
pub mod slot;
pub mod stale;
pub mod sweep;
pub mod tombstone;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::net::connection::ConnectionInfo;
use crate::observability::metrics;
use crate::timers::{Clock, Scheduler, TimerEntry, TimerKey, TimerToken};

pub use context::{Arg1, ErrorContext, PopContext, ResponseContext};
pub use error::LedgerError;
pub use request::{Direction, Request, RequestId};
pub use slot::Slot;
pub use stale::{StaleEvent, StaleNotifier, StaleState};
pub use sweep::SweepReport;
pub use tombstone::{OperationTombstone, TOMBSTONE_TTL_OFFSET_MS};

/// Both id→slot mappings of a connection.
#[derive(Debug, Default)]
pub struct Requests {
    pub inbound: HashMap<RequestId, Slot>,
    pub outbound: HashMap<RequestId, Slot>,
}

impl Requests {
    pub fn get(&self, direction: Direction) -> &HashMap<RequestId, Slot> {
        match direction {
            Direction::In => &self.inbound,
            Direction::Out => &self.outbound,
        }
    }

    fn get_mut(&mut self, direction: Direction) -> &mut HashMap<RequestId, Slot> {
        match direction {
            Direction::In => &mut self.inbound,
            Direction::Out => &mut self.outbound,
        }
    }
}

/// Advisory in-flight counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Pending {
    #[serde(rename = "in")]
    pub inbound: usize,
    #[serde(rename = "out")]
    pub outbound: usize,
}

impl Pending {
    fn get_mut(&mut self, direction: Direction) -> &mut usize {
        match direction {
            Direction::In => &mut self.inbound,
            Direction::Out => &mut self.outbound,
        }
    }
}

/// Point-in-time view of a ledger, for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub pending: Pending,
    pub inbound_active: usize,
    pub outbound_active: usize,
    pub tombstones: usize,
    pub last_timeout_time: Option<u64>,
    pub destroyed: bool,
}

/// Collaborators a ledger needs.
#[derive(Clone)]
pub struct LedgerOptions {
    pub clock: Arc<dyn Clock>,
    pub scheduler: Arc<dyn Scheduler>,
    pub notifier: Arc<dyn StaleNotifier>,
    /// Grace period after the first observed timeout before the connection counts as stale.
    pub connection_stale_period_ms: u64,
}

/// Tracks in-flight requests of one connection.
pub struct OperationsLedger {
    connection: ConnectionInfo,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    notifier: Arc<dyn StaleNotifier>,
    connection_stale_period_ms: u64,

    requests: Requests,
    pending: Pending,
    stale: StaleState,
    destroyed: bool,
    next_token: u64,
}

impl OperationsLedger {
    pub fn new(connection: ConnectionInfo, options: LedgerOptions) -> Self {
        Self {
            connection,
            clock: options.clock,
            scheduler: options.scheduler,
            notifier: options.notifier,
            connection_stale_period_ms: options.connection_stale_period_ms,
            requests: Requests::default(),
            pending: Pending::default(),
            stale: StaleState::default(),
            destroyed: false,
            next_token: 1,
        }
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    pub fn get_requests(&self) -> &Requests {
        &self.requests
    }

    pub fn get_pending(&self) -> Pending {
        self.pending
    }

    pub fn stale_state(&self) -> StaleState {
        self.stale
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn next_token(&mut self) -> TimerToken {
        let token = TimerToken::new(self.next_token);
        self.next_token += 1;
        token
    }

    // --- Registration ---

    /// Register a request we sent to the peer.
    pub fn add_out_req(&mut self, req: Request) -> &mut Request {
        self.add_req(Direction::Out, req)
    }

    /// Register a request the peer sent to us.
    pub fn add_in_req(&mut self, req: Request) -> &mut Request {
        self.add_req(Direction::In, req)
    }

    fn add_req(&mut self, direction: Direction, mut req: Request) -> &mut Request {
        let id = req.id();
        let token = self.next_token();

        req.owner = Some(self.connection.id);
        req.token = Some(token);
        req.timer = Some(self.scheduler.update(
            TimerEntry {
                key: TimerKey::Request {
                    direction,
                    id,
                    token,
                },
                timeout_ms: req.timeout_ms(),
            },
            None,
        ));

        *self.pending.get_mut(direction) += 1;
        metrics::increment_pending(direction);

        let connection_id = self.connection.id;
        let slot = match self.requests.get_mut(direction).entry(id) {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(Slot::Active(req));
                tracing::debug!(
                    connection_id = %connection_id,
                    direction = %direction,
                    id = %id,
                    replaced_active = previous.is_active(),
                    "Registration overwrote an existing slot"
                );
                occupied.into_mut()
            }
            Entry::Vacant(vacant) => vacant.insert(Slot::Active(req)),
        };

        match slot {
            Slot::Active(stored) => stored,
            _ => unreachable!("slot was just filled with an active request"),
        }
    }

    // --- Lookup ---

    /// Live outbound request at `id`. Tombstoned ids return `None`.
    pub fn get_out_req(&self, id: RequestId) -> Option<&Request> {
        self.requests.outbound.get(&id).and_then(Slot::active)
    }

    pub fn get_out_req_mut(&mut self, id: RequestId) -> Option<&mut Request> {
        self.requests.outbound.get_mut(&id).and_then(Slot::active_mut)
    }

    pub fn get_in_req(&self, id: RequestId) -> Option<&Request> {
        self.requests.inbound.get(&id).and_then(Slot::active)
    }

    pub fn get_in_req_mut(&mut self, id: RequestId) -> Option<&mut Request> {
        self.requests.inbound.get_mut(&id).and_then(Slot::active_mut)
    }

    /// Flag a live request as timed out. Returns false if nothing live is at `id`.
    pub fn mark_timed_out(&mut self, direction: Direction, id: RequestId) -> bool {
        let req = match direction {
            Direction::In => self.get_in_req_mut(id),
            Direction::Out => self.get_out_req_mut(id),
        };
        match req {
            Some(req) => {
                req.timed_out = true;
                true
            }
            None => false,
        }
    }

    // --- Finalization ---

    /// Finalize an outbound request, leaving a tombstone in its slot.
    ///
    /// Unknown ids are logged with `context` and yield `None`; an id that is
    /// already tombstoned yields `None` silently.
    pub fn pop_out_req(&mut self, id: RequestId, context: PopContext) -> Option<Request> {
        let timeout_ms = match self.requests.outbound.get(&id) {
            None | Some(Slot::Empty) => {
                self.log_missing_out_request(id, &context);
                return None;
            }
            Some(Slot::Tombstone(_)) => return None,
            Some(Slot::Active(req)) => req.timeout_ms(),
        };

        let now = self.clock.now();
        let token = self.next_token();
        let tombstone = OperationTombstone::new(id, now, timeout_ms, token);
        let expires_at = tombstone.expires_at();
        let ttl_ms = tombstone.ttl_ms;

        let Some(Slot::Active(mut req)) = self
            .requests
            .outbound
            .insert(id, Slot::Tombstone(tombstone))
        else {
            return None;
        };

        req.detach();
        self.release_pending(Direction::Out);

        // The handle is not kept: a tombstone is never cancelled, only superseded.
        let _ = self.scheduler.update(
            TimerEntry {
                key: TimerKey::Tombstone { id, token },
                timeout_ms: ttl_ms,
            },
            Some(expires_at),
        );
        metrics::record_tombstone_created();

        Some(req)
    }

    /// Finalize an inbound request, emptying its slot.
    pub fn pop_in_req(&mut self, id: RequestId) -> Option<Request> {
        if !matches!(self.requests.inbound.get(&id), Some(Slot::Active(_))) {
            return None;
        }
        let Some(Slot::Active(mut req)) = self.requests.inbound.remove(&id) else {
            return None;
        };

        req.detach();
        self.release_pending(Direction::In);

        Some(req)
    }

    /// Saturating decrement; the gauge only moves if the counter did.
    fn release_pending(&mut self, direction: Direction) {
        let pending = self.pending.get_mut(direction);
        if *pending > 0 {
            *pending -= 1;
            metrics::decrement_pending(direction, 1);
        }
    }

    /// Scheduler fire for a tombstone. Removes the slot only if this exact
    /// tombstone still occupies it.
    pub fn expire_tombstone(&mut self, id: RequestId, token: TimerToken) -> bool {
        let still_occupant = matches!(
            self.requests.outbound.get(&id),
            Some(Slot::Tombstone(t)) if t.token == token
        );
        if still_occupant {
            self.requests.outbound.remove(&id);
            metrics::record_tombstone_expired();
        }
        still_occupant
    }

    fn log_missing_out_request(&self, id: RequestId, context: &PopContext) {
        metrics::record_unknown_id(context.kind());

        // Usually a duplicate or very late frame; repeated hits suggest a confused peer.
        match context {
            PopContext::Error(err) => tracing::info!(
                connection_id = %self.connection.id,
                remote_addr = %self.connection.remote_addr,
                direction = %self.connection.direction,
                id = %id,
                info = context.info().unwrap_or_default(),
                original_id = %err.original_id,
                error_code = err.code,
                error_message = %err.message,
                "popOutReq received for unknown or lost id"
            ),
            PopContext::Response(res) => tracing::info!(
                connection_id = %self.connection.id,
                remote_addr = %self.connection.remote_addr,
                direction = %self.connection.direction,
                id = %id,
                info = context.info().unwrap_or_default(),
                response_id = %res.id,
                code = res.code,
                arg1 = %res.arg1.describe(),
                "popOutReq received for unknown or lost id"
            ),
            PopContext::None => tracing::info!(
                connection_id = %self.connection.id,
                remote_addr = %self.connection.remote_addr,
                direction = %self.connection.direction,
                id = %id,
                "popOutReq received for unknown or lost id"
            ),
        }
    }

    // --- Connection health ---

    /// Feed one observed timeout into the stale-connection heuristic.
    ///
    /// Returns true when the owning connection was notified.
    pub fn check_last_timeout_time(&mut self, now: u64) -> bool {
        let Some(error) = self.stale.observe(now, self.connection_stale_period_ms) else {
            return false;
        };

        tracing::warn!(
            connection_id = %self.connection.id,
            remote_addr = %self.connection.remote_addr,
            direction = %self.connection.direction,
            error = %error,
            "Connection stale"
        );
        metrics::record_stale_notification();
        self.notifier.notify_stale(&self.connection, error);
        true
    }

    // --- Teardown ---

    /// Zero both counters. Mappings are left as they are.
    pub fn clear(&mut self) {
        let dropped = std::mem::take(&mut self.pending);
        metrics::decrement_pending(Direction::In, dropped.inbound);
        metrics::decrement_pending(Direction::Out, dropped.outbound);
    }

    /// Mark the ledger destroyed. Timers and mappings are the caller's to tear down.
    pub fn destroy(&mut self) {
        self.destroyed = true;
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let tombstones = self
            .requests
            .outbound
            .values()
            .filter(|slot| slot.tombstone().is_some())
            .count();
        LedgerSnapshot {
            pending: self.pending,
            inbound_active: self.requests.inbound.values().filter(|s| s.is_active()).count(),
            outbound_active: self.requests.outbound.values().filter(|s| s.is_active()).count(),
            tombstones,
            last_timeout_time: self.stale.last_timeout_time(),
            destroyed: self.destroyed,
        }
    }
}

impl std::fmt::Debug for OperationsLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationsLedger")
            .field("connection", &self.connection)
            .field("pending", &self.pending)
            .field("stale", &self.stale)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
