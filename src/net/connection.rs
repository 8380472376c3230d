//! Connection identity and request routing.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Carry diagnostic metadata (remote address, who dialed whom)
//! - Turn frames and fired timers into ledger operations

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::ledger::{
    Direction, ErrorContext, LedgerOptions, OperationsLedger, PopContext, Request, RequestId,
    ResponseContext, SweepReport,
};
use crate::observability::metrics;
use crate::timers::{FiredTimer, TimerKey};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which side opened the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionDirection {
    /// Accepted from a remote peer.
    Inbound,
    /// Dialed by us.
    Outbound,
}

impl fmt::Display for ConnectionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionDirection::Inbound => f.write_str("in"),
            ConnectionDirection::Outbound => f.write_str("out"),
        }
    }
}

/// Diagnostic metadata attached to every ledger log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote_addr: String,
    pub direction: ConnectionDirection,
}

impl ConnectionInfo {
    pub fn new(remote_addr: impl Into<String>, direction: ConnectionDirection) -> Self {
        Self {
            id: ConnectionId::new(),
            remote_addr: remote_addr.into(),
            direction,
        }
    }
}

/// What a fired timer did to the ledger.
#[derive(Debug)]
pub enum TimerOutcome {
    /// An outbound request timed out and was retired.
    OutboundTimedOut { request: Option<Request>, stale: bool },
    /// An inbound request was flagged; the handler still owns finalizing it.
    InboundTimedOut { id: RequestId },
    TombstoneExpired { id: RequestId },
    /// The request timer belonged to a registration that no longer occupies its slot.
    RequestSuperseded { direction: Direction, id: RequestId },
    /// The tombstone was already replaced or removed; nothing changed.
    TombstoneSuperseded { id: RequestId },
}

/// The owning side of a ledger: one per socket.
#[derive(Debug)]
pub struct Connection {
    ledger: OperationsLedger,
}

impl Connection {
    pub fn new(info: ConnectionInfo, options: LedgerOptions) -> Self {
        Self {
            ledger: OperationsLedger::new(info, options),
        }
    }

    pub fn info(&self) -> &ConnectionInfo {
        self.ledger.connection()
    }

    pub fn ledger(&self) -> &OperationsLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut OperationsLedger {
        &mut self.ledger
    }

    /// Track a call we are about to write to the socket.
    pub fn send_request(&mut self, req: Request) -> RequestId {
        self.ledger.add_out_req(req).id()
    }

    /// Track a call frame read from the socket.
    pub fn accept_request(&mut self, req: Request) -> RequestId {
        self.ledger.add_in_req(req).id()
    }

    /// A call response arrived. Returns the request it completes, if still live.
    pub fn handle_response(&mut self, response: ResponseContext) -> Option<Request> {
        let id = response.id;
        self.ledger.pop_out_req(id, PopContext::Response(response))
    }

    /// An error frame arrived for one of our calls.
    pub fn handle_error_frame(&mut self, error: ErrorContext) -> Option<Request> {
        let id = error.original_id;
        self.ledger.pop_out_req(id, PopContext::Error(error))
    }

    /// Our handler finished (or gave up on) an inbound call.
    pub fn complete_inbound(&mut self, id: RequestId) -> Option<Request> {
        self.ledger.pop_in_req(id)
    }

    pub fn sanity_sweep(&mut self) -> SweepReport {
        self.ledger.sanity_sweep()
    }

    /// Deliver a fired timer to the ledger.
    pub fn on_timer(&mut self, fired: FiredTimer) -> TimerOutcome {
        match fired.key {
            TimerKey::Tombstone { id, token } => {
                if self.ledger.expire_tombstone(id, token) {
                    TimerOutcome::TombstoneExpired { id }
                } else {
                    TimerOutcome::TombstoneSuperseded { id }
                }
            }
            TimerKey::Request {
                direction,
                id,
                token,
            } => {
                let current = match direction {
                    Direction::In => self.ledger.get_in_req(id),
                    Direction::Out => self.ledger.get_out_req(id),
                }
                .and_then(Request::token);

                if current != Some(token) {
                    tracing::debug!(
                        connection_id = %self.info().id,
                        direction = %direction,
                        id = %id,
                        token = %token,
                        "Timer for superseded registration ignored"
                    );
                    return TimerOutcome::RequestSuperseded { direction, id };
                }

                self.ledger.mark_timed_out(direction, id);
                metrics::record_request_timeout(direction);
                tracing::info!(
                    connection_id = %self.info().id,
                    remote_addr = %self.info().remote_addr,
                    direction = %direction,
                    id = %id,
                    fired_at = fired.fired_at,
                    "Request timed out"
                );

                match direction {
                    Direction::Out => {
                        let stale = self.ledger.check_last_timeout_time(fired.fired_at);
                        let request = self.ledger.pop_out_req(id, PopContext::None);
                        TimerOutcome::OutboundTimedOut { request, stale }
                    }
                    Direction::In => TimerOutcome::InboundTimedOut { id },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Arg1, StaleEvent};
    use crate::timers::{ManualClock, TimeHeap};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn connection(
        stale_period_ms: u64,
    ) -> (
        Connection,
        ManualClock,
        Arc<TimeHeap>,
        mpsc::UnboundedReceiver<StaleEvent>,
    ) {
        let clock = ManualClock::new(0);
        let heap = Arc::new(TimeHeap::new(Arc::new(clock.clone())));
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(
            ConnectionInfo::new("10.0.0.7:21300", ConnectionDirection::Outbound),
            LedgerOptions {
                clock: Arc::new(clock.clone()),
                scheduler: heap.clone(),
                notifier: Arc::new(tx),
                connection_stale_period_ms: stale_period_ms,
            },
        );
        (conn, clock, heap, rx)
    }

    fn fire(
        conn: &mut Connection,
        clock: &ManualClock,
        heap: &TimeHeap,
        now: u64,
    ) -> Vec<TimerOutcome> {
        clock.set(now);
        heap.expire(now)
            .into_iter()
            .map(|fired| conn.on_timer(fired))
            .collect()
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[test]
    fn response_completes_outbound_request() {
        let (mut conn, _clock, _heap, _rx) = connection(1_500);
        conn.send_request(Request::new(RequestId::from(1), 500));

        let done = conn.handle_response(ResponseContext {
            id: RequestId::from(1),
            code: 0,
            arg1: Arg1::Buffered(b"echo".to_vec()),
        });
        assert!(done.is_some());

        // Duplicate delivery is absorbed by the tombstone.
        let dup = conn.handle_response(ResponseContext {
            id: RequestId::from(1),
            code: 0,
            arg1: Arg1::Streamed,
        });
        assert!(dup.is_none());
    }

    #[test]
    fn outbound_timeout_retires_request_and_arms_stale_check() {
        let (mut conn, clock, heap, mut rx) = connection(1_500);
        conn.send_request(Request::new(RequestId::from(1), 100));

        let outcomes = fire(&mut conn, &clock, &heap, 100);
        assert!(matches!(
            outcomes.as_slice(),
            [TimerOutcome::OutboundTimedOut { request: Some(req), stale: false }] if req.timed_out
        ));
        assert_eq!(conn.ledger().get_pending().outbound, 0);
        assert!(conn.ledger().get_requests().outbound[&RequestId::from(1)]
            .tombstone()
            .is_some());

        // A second timeout well past the stale period notifies the owner.
        conn.send_request(Request::new(RequestId::from(2), 2_000));
        let outcomes = fire(&mut conn, &clock, &heap, 2_100);
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, TimerOutcome::OutboundTimedOut { stale: true, .. })));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn inbound_timeout_only_flags_request() {
        let (mut conn, clock, heap, _rx) = connection(1_500);
        conn.accept_request(Request::new(RequestId::from(3), 50));

        let outcomes = fire(&mut conn, &clock, &heap, 60);
        assert!(matches!(outcomes.as_slice(), [TimerOutcome::InboundTimedOut { .. }]));
        assert!(conn.ledger().get_in_req(RequestId::from(3)).unwrap().timed_out);

        let report = conn.sanity_sweep();
        assert_eq!(report.reclaimed_in, 1);
        assert!(conn.complete_inbound(RequestId::from(3)).is_none());
    }

    #[test]
    fn timer_of_overwritten_registration_is_ignored() {
        let (mut conn, clock, heap, _rx) = connection(1_500);
        conn.send_request(Request::new(RequestId::from(4), 100));
        conn.send_request(Request::new(RequestId::from(4), 5_000));

        let outcomes = fire(&mut conn, &clock, &heap, 150);
        assert!(matches!(
            outcomes.as_slice(),
            [TimerOutcome::RequestSuperseded { direction: Direction::Out, id }]
                if *id == RequestId::from(4)
        ));
        assert!(!conn.ledger().get_out_req(RequestId::from(4)).unwrap().timed_out);
    }

    #[test]
    fn tombstone_timer_after_id_reuse_is_reported_apart() {
        let (mut conn, clock, heap, _rx) = connection(1_500);
        conn.send_request(Request::new(RequestId::from(5), 100));
        assert!(conn.ledger_mut().pop_out_req(RequestId::from(5), PopContext::None).is_some());

        // Reusing the id replaces the tombstone before its 600ms expiry.
        conn.send_request(Request::new(RequestId::from(5), 5_000));
        let outcomes = fire(&mut conn, &clock, &heap, 700);
        assert!(matches!(
            outcomes.as_slice(),
            [TimerOutcome::TombstoneSuperseded { id }] if *id == RequestId::from(5)
        ));
        assert!(conn.ledger().get_out_req(RequestId::from(5)).is_some());
    }

    #[test]
    fn error_frame_for_unknown_id_is_absorbed() {
        let (mut conn, _clock, _heap, _rx) = connection(1_500);
        let result = conn.handle_error_frame(ErrorContext {
            original_id: RequestId::from(99),
            code: 0x06,
            message: "unexpected".into(),
        });
        assert!(result.is_none());
        assert!(conn.ledger().get_requests().outbound.is_empty());
    }
}
