//! End-to-end request lifecycle through a connection on a manual clock.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

use rpc_ledger::ledger::{
    Arg1, Direction, PopContext, Request, RequestId, ResponseContext, StaleState,
    TOMBSTONE_TTL_OFFSET_MS,
};
use rpc_ledger::net::TimerOutcome;

mod common;

use common::{EventCapture, TestConnection};

const UNKNOWN_ID_MESSAGE: &str = "popOutReq received for unknown or lost id";

fn id(raw: u32) -> RequestId {
    RequestId::from(raw)
}

#[test]
fn retired_id_stays_invisible_until_tombstone_expires() {
    let mut t = TestConnection::new(1_500);

    t.conn.send_request(Request::new(id(42), 1_000));
    assert_eq!(t.conn.ledger().get_pending().outbound, 1);

    t.clock.set(100);
    let req = t
        .conn
        .handle_response(ResponseContext {
            id: id(42),
            code: 0,
            arg1: Arg1::Buffered(b"pong".to_vec()),
        })
        .expect("request 42 should still be live");
    assert_eq!(req.id(), id(42));
    assert_eq!(req.owner(), None);
    assert_eq!(t.conn.ledger().get_pending().outbound, 0);

    let slot = &t.conn.ledger().get_requests().outbound[&id(42)];
    let tombstone = slot.tombstone().expect("slot 42 should hold a tombstone");
    assert_eq!(tombstone.ttl_ms, TOMBSTONE_TTL_OFFSET_MS + 1_000);
    assert_eq!(tombstone.ttl_ms, 1_500);

    for now in [500, 1_000, 1_599] {
        assert!(t.advance_to(now).is_empty(), "nothing should fire at {now}");
        assert!(t.conn.ledger().get_out_req(id(42)).is_none());
        assert!(t.conn.ledger().get_requests().outbound.contains_key(&id(42)));
    }

    let outcomes = t.advance_to(1_601);
    assert!(matches!(
        outcomes.as_slice(),
        [TimerOutcome::TombstoneExpired { id }] if *id == RequestId::from(42)
    ));
    assert!(t.conn.ledger().get_requests().outbound.is_empty());
    assert!(t.conn.ledger().get_out_req(id(42)).is_none());
}

#[test]
fn late_response_after_timeout_is_swallowed() {
    let mut t = TestConnection::new(1_500);
    t.conn.send_request(Request::new(id(7), 200));

    let outcomes = t.advance_to(250);
    assert!(matches!(
        outcomes.as_slice(),
        [TimerOutcome::OutboundTimedOut { request: Some(_), .. }]
    ));

    // The peer answers after we gave up, then the id is reused.
    let late = t.conn.handle_response(ResponseContext {
        id: id(7),
        code: 0,
        arg1: Arg1::Streamed,
    });
    assert!(late.is_none());

    t.expire_tombstones(250 + TOMBSTONE_TTL_OFFSET_MS + 200);
    t.conn.send_request(Request::new(id(7), 200));
    assert!(t.conn.ledger().get_out_req(id(7)).is_some());
}

#[test]
fn unknown_id_produces_exactly_one_diagnostic() {
    let capture = EventCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());

    tracing::subscriber::with_default(subscriber, || {
        let mut t = TestConnection::new(1_500);
        let popped = t.conn.ledger_mut().pop_out_req(
            id(404),
            PopContext::Response(ResponseContext {
                id: id(404),
                code: 1,
                arg1: Arg1::Buffered(vec![b'x'; 4096]),
            }),
        );
        assert!(popped.is_none());
    });

    assert_eq!(capture.count(Level::INFO, UNKNOWN_ID_MESSAGE), 1);
    let info_or_louder = capture
        .events()
        .iter()
        .filter(|e| e.level <= Level::INFO)
        .count();
    assert_eq!(info_or_louder, 1);
}

#[test]
fn already_tombstoned_id_is_silent() {
    let capture = EventCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());

    tracing::subscriber::with_default(subscriber, || {
        let mut t = TestConnection::new(1_500);
        t.conn.send_request(Request::new(id(1), 100));
        assert!(t.conn.ledger_mut().pop_out_req(id(1), PopContext::None).is_some());
        assert!(t.conn.ledger_mut().pop_out_req(id(1), PopContext::None).is_none());
    });

    assert_eq!(capture.count(Level::INFO, UNKNOWN_ID_MESSAGE), 0);
}

#[test]
fn pending_matches_active_slots_over_random_sequence() {
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    let mut t = TestConnection::new(1_500);
    let mut live: Vec<u32> = Vec::new();
    let mut next_id = 1u32;

    for _ in 0..500 {
        if live.is_empty() || rng.bool() {
            t.conn.send_request(Request::new(id(next_id), 1_000));
            live.push(next_id);
            next_id += 1;
        } else {
            let raw = live.swap_remove(rng.usize(..live.len()));
            assert!(t
                .conn
                .ledger_mut()
                .pop_out_req(id(raw), PopContext::None)
                .is_some());
        }

        let snapshot = t.conn.ledger().snapshot();
        assert_eq!(snapshot.pending.outbound, live.len());
        assert_eq!(snapshot.outbound_active, live.len());
    }
}

#[test]
fn colliding_registration_is_not_deduplicated() {
    let mut t = TestConnection::new(1_500);
    t.conn.send_request(Request::new(id(9), 100));
    t.conn.send_request(Request::new(id(9), 100));

    assert_eq!(t.conn.ledger().get_pending().outbound, 2);
    assert_eq!(t.conn.ledger().snapshot().outbound_active, 1);
}

#[test]
fn stale_watermark_is_never_rearmed() {
    let mut t = TestConnection::new(1_000);
    let ledger = t.conn.ledger_mut();

    assert!(!ledger.check_last_timeout_time(0));
    assert_eq!(ledger.stale_state(), StaleState::Armed { since: 0 });

    assert!(!ledger.check_last_timeout_time(1_000));
    assert!(ledger.check_last_timeout_time(1_001));
    assert!(ledger.check_last_timeout_time(1_002));
    assert!(ledger.check_last_timeout_time(60_000));
    assert_eq!(ledger.stale_state().last_timeout_time(), Some(0));

    assert_eq!(t.stale_count(), 3);
}

#[test]
fn chronic_outbound_timeouts_notify_owner() {
    let mut t = TestConnection::new(1_000);

    for (n, start) in [(1, 0), (2, 600), (3, 1_200), (4, 1_800)] {
        t.clock.set(start);
        t.conn.send_request(Request::new(id(n), 100));
        t.advance_to(start + 100);
    }

    // Armed at 100; 700 is within the period; 1300 and 1900 are past it.
    assert_eq!(t.stale_count(), 2);
    assert_eq!(t.conn.ledger().snapshot().last_timeout_time, Some(100));
}

#[test]
fn sweep_reclaims_lingering_timeouts_in_both_directions() {
    let mut t = TestConnection::new(1_500);
    t.conn.accept_request(Request::new(id(1), 50));
    t.conn.accept_request(Request::new(id(2), 5_000));
    t.conn.send_request(Request::new(id(3), 5_000));
    t.conn.send_request(Request::new(id(4), 5_000));

    // Inbound 1 times out through its timer; outbound 3 is flagged by another layer.
    t.advance_to(60);
    assert!(t.conn.ledger_mut().mark_timed_out(Direction::Out, id(3)));

    let report = t.conn.sanity_sweep();
    assert_eq!(report.reclaimed_in, 1);
    assert_eq!(report.reclaimed_out, 1);

    let ledger = t.conn.ledger();
    assert_eq!(ledger.get_pending().inbound, 1);
    assert_eq!(ledger.get_pending().outbound, 1);
    assert!(ledger.get_in_req(id(2)).is_some());
    assert!(ledger.get_out_req(id(4)).is_some());
    assert!(ledger.get_out_req(id(3)).is_none());

    assert!(t.conn.sanity_sweep().is_clean());
}
