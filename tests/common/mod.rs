//! Shared utilities for integration tests.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use rpc_ledger::ledger::{LedgerOptions, StaleEvent};
use rpc_ledger::net::{Connection, ConnectionDirection, ConnectionInfo, TimerOutcome};
use rpc_ledger::timers::{ManualClock, TimeHeap, TimerKey};

/// A connection on a hand-driven clock with its own time heap.
pub struct TestConnection {
    pub clock: ManualClock,
    pub heap: Arc<TimeHeap>,
    pub stale_rx: mpsc::UnboundedReceiver<StaleEvent>,
    pub conn: Connection,
}

impl TestConnection {
    pub fn new(stale_period_ms: u64) -> Self {
        let clock = ManualClock::new(0);
        let heap = Arc::new(TimeHeap::new(Arc::new(clock.clone())));
        let (stale_tx, stale_rx) = mpsc::unbounded_channel();
        let conn = Connection::new(
            ConnectionInfo::new("192.0.2.10:4040", ConnectionDirection::Outbound),
            LedgerOptions {
                clock: Arc::new(clock.clone()),
                scheduler: heap.clone(),
                notifier: Arc::new(stale_tx),
                connection_stale_period_ms: stale_period_ms,
            },
        );
        Self {
            clock,
            heap,
            stale_rx,
            conn,
        }
    }

    /// Move the clock to `now` and deliver every timer that is due.
    pub fn advance_to(&mut self, now: u64) -> Vec<TimerOutcome> {
        self.clock.set(now);
        self.heap
            .expire(now)
            .into_iter()
            .map(|fired| self.conn.on_timer(fired))
            .collect()
    }

    /// Deliver only tombstone expiries, leaving request timers queued.
    #[allow(dead_code)]
    pub fn expire_tombstones(&mut self, now: u64) {
        self.clock.set(now);
        for fired in self.heap.expire(now) {
            if let TimerKey::Tombstone { id, token } = fired.key {
                self.conn.ledger_mut().expire_tombstone(id, token);
            }
        }
    }

    pub fn stale_count(&mut self) -> usize {
        let mut count = 0;
        while self.stale_rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }
}

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
}

/// Layer that records every event's level and message.
#[derive(Clone, Default)]
pub struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl EventCapture {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn count(&self, level: Level, message: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.level == level && e.message == message)
            .count()
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for EventCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
        });
    }
}
