//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ledger_pending_requests` (gauge): in-flight requests by direction, summed over
//!   every ledger in the process
//! - `ledger_unknown_id_total` (counter): finalization attempts for unknown ids, by frame kind
//! - `ledger_tombstones_created_total` / `ledger_tombstones_expired_total` (counters)
//! - `ledger_stale_notifications_total` (counter)
//! - `ledger_sweep_reclaimed_total` (counter): lingering requests reclaimed, by direction
//! - `ledger_request_timeouts_total` (counter): fired request timeouts, by direction
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::ledger::Direction;

/// Install the Prometheus exporter. Must be called inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_metrics();
            tracing::info!(address = %addr, "Metrics exporter listening");
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter");
        }
    }
}

fn describe_metrics() {
    describe_gauge!("ledger_pending_requests", "In-flight requests by direction");
    describe_counter!(
        "ledger_unknown_id_total",
        "Outbound finalizations for ids the ledger does not know"
    );
    describe_counter!("ledger_tombstones_created_total", "Outbound ids retired");
    describe_counter!(
        "ledger_tombstones_expired_total",
        "Tombstones removed after their grace period"
    );
    describe_counter!(
        "ledger_stale_notifications_total",
        "Stale-connection notifications emitted"
    );
    describe_counter!(
        "ledger_sweep_reclaimed_total",
        "Timed-out requests reclaimed by the sanity sweep"
    );
    describe_counter!("ledger_request_timeouts_total", "Request timeouts fired");
}

// Ledgers only ever move the shared gauge by their own deltas.
pub fn increment_pending(direction: Direction) {
    gauge!("ledger_pending_requests", "direction" => direction.as_str()).increment(1.0);
}

pub fn decrement_pending(direction: Direction, by: usize) {
    if by > 0 {
        gauge!("ledger_pending_requests", "direction" => direction.as_str())
            .decrement(by as f64);
    }
}

pub fn record_unknown_id(kind: &'static str) {
    counter!("ledger_unknown_id_total", "kind" => kind).increment(1);
}

pub fn record_tombstone_created() {
    counter!("ledger_tombstones_created_total").increment(1);
}

pub fn record_tombstone_expired() {
    counter!("ledger_tombstones_expired_total").increment(1);
}

pub fn record_stale_notification() {
    counter!("ledger_stale_notifications_total").increment(1);
}

pub fn record_sweep_reclaimed(direction: Direction) {
    counter!("ledger_sweep_reclaimed_total", "direction" => direction.as_str()).increment(1);
}

pub fn record_request_timeout(direction: Direction) {
    counter!("ledger_request_timeouts_total", "direction" => direction.as_str()).increment(1);
}
