//! Ledger error types.

use thiserror::Error;

/// Conditions the ledger reports to its owning connection.
///
/// None of these are returned as `Err` from ledger calls; they are delivered
/// through [`StaleNotifier`](crate::ledger::stale::StaleNotifier).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Requests on this connection keep timing out past the stale period.
    #[error(
        "connection went stale: last timeout at {last_timeout_time}ms, now {now}ms, stale period {stale_period}ms"
    )]
    ConnectionStale {
        last_timeout_time: u64,
        now: u64,
        stale_period: u64,
    },
}
