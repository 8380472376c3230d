//! Stale-connection detection.
//!
//! # State Transitions
//! ```text
//! Fresh → Armed { since: now }          first observed timeout
//! Armed → Armed (unchanged)             now <= since + stale_period
//! Armed → Armed (unchanged) + notify    now >  since + stale_period
//! ```
//!
//! The watermark is never moved forward once armed, so every timeout past
//! the threshold notifies again.

use tokio::sync::mpsc;

use crate::ledger::error::LedgerError;
use crate::net::connection::ConnectionInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaleState {
    #[default]
    Fresh,
    Armed { since: u64 },
}

impl StaleState {
    /// Watermark of the first observed timeout.
    pub fn last_timeout_time(&self) -> Option<u64> {
        match self {
            StaleState::Fresh => None,
            StaleState::Armed { since } => Some(*since),
        }
    }

    /// Advance the state for a timeout observed at `now`.
    ///
    /// Returns the error to deliver when the connection is stale.
    pub fn observe(&mut self, now: u64, stale_period: u64) -> Option<LedgerError> {
        match *self {
            StaleState::Fresh => {
                *self = StaleState::Armed { since: now };
                None
            }
            StaleState::Armed { since } if now > since.saturating_add(stale_period) => {
                // TODO: re-arm here (`since = now`) once callers can cope with
                // one notification per stale period instead of one per timeout.
                Some(LedgerError::ConnectionStale {
                    last_timeout_time: since,
                    now,
                    stale_period,
                })
            }
            StaleState::Armed { .. } => None,
        }
    }
}

/// Receives stale-connection conditions for disposition (usually closing the socket).
pub trait StaleNotifier: Send + Sync {
    fn notify_stale(&self, connection: &ConnectionInfo, error: LedgerError);
}

/// A stale notification as delivered over a channel.
#[derive(Debug, Clone)]
pub struct StaleEvent {
    pub connection: ConnectionInfo,
    pub error: LedgerError,
}

impl StaleNotifier for mpsc::UnboundedSender<StaleEvent> {
    fn notify_stale(&self, connection: &ConnectionInfo, error: LedgerError) {
        let event = StaleEvent {
            connection: connection.clone(),
            error,
        };
        if self.send(event).is_err() {
            tracing::debug!(connection_id = %connection.id, "Stale event receiver dropped");
        }
    }
}
