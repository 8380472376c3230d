//! Retired-id markers for the outbound direction.
//!
//! After an outbound request is finalized its id keeps a tombstone for a
//! grace period, so a late or duplicated response is swallowed instead of
//! being matched to a newer request that reuses the id.

use crate::ledger::request::RequestId;
use crate::timers::TimerToken;

/// Grace added on top of the original request timeout.
pub const TOMBSTONE_TTL_OFFSET_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationTombstone {
    pub id: RequestId,
    /// When the request was retired.
    pub created_at: u64,
    /// Time-to-live in milliseconds.
    pub ttl_ms: u64,
    pub(crate) token: TimerToken,
}

impl OperationTombstone {
    pub(crate) fn new(
        id: RequestId,
        created_at: u64,
        request_timeout_ms: u64,
        token: TimerToken,
    ) -> Self {
        Self {
            id,
            created_at,
            ttl_ms: TOMBSTONE_TTL_OFFSET_MS.saturating_add(request_timeout_ms),
            token,
        }
    }

    pub fn token(&self) -> TimerToken {
        self.token
    }

    pub fn expires_at(&self) -> u64 {
        self.created_at.saturating_add(self.ttl_ms)
    }
}
