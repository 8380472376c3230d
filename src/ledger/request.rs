//! Request records tracked by the ledger.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::net::connection::ConnectionId;
use crate::timers::{TimerHandle, TimerToken};

/// Correlation id of a request on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(u32);

impl RequestId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for RequestId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the connection originated a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received from the peer; we owe a response.
    In,
    /// Sent to the peer; we are waiting on a response.
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An in-flight RPC request.
///
/// While registered, the ledger owns the request and holds its timer handle.
/// Finalizing hands it back detached: no owner, no live timer.
#[derive(Debug)]
pub struct Request {
    id: RequestId,
    timeout_ms: u64,
    /// Set by the layer that observed the timeout.
    pub timed_out: bool,
    pub service: Option<String>,
    pub endpoint: Option<String>,
    pub(crate) owner: Option<ConnectionId>,
    pub(crate) token: Option<TimerToken>,
    pub(crate) timer: Option<TimerHandle>,
}

impl Request {
    pub fn new(id: RequestId, timeout_ms: u64) -> Self {
        Self {
            id,
            timeout_ms,
            timed_out: false,
            service: None,
            endpoint: None,
            owner: None,
            token: None,
            timer: None,
        }
    }

    pub fn with_target(mut self, service: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Connection whose ledger currently holds this request.
    pub fn owner(&self) -> Option<ConnectionId> {
        self.owner
    }

    /// Token of the current registration, if registered.
    pub fn token(&self) -> Option<TimerToken> {
        self.token
    }

    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }

    /// Cancel and drop the scheduled timeout, if any.
    pub(crate) fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.cancel();
        }
    }

    /// Strip ledger bookkeeping before handing the request back to the caller.
    pub(crate) fn detach(&mut self) {
        self.cancel_timer();
        self.owner = None;
    }
}
