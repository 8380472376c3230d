//! Per-id ledger slots.

use crate::ledger::request::Request;
use crate::ledger::tombstone::OperationTombstone;

/// Occupant of one id in one direction.
///
/// `Empty` is never written by the ledger's own operations; a present but
/// empty slot is reported by the sanity sweep as an inconsistency.
#[derive(Debug)]
pub enum Slot {
    Empty,
    Active(Request),
    /// Outbound only.
    Tombstone(OperationTombstone),
}

impl Slot {
    /// The live request, seeing through retirement.
    pub fn active(&self) -> Option<&Request> {
        match self {
            Slot::Active(req) => Some(req),
            _ => None,
        }
    }

    pub fn active_mut(&mut self) -> Option<&mut Request> {
        match self {
            Slot::Active(req) => Some(req),
            _ => None,
        }
    }

    pub fn tombstone(&self) -> Option<&OperationTombstone> {
        match self {
            Slot::Tombstone(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Slot::Active(_))
    }
}
