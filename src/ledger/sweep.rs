//! Sanity sweep over both mappings.
//!
//! Reclaims requests some other layer flagged as timed out but never
//! finalized, and reports slots that are present without an occupant.

use serde::Serialize;

use crate::ledger::{Direction, OperationsLedger, PopContext, RequestId, Slot};
use crate::observability::metrics;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub reclaimed_in: usize,
    pub reclaimed_out: usize,
    pub inconsistent: usize,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.reclaimed_in == 0 && self.reclaimed_out == 0 && self.inconsistent == 0
    }
}

impl OperationsLedger {
    pub fn sanity_sweep(&mut self) -> SweepReport {
        let mut report = SweepReport::default();
        self.sweep_ops(Direction::In, &mut report);
        self.sweep_ops(Direction::Out, &mut report);

        if !report.is_clean() {
            tracing::debug!(
                connection_id = %self.connection.id,
                reclaimed_in = report.reclaimed_in,
                reclaimed_out = report.reclaimed_out,
                inconsistent = report.inconsistent,
                "Sanity sweep finished"
            );
        }
        report
    }

    fn sweep_ops(&mut self, direction: Direction, report: &mut SweepReport) {
        let mut lingering: Vec<RequestId> = Vec::new();

        for (id, slot) in self.requests.get(direction) {
            match slot {
                Slot::Empty => {
                    tracing::warn!(
                        connection_id = %self.connection.id,
                        direction = %direction,
                        id = %id,
                        "unexpected undefined operation"
                    );
                    report.inconsistent += 1;
                }
                Slot::Active(req) if req.timed_out => {
                    tracing::warn!(
                        connection_id = %self.connection.id,
                        direction = %direction,
                        id = %id,
                        "lingering timed-out operation"
                    );
                    lingering.push(*id);
                }
                _ => {}
            }
        }

        for id in lingering {
            let reclaimed = match direction {
                Direction::In => self.pop_in_req(id),
                Direction::Out => self.pop_out_req(id, PopContext::None),
            };
            if reclaimed.is_none() {
                continue;
            }
            match direction {
                Direction::In => report.reclaimed_in += 1,
                Direction::Out => report.reclaimed_out += 1,
            }
            metrics::record_sweep_reclaimed(direction);
        }
    }
}
