//! Read-only progress summary.

use serde::{Deserialize, Serialize};

use crate::entry::AllocationStatus;
use crate::ledger::AllocationLedger;
use crate::scenario::ScenarioTable;

/// Width of the trailing throughput window.
pub const TRAILING_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Counts reported by the status endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    /// Scenarios in the dataset.
    pub total: usize,
    /// Live entries still `working`.
    pub allocated: usize,
    /// Live entries `completed`.
    pub finished: usize,
    /// Live entries in `error`.
    pub errored: usize,
    /// Completed entries whose `finished_at` falls within the trailing window.
    pub finished_past_day: usize,
}

/// Summarize the table and ledger as of `now` (unix seconds).
pub fn summarize(table: &ScenarioTable, ledger: &AllocationLedger, now: i64) -> StatusSummary {
    let window_start = now - TRAILING_WINDOW_SECS;
    let mut summary = StatusSummary {
        total: table.count(),
        ..StatusSummary::default()
    };

    for (_, entry) in ledger.entries() {
        match entry.status {
            AllocationStatus::Working => summary.allocated += 1,
            AllocationStatus::Completed => {
                summary.finished += 1;
                if entry.finished_at.is_some_and(|t| t >= window_start) {
                    summary.finished_past_day += 1;
                }
            }
            AllocationStatus::Error => summary.errored += 1,
        }
    }

    summary
}
