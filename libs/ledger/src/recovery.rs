//! Startup reconciliation of the persisted ledger.
//!
//! Every persisted entry goes through exactly one transition:
//!
//! | Persisted status | Action                     | Scenario afterwards |
//! |------------------|----------------------------|---------------------|
//! | `working`        | pop (worker presumed dead) | unallocated         |
//! | `completed`      | keep                       | allocated           |
//! | `error`          | keep, or pop under `Requeue` | allocated / unallocated |
//!
//! The reconciled ledger is written back before any request is served, so a
//! `working` entry never survives more than one restart.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use simalloc_id::{IterationId, WorkerId};
use tracing::{info, warn};

use crate::entry::AllocationStatus;
use crate::error::{LedgerError, Result};
use crate::ledger::AllocationLedger;
use crate::scenario::ScenarioTable;
use crate::snapshot::LedgerSnapshot;
use crate::store::LedgerStore;

/// What to do with `error` entries found at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Keep the entry; the scenario is not retried.
    #[default]
    Keep,
    /// Drop the entry so the scenario is handed out again.
    Requeue,
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep => f.write_str("keep"),
            Self::Requeue => f.write_str("requeue"),
        }
    }
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "requeue" => Ok(Self::Requeue),
            other => Err(format!("unknown error policy '{other}' (expected keep or requeue)")),
        }
    }
}

/// Counts of what reconciliation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// `working` entries dropped; their scenarios are available again.
    pub requeued: usize,
    /// `completed` and kept `error` entries.
    pub retained: usize,
    /// `error` entries dropped under [`ErrorPolicy::Requeue`].
    pub requeued_errors: usize,
    /// Inverse-map entries that disagreed with the forward map.
    pub stale_mappings: usize,
}

/// Rebuilds a consistent (table, ledger) pair from the persisted snapshot.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReconciler {
    policy: ErrorPolicy,
}

impl RecoveryReconciler {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self { policy }
    }

    /// Load the snapshot from `store` and reconcile it into `table`.
    ///
    /// `table` must be freshly loaded (nothing allocated). A missing snapshot
    /// means first boot and yields an empty ledger.
    pub fn recover(
        &self,
        table: &mut ScenarioTable,
        store: Arc<dyn LedgerStore>,
    ) -> Result<(AllocationLedger, RecoveryReport)> {
        let snapshot = match store.load()? {
            Some(snapshot) => snapshot,
            None => {
                info!(store = %store.location(), "No persisted ledger found, starting empty");
                LedgerSnapshot::default()
            }
        };
        self.reconcile(table, snapshot, store)
    }

    /// Reconcile an already-loaded snapshot into `table`, then persist.
    pub fn reconcile(
        &self,
        table: &mut ScenarioTable,
        snapshot: LedgerSnapshot,
        store: Arc<dyn LedgerStore>,
    ) -> Result<(AllocationLedger, RecoveryReport)> {
        let shared = snapshot.shared_iterations();
        if !shared.is_empty() {
            let ids: Vec<_> = shared.iter().map(IterationId::as_str).collect();
            return Err(LedgerError::CorruptSnapshot {
                path: store.location(),
                message: format!("iterations held by several workers: {}", ids.join(", ")),
            });
        }

        let mut report = RecoveryReport {
            stale_mappings: snapshot.stale_mappings(),
            ..RecoveryReport::default()
        };
        if report.stale_mappings > 0 {
            warn!(
                stale_mappings = report.stale_mappings,
                "Persisted inverse map disagrees with allocations, rebuilding it"
            );
        }

        let entries: Vec<(WorkerId, AllocationStatus, IterationId)> = snapshot
            .allocations
            .iter()
            .map(|(worker, entry)| (worker.clone(), entry.status, entry.iteration_id.clone()))
            .collect();

        let mut ledger = AllocationLedger::from_snapshot(snapshot, store);

        for (worker_id, status, iteration_id) in entries {
            match (status, self.policy) {
                (AllocationStatus::Working, _) => {
                    if !table.contains(&iteration_id) {
                        warn!(
                            worker_id = %worker_id,
                            iteration_id = %iteration_id,
                            "Interrupted entry references unknown iteration"
                        );
                    }
                    ledger.pop(&worker_id);
                    report.requeued += 1;
                    info!(
                        worker_id = %worker_id,
                        iteration_id = %iteration_id,
                        "Requeued interrupted scenario"
                    );
                }
                (AllocationStatus::Error, ErrorPolicy::Requeue) => {
                    ledger.pop(&worker_id);
                    report.requeued_errors += 1;
                    info!(
                        worker_id = %worker_id,
                        iteration_id = %iteration_id,
                        "Requeued failed scenario"
                    );
                }
                (AllocationStatus::Completed | AllocationStatus::Error, _) => {
                    if !table.mark_allocated(&iteration_id) {
                        return Err(LedgerError::UnknownIteration {
                            worker_id,
                            iteration_id,
                        });
                    }
                    report.retained += 1;
                }
            }
        }

        ledger.flush()?;

        info!(
            requeued = report.requeued,
            retained = report.retained,
            requeued_errors = report.requeued_errors,
            stale_mappings = report.stale_mappings,
            error_policy = %self.policy,
            "Ledger reconciled"
        );

        Ok((ledger, report))
    }
}
