//! The allocation ledger.
//!
//! Maps each worker to the scenario it holds and the inverse. All methods
//! take `&mut self`; callers serialize access (see [`crate::AllocationService`])
//! so the existence check, scenario selection, flag update and map inserts
//! happen as one critical section.
//!
//! Every mutation is followed by a best-effort write of the full snapshot. A
//! failed write is logged and leaves the ledger dirty; it is retried by the
//! next mutation or an explicit [`AllocationLedger::flush`].

use std::collections::BTreeMap;
use std::sync::Arc;

use simalloc_id::{IterationId, WorkerId};
use tracing::{debug, info, warn};

use crate::entry::{AllocationEntry, AllocationStatus};
use crate::error::{LedgerError, Result};
use crate::scenario::{Scenario, ScenarioTable};
use crate::snapshot::LedgerSnapshot;
use crate::store::LedgerStore;

/// Outcome of [`AllocationLedger::allocate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Allocation {
    /// The worker holds this scenario.
    Assigned {
        scenario: Scenario,
        /// True if the worker already held it before this call.
        reissued: bool,
    },
    /// Every scenario has been handed out.
    Exhausted,
}

impl Allocation {
    pub fn scenario(&self) -> Option<&Scenario> {
        match self {
            Self::Assigned { scenario, .. } => Some(scenario),
            Self::Exhausted => None,
        }
    }
}

/// Worker → scenario claims.
pub struct AllocationLedger {
    allocations: BTreeMap<WorkerId, AllocationEntry>,
    iterations: BTreeMap<IterationId, WorkerId>,
    store: Arc<dyn LedgerStore>,
    dirty: bool,
}

impl std::fmt::Debug for AllocationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationLedger")
            .field("allocations", &self.allocations)
            .field("iterations", &self.iterations)
            .field("store", &self.store.location())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl AllocationLedger {
    /// An empty ledger persisting to `store`.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            allocations: BTreeMap::new(),
            iterations: BTreeMap::new(),
            store,
            dirty: false,
        }
    }

    /// Rebuild a ledger from a snapshot without validating it.
    ///
    /// The inverse map is derived from the forward map; the snapshot's own
    /// inverse is ignored.
    pub fn from_snapshot(snapshot: LedgerSnapshot, store: Arc<dyn LedgerStore>) -> Self {
        let iterations = snapshot.derived_iterations();
        Self {
            allocations: snapshot.allocations,
            iterations,
            store,
            dirty: false,
        }
    }

    /// Hand `worker_id` a scenario.
    ///
    /// A worker that already has an entry gets the same scenario back; a new
    /// worker gets the first unallocated scenario. Exhaustion mutates nothing.
    pub fn allocate(
        &mut self,
        table: &mut ScenarioTable,
        worker_id: &WorkerId,
        now: i64,
    ) -> Result<Allocation> {
        if let Some(entry) = self.allocations.get(worker_id) {
            let scenario = table.get(&entry.iteration_id).cloned().ok_or_else(|| {
                LedgerError::UnknownIteration {
                    worker_id: worker_id.clone(),
                    iteration_id: entry.iteration_id.clone(),
                }
            })?;
            debug!(
                worker_id = %worker_id,
                iteration_id = %scenario.iteration_id,
                status = %entry.status,
                "Reissuing existing allocation"
            );
            return Ok(Allocation::Assigned {
                scenario,
                reissued: true,
            });
        }

        let Some(scenario) = table.next_unallocated().cloned() else {
            debug!(worker_id = %worker_id, "No unallocated scenarios remain");
            return Ok(Allocation::Exhausted);
        };

        let iteration_id = scenario.iteration_id.clone();
        if let Some(holder) = self.iterations.get(&iteration_id) {
            return Err(LedgerError::AlreadyHeld {
                iteration_id,
                holder: holder.clone(),
            });
        }

        table.mark_allocated(&iteration_id);
        self.allocations.insert(
            worker_id.clone(),
            AllocationEntry::working(iteration_id.clone(), now),
        );
        self.iterations.insert(iteration_id.clone(), worker_id.clone());

        info!(
            worker_id = %worker_id,
            iteration_id = %iteration_id,
            "Scenario allocated"
        );
        self.persist();

        Ok(Allocation::Assigned {
            scenario,
            reissued: false,
        })
    }

    /// Record a worker's outcome.
    ///
    /// `status` must be `completed` or `error`, and the entry must still be
    /// `working`. The entry stays in the ledger so it is counted until the
    /// next restart.
    pub fn update_status(
        &mut self,
        worker_id: &WorkerId,
        status: AllocationStatus,
        error_message: Option<String>,
        now: i64,
    ) -> Result<AllocationEntry> {
        if !status.is_finished() {
            return Err(LedgerError::InvalidTransition {
                worker_id: worker_id.clone(),
                to: status,
            });
        }

        let entry = self
            .allocations
            .get_mut(worker_id)
            .ok_or_else(|| LedgerError::NotFound(worker_id.clone()))?;
        if !entry.is_working() {
            return Err(LedgerError::AlreadyFinished {
                worker_id: worker_id.clone(),
                status: entry.status,
            });
        }

        let previous = entry.status;
        entry.status = status;
        entry.finished_at = Some(now);
        entry.error_message = match status {
            AllocationStatus::Error => error_message,
            _ => None,
        };
        let updated = entry.clone();

        info!(
            worker_id = %worker_id,
            iteration_id = %updated.iteration_id,
            from = %previous,
            to = %status,
            "Allocation status updated"
        );
        self.persist();

        Ok(updated)
    }

    /// Remove a worker's entry and its inverse mapping.
    ///
    /// Only used while reconciling at startup. Missing data is logged, not
    /// treated as an error: restart-time state can be stale.
    pub fn pop(&mut self, worker_id: &WorkerId) -> Option<AllocationEntry> {
        let Some(entry) = self.allocations.remove(worker_id) else {
            warn!(worker_id = %worker_id, "Pop of unknown worker ignored");
            return None;
        };
        self.dirty = true;

        match self.iterations.get(&entry.iteration_id) {
            Some(holder) if holder == worker_id => {
                self.iterations.remove(&entry.iteration_id);
            }
            Some(holder) => {
                warn!(
                    worker_id = %worker_id,
                    holder = %holder,
                    iteration_id = %entry.iteration_id,
                    "Inverse mapping points at another worker, leaving it"
                );
            }
            None => {
                warn!(
                    worker_id = %worker_id,
                    iteration_id = %entry.iteration_id,
                    "Inverse mapping already absent"
                );
            }
        }

        Some(entry)
    }

    /// Workers whose entry is still `working`, in id order.
    pub fn active_workers(&self) -> Vec<WorkerId> {
        self.allocations
            .iter()
            .filter(|(_, entry)| entry.is_working())
            .map(|(worker, _)| worker.clone())
            .collect()
    }

    pub fn entry(&self, worker_id: &WorkerId) -> Option<&AllocationEntry> {
        self.allocations.get(worker_id)
    }

    /// Worker holding an iteration, if any.
    pub fn holder(&self, iteration_id: &IterationId) -> Option<&WorkerId> {
        self.iterations.get(iteration_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&WorkerId, &AllocationEntry)> {
        self.allocations.iter()
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// True if the latest mutation has not reached the store.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Current state in persisted form.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            allocations: self.allocations.clone(),
            iterations: self.iterations.clone(),
        }
    }

    /// Write the snapshot, returning any failure to the caller.
    pub fn flush(&mut self) -> Result<()> {
        match self.store.save(&self.snapshot()) {
            Ok(()) => {
                if self.dirty {
                    info!(store = %self.store.location(), "Ledger flushed");
                }
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                self.dirty = true;
                Err(e)
            }
        }
    }

    /// Best-effort write after a mutation.
    fn persist(&mut self) {
        self.dirty = true;
        if let Err(e) = self.flush() {
            warn!(
                error = %e,
                store = %self.store.location(),
                "Failed to persist ledger, keeping in-memory state"
            );
        }
    }
}
