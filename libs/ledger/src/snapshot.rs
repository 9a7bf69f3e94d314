//! On-disk form of the ledger.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use simalloc_id::{IterationId, WorkerId};

use crate::entry::AllocationEntry;

/// Serialized ledger: worker → entry, plus the iteration → worker inverse.
///
/// Both maps are written together so a reader never sees one without the
/// other. The inverse is redundant and is rebuilt from `allocations` on load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub allocations: BTreeMap<WorkerId, AllocationEntry>,
    #[serde(default)]
    pub iterations: BTreeMap<IterationId, WorkerId>,
}

impl LedgerSnapshot {
    /// The inverse map implied by `allocations`.
    pub fn derived_iterations(&self) -> BTreeMap<IterationId, WorkerId> {
        self.allocations
            .iter()
            .map(|(worker, entry)| (entry.iteration_id.clone(), worker.clone()))
            .collect()
    }

    /// Iterations referenced by more than one entry.
    pub fn shared_iterations(&self) -> Vec<IterationId> {
        let mut seen = BTreeMap::<&IterationId, usize>::new();
        for entry in self.allocations.values() {
            *seen.entry(&entry.iteration_id).or_default() += 1;
        }
        seen.into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of inverse mappings that disagree with `allocations`.
    pub fn stale_mappings(&self) -> usize {
        let derived = self.derived_iterations();
        let missing = derived
            .iter()
            .filter(|(iteration, worker)| self.iterations.get(*iteration) != Some(*worker))
            .count();
        let extra = self
            .iterations
            .keys()
            .filter(|iteration| !derived.contains_key(*iteration))
            .count();
        missing + extra
    }
}
