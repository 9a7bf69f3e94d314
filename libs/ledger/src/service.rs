//! Shared allocation handle.
//!
//! [`AllocationService`] is constructed once at startup and handed to every
//! request handler. The scenario table and the ledger sit behind a single
//! `RwLock`: mutations take the write lock for the whole
//! check → select → mark → insert → persist sequence, so two new workers can
//! never be given the same scenario. Status reads take the read lock and see
//! either all of a mutation or none of it.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use simalloc_id::{IterationId, WorkerId};
use tokio::sync::RwLock;

use crate::entry::{AllocationEntry, AllocationStatus};
use crate::error::Result;
use crate::ledger::{Allocation, AllocationLedger};
use crate::recovery::{ErrorPolicy, RecoveryReconciler, RecoveryReport};
use crate::scenario::{Scenario, ScenarioTable};
use crate::status::{summarize, StatusSummary};
use crate::store::LedgerStore;

struct LedgerState {
    table: ScenarioTable,
    ledger: AllocationLedger,
}

/// Thread-safe front for the table and ledger.
pub struct AllocationService {
    state: RwLock<LedgerState>,
}

impl AllocationService {
    /// Load the dataset, reconcile the persisted ledger, and return a service
    /// ready to serve.
    pub fn open(
        dataset_path: impl AsRef<Path>,
        store: Arc<dyn LedgerStore>,
        policy: ErrorPolicy,
    ) -> Result<(Self, RecoveryReport)> {
        let mut table = ScenarioTable::load(dataset_path)?;
        let (ledger, report) = RecoveryReconciler::new(policy).recover(&mut table, store)?;
        Ok((Self::new(table, ledger), report))
    }

    /// Wrap an already-reconciled table and ledger.
    pub fn new(table: ScenarioTable, ledger: AllocationLedger) -> Self {
        Self {
            state: RwLock::new(LedgerState { table, ledger }),
        }
    }

    /// Give `worker_id` its scenario, or report that none remain.
    pub async fn allocate(&self, worker_id: &WorkerId) -> Result<Allocation> {
        let mut state = self.state.write().await;
        let LedgerState { table, ledger } = &mut *state;
        ledger.allocate(table, worker_id, now())
    }

    /// Record a worker's outcome.
    pub async fn update_status(
        &self,
        worker_id: &WorkerId,
        status: AllocationStatus,
        error_message: Option<String>,
    ) -> Result<AllocationEntry> {
        let mut state = self.state.write().await;
        state
            .ledger
            .update_status(worker_id, status, error_message, now())
    }

    pub async fn complete(&self, worker_id: &WorkerId) -> Result<AllocationEntry> {
        self.update_status(worker_id, AllocationStatus::Completed, None)
            .await
    }

    pub async fn fail(
        &self,
        worker_id: &WorkerId,
        message: impl Into<String>,
    ) -> Result<AllocationEntry> {
        self.update_status(worker_id, AllocationStatus::Error, Some(message.into()))
            .await
    }

    /// The worker's live entry, if any.
    pub async fn entry(&self, worker_id: &WorkerId) -> Option<AllocationEntry> {
        self.state.read().await.ledger.entry(worker_id).cloned()
    }

    /// Scenario parameters by iteration id.
    pub async fn scenario(&self, iteration_id: &IterationId) -> Option<Scenario> {
        self.state.read().await.table.get(iteration_id).cloned()
    }

    pub async fn active_workers(&self) -> Vec<WorkerId> {
        self.state.read().await.ledger.active_workers()
    }

    pub async fn status(&self) -> StatusSummary {
        let state = self.state.read().await;
        summarize(&state.table, &state.ledger, now())
    }

    /// True if the latest mutation has not been written yet.
    pub async fn is_dirty(&self) -> bool {
        self.state.read().await.ledger.is_dirty()
    }

    /// Write the ledger now, surfacing any failure.
    pub async fn flush(&self) -> Result<()> {
        self.state.write().await.ledger.flush()
    }

    /// Write the ledger only if it has unpersisted changes.
    ///
    /// Returns whether a write was attempted.
    pub async fn flush_if_dirty(&self) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.ledger.is_dirty() {
            return Ok(false);
        }
        state.ledger.flush()?;
        Ok(true)
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::store::{JsonFileStore, MemoryStore};
    use simalloc_testing::{dataset_csv, Workspace};
    use std::collections::HashSet;

    fn worker(raw: &str) -> WorkerId {
        WorkerId::parse(raw).unwrap()
    }

    fn service(count: usize, store: Arc<MemoryStore>) -> AllocationService {
        let table = ScenarioTable::from_reader(dataset_csv(count).as_bytes(), "test").unwrap();
        AllocationService::new(table, AllocationLedger::new(store))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocation_never_duplicates() {
        let service = Arc::new(service(20, Arc::new(MemoryStore::new())));

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.allocate(&worker(&format!("w{i}"))).await })
            })
            .collect();

        let mut assigned = HashSet::new();
        let mut exhausted = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                Allocation::Assigned { scenario, reissued } => {
                    assert!(!reissued);
                    assert!(assigned.insert(scenario.iteration_id));
                }
                Allocation::Exhausted => exhausted += 1,
            }
        }

        assert_eq!(assigned.len(), 20);
        assert_eq!(exhausted, 30);
        assert_eq!(service.active_workers().await.len(), 20);
    }

    #[tokio::test]
    async fn test_status_after_walkthrough() {
        let service = service(3, Arc::new(MemoryStore::new()));
        for w in ["w1", "w2", "w3"] {
            assert!(service.allocate(&worker(w)).await.unwrap().scenario().is_some());
        }
        assert_eq!(
            service.allocate(&worker("w4")).await.unwrap(),
            Allocation::Exhausted
        );
        service.complete(&worker("w1")).await.unwrap();

        let status = service.status().await;
        assert_eq!(status.total, 3);
        assert_eq!(status.allocated, 2);
        assert_eq!(status.finished, 1);
        assert_eq!(status.errored, 0);
        assert_eq!(status.finished_past_day, 1);
    }

    #[tokio::test]
    async fn test_fail_unknown_worker() {
        let service = service(1, Arc::new(MemoryStore::new()));
        let err = service
            .fail(&worker("wX"), "divide by zero")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert_eq!(service.status().await.errored, 0);
    }

    #[tokio::test]
    async fn test_flush_if_dirty_retries_failed_write() {
        let store = Arc::new(MemoryStore::new());
        let service = service(2, store.clone());

        store.set_failing(true);
        service.allocate(&worker("w1")).await.unwrap();
        assert!(service.is_dirty().await);
        assert!(service.flush_if_dirty().await.is_err());

        store.set_failing(false);
        assert!(service.flush_if_dirty().await.unwrap());
        assert!(!service.is_dirty().await);
        assert!(!service.flush_if_dirty().await.unwrap());
        assert_eq!(store.current().unwrap().allocations.len(), 1);
    }

    #[tokio::test]
    async fn test_restart_requeues_interrupted_work() {
        let ws = Workspace::with_dataset(3);
        let store = || Arc::new(JsonFileStore::new(ws.ledger_path())) as Arc<dyn LedgerStore>;

        let (first, report) =
            AllocationService::open(ws.dataset_path(), store(), ErrorPolicy::Keep).unwrap();
        assert_eq!(report, RecoveryReport::default());

        let done = first.allocate(&worker("done")).await.unwrap();
        let crashed = first.allocate(&worker("crashed")).await.unwrap();
        first.complete(&worker("done")).await.unwrap();
        drop(first);

        let (second, report) =
            AllocationService::open(ws.dataset_path(), store(), ErrorPolicy::Keep).unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(report.retained, 1);
        assert!(second.entry(&worker("crashed")).await.is_none());
        assert_eq!(
            second.entry(&worker("done")).await.unwrap().status,
            AllocationStatus::Completed
        );

        // The interrupted scenario is next in line for a new worker.
        let fresh = second.allocate(&worker("fresh")).await.unwrap();
        assert_eq!(fresh.scenario(), crashed.scenario());
        assert_ne!(fresh.scenario(), done.scenario());

        let status = second.status().await;
        assert_eq!(status.finished, 1);
        assert_eq!(status.allocated, 1);
    }

    #[tokio::test]
    async fn test_open_with_corrupt_ledger_fails() {
        let ws = Workspace::with_dataset(1);
        ws.write_ledger("not json");
        let result = AllocationService::open(
            ws.dataset_path(),
            Arc::new(JsonFileStore::new(ws.ledger_path())),
            ErrorPolicy::Keep,
        );
        assert!(matches!(
            result.err(),
            Some(LedgerError::CorruptSnapshot { .. })
        ));
    }
}
