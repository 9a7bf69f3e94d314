//! # simalloc-ledger
//!
//! The allocation core: which worker holds which scenario, and how that
//! survives a restart.
//!
//! ## Components
//!
//! - [`ScenarioTable`]: the fixed set of scenarios loaded from the dataset,
//!   each with an `allocated` flag.
//! - [`AllocationLedger`]: worker → entry map plus its inverse, persisted
//!   through a [`LedgerStore`] after every mutation.
//! - [`RecoveryReconciler`]: runs once at startup; requeues interrupted work
//!   and folds finished work back into the table.
//! - [`summarize`]: read-only status counts.
//! - [`AllocationService`]: the shared handle request handlers use. It holds
//!   the table and ledger under one lock.
//!
//! ## Invariants
//!
//! - A worker holds at most one live entry; re-requesting returns the same
//!   scenario.
//! - No two working entries ever reference the same iteration.
//! - Persistence failures never fail a mutation; the in-memory ledger is
//!   authoritative until the next restart.

mod entry;
mod error;
mod ledger;
mod recovery;
mod scenario;
mod service;
mod snapshot;
mod status;
mod store;

pub use entry::{AllocationEntry, AllocationStatus};
pub use error::{LedgerError, Result};
pub use ledger::{Allocation, AllocationLedger};
pub use recovery::{ErrorPolicy, RecoveryReconciler, RecoveryReport};
pub use scenario::{Scenario, ScenarioTable};
pub use service::AllocationService;
pub use snapshot::LedgerSnapshot;
pub use status::{summarize, StatusSummary, TRAILING_WINDOW_SECS};
pub use store::{write_atomic, JsonFileStore, LedgerStore, MemoryStore};
