//! Ledger error types.

use simalloc_id::{IterationId, WorkerId};
use thiserror::Error;

use crate::entry::AllocationStatus;

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The worker has no live entry.
    #[error("no allocation found for worker {0}")]
    NotFound(WorkerId),

    /// The requested status change is not allowed.
    #[error("worker {worker_id} cannot be moved to status {to}")]
    InvalidTransition {
        worker_id: WorkerId,
        to: AllocationStatus,
    },

    /// The worker already reported an outcome; finished entries are final.
    #[error("worker {worker_id} already finished with status {status}")]
    AlreadyFinished {
        worker_id: WorkerId,
        status: AllocationStatus,
    },

    /// A live entry references a scenario that is not in the table.
    #[error("worker {worker_id} holds unknown iteration {iteration_id}")]
    UnknownIteration {
        worker_id: WorkerId,
        iteration_id: IterationId,
    },

    /// The table offered a scenario the ledger already assigns to someone.
    #[error("iteration {iteration_id} is already held by worker {holder}")]
    AlreadyHeld {
        iteration_id: IterationId,
        holder: WorkerId,
    },

    /// The scenario dataset is missing or malformed.
    #[error("dataset {path}: {message}")]
    Dataset { path: String, message: String },

    /// The persisted ledger cannot be trusted.
    #[error("corrupt ledger snapshot {path}: {message}")]
    CorruptSnapshot { path: String, message: String },

    /// Writing the ledger snapshot failed.
    #[error("failed to persist ledger to {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl LedgerError {
    /// Returns true for errors caused by the caller rather than by local state.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::InvalidTransition { .. } | Self::AlreadyFinished { .. }
        )
    }

    /// Returns true for errors that must stop the process from serving.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Dataset { .. } | Self::CorruptSnapshot { .. } | Self::UnknownIteration { .. }
        )
    }
}

/// Result alias for ledger operations.
pub type Result<T, E = LedgerError> = std::result::Result<T, E>;
