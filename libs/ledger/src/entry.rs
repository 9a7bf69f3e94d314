//! Allocation entries and their status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use simalloc_id::IterationId;

/// Status of a worker's claim on a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStatus {
    /// The worker is running the scenario.
    Working,
    /// The worker reported success.
    Completed,
    /// The worker reported a failure.
    Error,
}

impl AllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Returns true once the worker has reported an outcome.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "working" => Ok(Self::Working),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown allocation status '{other}'")),
        }
    }
}

/// One worker's claim, keyed by worker id in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEntry {
    /// Scenario the worker holds.
    pub iteration_id: IterationId,
    pub status: AllocationStatus,
    /// Unix seconds at which the worker first requested work.
    pub requested_at: i64,
    /// Unix seconds at which the worker reported an outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    /// Failure message, only present when `status` is `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AllocationEntry {
    /// A fresh working entry.
    pub fn working(iteration_id: IterationId, requested_at: i64) -> Self {
        Self {
            iteration_id,
            status: AllocationStatus::Working,
            requested_at,
            finished_at: None,
            error_message: None,
        }
    }

    pub fn is_working(&self) -> bool {
        self.status == AllocationStatus::Working
    }
}
