//! Shared fixtures for simalloc tests.
//!
//! Everything here writes into a private temporary directory that is removed
//! when the [`Workspace`] is dropped, so tests can run in parallel.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Header row of the scenario dataset, in the column order the allocator expects.
pub const DATASET_HEADER: &str =
    "iteration_id,scenario_id,rank,n,n_t,zeta,Q,seed,save_states,start_gamma,start_emiss";

/// Iteration id used for the `i`-th (1-based) generated scenario.
pub fn iteration_id(i: usize) -> String {
    format!("it{i:04}")
}

/// A single dataset row. Nested columns are JSON strings, quoted for CSV.
pub fn scenario_row(i: usize) -> String {
    let scenario = (i - 1) / 2 + 1;
    let rank = (i - 1) % 2 + 1;
    let save_states = if i % 2 == 0 { "False" } else { "True" };
    format!(
        "{id},sc{scenario:02},{rank},{n},{n_t},{zeta},{q},{seed},{save_states},\"{gamma}\",\"{emiss}\"",
        id = iteration_id(i),
        n = 20 * scenario,
        n_t = 400,
        zeta = 0.25,
        q = 0.1,
        seed = 1000 + i,
        gamma = "[[0.7,0.3],[0.2,0.8]]",
        emiss = "[[[1.5,0.5],[2.5,0.5]],[[-0.2,1],[0.4,1]]]",
    )
}

/// A dataset with `count` scenarios named `it0001..`.
pub fn dataset_csv(count: usize) -> String {
    let mut csv = String::from(DATASET_HEADER);
    csv.push('\n');
    for i in 1..=count {
        csv.push_str(&scenario_row(i));
        csv.push('\n');
    }
    csv
}

/// Temporary directory laid out like a server data directory.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create an empty workspace.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp workspace");
        Self { dir }
    }

    /// Create a workspace whose dataset holds `count` generated scenarios.
    pub fn with_dataset(count: usize) -> Self {
        let workspace = Self::new();
        workspace.write_dataset(&dataset_csv(count));
        workspace
    }

    /// Root directory of the workspace.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.dir.path().join("scenarios.csv")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.path().join("state").join("allocations.json")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.dir.path().join("results")
    }

    /// Overwrite the dataset file.
    pub fn write_dataset(&self, contents: &str) {
        fs::write(self.dataset_path(), contents).expect("write dataset");
    }

    /// Overwrite the persisted ledger, creating its directory if needed.
    pub fn write_ledger(&self, contents: &str) {
        let path = self.ledger_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create ledger dir");
        }
        fs::write(path, contents).expect("write ledger");
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}
