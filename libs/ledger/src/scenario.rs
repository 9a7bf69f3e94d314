//! The scenario dataset and its allocation flags.
//!
//! The dataset is a CSV file produced ahead of time. Scalar columns are typed
//! directly; nested columns (`start_gamma`, `start_emiss`) hold JSON arrays
//! encoded as strings and are decoded once here, so handlers never coerce
//! types per request.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use simalloc_id::IterationId;
use tracing::info;

use crate::error::{LedgerError, Result};

/// One schedulable simulation.
///
/// Serializes to the flat parameter mapping handed to workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub iteration_id: IterationId,
    pub scenario_id: String,
    /// Position of this iteration within its scenario.
    pub rank: i64,
    /// Number of subjects.
    pub n: i64,
    /// Number of occasions per subject.
    pub n_t: i64,
    /// Between-subject variance of the emission distributions.
    pub zeta: f64,
    /// Between-subject variance of the transition probabilities.
    pub q: f64,
    pub seed: i64,
    pub save_states: bool,
    /// Starting values for the transition matrix.
    pub start_gamma: Vec<Vec<f64>>,
    /// Starting values for the emission distributions, per dependent variable.
    pub start_emiss: Vec<Vec<Vec<f64>>>,
}

/// Raw CSV row before nested columns are decoded.
#[derive(Debug, Deserialize)]
struct ScenarioRow {
    iteration_id: String,
    scenario_id: String,
    rank: i64,
    n: i64,
    n_t: i64,
    zeta: f64,
    #[serde(alias = "Q")]
    q: f64,
    seed: i64,
    save_states: String,
    start_gamma: String,
    start_emiss: String,
}

impl ScenarioRow {
    fn decode(self) -> std::result::Result<Scenario, String> {
        let iteration_id = IterationId::parse(&self.iteration_id)
            .map_err(|e| format!("iteration_id '{}': {e}", self.iteration_id))?;
        let save_states = parse_flag(&self.save_states)
            .ok_or_else(|| format!("save_states '{}' is not a boolean", self.save_states))?;
        let start_gamma = serde_json::from_str(&self.start_gamma)
            .map_err(|e| format!("start_gamma: {e}"))?;
        let start_emiss = serde_json::from_str(&self.start_emiss)
            .map_err(|e| format!("start_emiss: {e}"))?;

        Ok(Scenario {
            iteration_id,
            scenario_id: self.scenario_id,
            rank: self.rank,
            n: self.n,
            n_t: self.n_t,
            zeta: self.zeta,
            q: self.q,
            seed: self.seed,
            save_states,
            start_gamma,
            start_emiss,
        })
    }
}

/// Accepts the boolean spellings dataframe exports produce.
fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim() {
        "true" | "True" | "TRUE" | "1" => Some(true),
        "false" | "False" | "FALSE" | "0" => Some(false),
        _ => None,
    }
}

/// The fixed universe of scenarios, in dataset order.
#[derive(Debug, Clone)]
pub struct ScenarioTable {
    scenarios: Vec<Scenario>,
    allocated: Vec<bool>,
    index: HashMap<IterationId, usize>,
    /// Every scenario before this position is allocated.
    cursor: usize,
    allocated_count: usize,
}

impl ScenarioTable {
    /// Load the dataset from a CSV file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| LedgerError::Dataset {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let table = Self::from_reader(file, &path.display().to_string())?;
        info!(
            path = %path.display(),
            scenarios = table.count(),
            "Scenario dataset loaded"
        );
        Ok(table)
    }

    /// Parse a dataset from any reader. `source` names it in errors.
    pub fn from_reader<R: Read>(reader: R, source: &str) -> Result<Self> {
        let dataset_error = |message: String| LedgerError::Dataset {
            path: source.to_string(),
            message,
        };

        let mut csv = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut scenarios = Vec::new();
        for (row_number, record) in csv.deserialize::<ScenarioRow>().enumerate() {
            // Header is line 1.
            let line = row_number + 2;
            let row = record.map_err(|e| dataset_error(format!("line {line}: {e}")))?;
            let scenario = row
                .decode()
                .map_err(|e| dataset_error(format!("line {line}: {e}")))?;
            scenarios.push(scenario);
        }

        Self::from_scenarios(scenarios).map_err(dataset_error)
    }

    /// Build a table from already-decoded scenarios.
    pub fn from_scenarios(scenarios: Vec<Scenario>) -> std::result::Result<Self, String> {
        if scenarios.is_empty() {
            return Err("dataset contains no scenarios".to_string());
        }

        let mut index = HashMap::with_capacity(scenarios.len());
        for (position, scenario) in scenarios.iter().enumerate() {
            if index
                .insert(scenario.iteration_id.clone(), position)
                .is_some()
            {
                return Err(format!(
                    "duplicate iteration_id '{}'",
                    scenario.iteration_id
                ));
            }
        }

        Ok(Self {
            allocated: vec![false; scenarios.len()],
            scenarios,
            index,
            cursor: 0,
            allocated_count: 0,
        })
    }

    /// First unallocated scenario in dataset order.
    pub fn next_unallocated(&self) -> Option<&Scenario> {
        self.allocated[self.cursor..]
            .iter()
            .position(|allocated| !allocated)
            .map(|offset| &self.scenarios[self.cursor + offset])
    }

    /// Mark a scenario as allocated. Returns false if the id is unknown.
    pub fn mark_allocated(&mut self, iteration_id: &IterationId) -> bool {
        let Some(&position) = self.index.get(iteration_id) else {
            return false;
        };
        if !self.allocated[position] {
            self.allocated[position] = true;
            self.allocated_count += 1;
        }
        while self.cursor < self.allocated.len() && self.allocated[self.cursor] {
            self.cursor += 1;
        }
        true
    }

    pub fn get(&self, iteration_id: &IterationId) -> Option<&Scenario> {
        self.index.get(iteration_id).map(|&i| &self.scenarios[i])
    }

    pub fn contains(&self, iteration_id: &IterationId) -> bool {
        self.index.contains_key(iteration_id)
    }

    pub fn is_allocated(&self, iteration_id: &IterationId) -> Option<bool> {
        self.index.get(iteration_id).map(|&i| self.allocated[i])
    }

    pub fn count(&self) -> usize {
        self.scenarios.len()
    }

    pub fn count_allocated(&self) -> usize {
        self.allocated_count
    }

    /// Scenarios in dataset order.
    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use simalloc_testing::{dataset_csv, iteration_id, DATASET_HEADER};

    fn id(raw: &str) -> IterationId {
        IterationId::parse(raw).unwrap()
    }

    fn table(count: usize) -> ScenarioTable {
        ScenarioTable::from_reader(dataset_csv(count).as_bytes(), "test").unwrap()
    }

    #[test]
    fn test_load_decodes_typed_fields() {
        let table = table(2);
        assert_eq!(table.count(), 2);
        assert_eq!(table.count_allocated(), 0);

        let first = table.get(&id("it0001")).unwrap();
        assert_eq!(first.scenario_id, "sc01");
        assert_eq!(first.n, 20);
        assert_eq!(first.q, 0.1);
        assert!(first.save_states);
        assert_eq!(first.start_gamma, vec![vec![0.7, 0.3], vec![0.2, 0.8]]);
        assert_eq!(first.start_emiss.len(), 2);
        assert_eq!(first.start_emiss[1][0], vec![-0.2, 1.0]);

        assert!(!table.get(&id("it0002")).unwrap().save_states);
    }

    #[test]
    fn test_scenario_serializes_with_portable_types() {
        let table = table(1);
        let json = serde_json::to_value(table.get(&id("it0001")).unwrap()).unwrap();
        assert!(json["n"].is_i64());
        assert!(json["zeta"].is_f64());
        assert!(json["save_states"].is_boolean());
        assert!(json["start_gamma"][0][0].is_f64());
        assert_eq!(json["iteration_id"], "it0001");
    }

    #[test]
    fn test_next_unallocated_follows_table_order() {
        let mut table = table(3);
        assert_eq!(table.next_unallocated().unwrap().iteration_id, id("it0001"));

        // Allocating out of order leaves the earlier scenario first.
        assert!(table.mark_allocated(&id("it0002")));
        assert_eq!(table.next_unallocated().unwrap().iteration_id, id("it0001"));

        table.mark_allocated(&id("it0001"));
        assert_eq!(table.next_unallocated().unwrap().iteration_id, id("it0003"));

        table.mark_allocated(&id("it0003"));
        assert!(table.next_unallocated().is_none());
        assert_eq!(table.count_allocated(), 3);
    }

    #[test]
    fn test_mark_allocated_is_idempotent() {
        let mut table = table(2);
        assert!(table.mark_allocated(&id("it0001")));
        assert!(table.mark_allocated(&id("it0001")));
        assert_eq!(table.count_allocated(), 1);
        assert_eq!(table.is_allocated(&id("it0001")), Some(true));
        assert_eq!(table.is_allocated(&id("it0002")), Some(false));
    }

    #[test]
    fn test_mark_allocated_unknown_id() {
        let mut table = table(1);
        assert!(!table.mark_allocated(&id("missing")));
        assert_eq!(table.count_allocated(), 0);
    }

    #[test]
    fn test_duplicate_iteration_rejected() {
        let csv = format!(
            "{DATASET_HEADER}\n{}\n{}\n",
            simalloc_testing::scenario_row(1),
            simalloc_testing::scenario_row(1)
        );
        let err = ScenarioTable::from_reader(csv.as_bytes(), "dup.csv").unwrap_err();
        assert!(matches!(err, LedgerError::Dataset { .. }));
        assert!(err.to_string().contains(&iteration_id(1)));
    }

    #[rstest]
    #[case::empty(format!("{DATASET_HEADER}\n"), "no scenarios")]
    #[case::bad_flag(
        format!("{DATASET_HEADER}\nit1,sc1,1,2,3,0.1,0.2,4,maybe,\"[[1]]\",\"[[[1]]]\"\n"),
        "save_states"
    )]
    #[case::bad_nested(
        format!("{DATASET_HEADER}\nit1,sc1,1,2,3,0.1,0.2,4,True,\"[[1]\",\"[[[1]]]\"\n"),
        "start_gamma"
    )]
    #[case::bad_number(
        format!("{DATASET_HEADER}\nit1,sc1,one,2,3,0.1,0.2,4,True,\"[[1]]\",\"[[[1]]]\"\n"),
        "line 2"
    )]
    fn test_malformed_dataset_is_fatal(#[case] csv: String, #[case] needle: &str) {
        let err = ScenarioTable::from_reader(csv.as_bytes(), "bad.csv").unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains(needle), "{err}");
    }

    #[test]
    fn test_missing_dataset_is_fatal() {
        let err = ScenarioTable::load("/nonexistent/scenarios.csv").unwrap_err();
        assert!(matches!(err, LedgerError::Dataset { .. }));
    }

    #[test]
    fn test_integer_literals_in_nested_columns_decode_as_floats() {
        let csv = format!("{DATASET_HEADER}\nit1,sc1,1,2,3,0.1,0.2,4,1,\"[[1,0],[0,1]]\",\"[[[1]]]\"\n");
        let table = ScenarioTable::from_reader(csv.as_bytes(), "ints.csv").unwrap();
        let scenario = table.get(&id("it1")).unwrap();
        assert_eq!(scenario.start_gamma, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(scenario.save_states);
    }
}
