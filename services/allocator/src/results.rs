//! On-disk storage for submitted simulation results.
//!
//! Each completed iteration gets one JSON document at
//! `<results_dir>/<iteration_id>.json`, written with
//! [`simalloc_ledger::write_atomic`] on the blocking pool so a crash never
//! leaves a truncated result behind.

use std::io;
use std::path::PathBuf;

use serde::Serialize;
use simalloc_id::IterationId;
use simalloc_ledger::write_atomic;

#[derive(Debug, Clone)]
pub struct ResultSink {
    dir: PathBuf,
}

impl ResultSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Final location of the result for `iteration_id`.
    pub fn path_for(&self, iteration_id: &IterationId) -> PathBuf {
        self.dir.join(format!("{iteration_id}.json"))
    }

    /// Write `result` for `iteration_id`, replacing any earlier submission.
    pub async fn write<T: Serialize>(
        &self,
        iteration_id: &IterationId,
        result: &T,
    ) -> io::Result<PathBuf> {
        let bytes = serde_json::to_vec_pretty(result).map_err(io::Error::other)?;
        let path = self.path_for(iteration_id);

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
            .await
            .map_err(io::Error::other)??;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use simalloc_testing::Workspace;

    #[tokio::test]
    async fn test_write_creates_file_named_after_iteration() {
        let ws = Workspace::new();
        let sink = ResultSink::new(ws.results_dir());
        let id = IterationId::parse("it0007").unwrap();

        let path = sink.write(&id, &json!({"gamma_int_bar": [0.5, 0.5]})).await.unwrap();

        assert_eq!(path, ws.results_dir().join("it0007.json"));
        let stored: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored["gamma_int_bar"][1], 0.5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_writes_all_succeed() {
        let ws = Workspace::new();
        let sink = ResultSink::new(ws.results_dir());
        let id = IterationId::parse("it0003").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|v| {
                let sink = sink.clone();
                let id = id.clone();
                tokio::spawn(async move { sink.write(&id, &json!({"v": v})).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let entries: Vec<_> = std::fs::read_dir(ws.results_dir()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let stored: serde_json::Value =
            serde_json::from_slice(&std::fs::read(sink.path_for(&id)).unwrap()).unwrap();
        assert!(stored["v"].as_u64().unwrap() < 8);
    }

    #[tokio::test]
    async fn test_resubmission_overwrites() {
        let ws = Workspace::new();
        let sink = ResultSink::new(ws.results_dir());
        let id = IterationId::parse("it0001").unwrap();

        sink.write(&id, &json!({"v": 1})).await.unwrap();
        sink.write(&id, &json!({"v": 2})).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(ws.results_dir()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let stored: serde_json::Value =
            serde_json::from_slice(&std::fs::read(sink.path_for(&id)).unwrap()).unwrap();
        assert_eq!(stored["v"], 2);
    }
}
