//! Ledger persistence backends.
//!
//! The ledger writes a full [`LedgerSnapshot`] after every mutation. Writes
//! through [`JsonFileStore`] use [`write_atomic`], so a crash mid-write leaves
//! the previous snapshot intact.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::snapshot::LedgerSnapshot;

/// Where the ledger snapshot lives.
pub trait LedgerStore: Send + Sync {
    /// Load the last saved snapshot, or `None` if nothing was ever saved.
    fn load(&self) -> Result<Option<LedgerSnapshot>>;

    /// Replace the saved snapshot.
    fn save(&self, snapshot: &LedgerSnapshot) -> Result<()>;

    /// Human-readable location, for logs and errors.
    fn location(&self) -> String;
}

/// JSON file on local disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn persist_error(&self, source: io::Error) -> LedgerError {
        LedgerError::Persist {
            path: self.location(),
            source,
        }
    }

}

/// Replace `path` with `bytes` so readers see either the old or the new
/// contents, never a partial write.
///
/// Writes to a uniquely named temp file in the target directory (created if
/// missing), syncs it, then renames it over `path`. Concurrent writers to the
/// same path do not collide; the last rename wins.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl LedgerStore for JsonFileStore {
    fn load(&self) -> Result<Option<LedgerSnapshot>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LedgerError::CorruptSnapshot {
                    path: self.location(),
                    message: e.to_string(),
                })
            }
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| LedgerError::CorruptSnapshot {
                path: self.location(),
                message: e.to_string(),
            })
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| self.persist_error(io::Error::other(e)))?;
        write_atomic(&self.path, &bytes).map_err(|e| self.persist_error(e))?;
        debug!(
            path = %self.path.display(),
            entries = snapshot.allocations.len(),
            "Ledger snapshot written"
        );
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<LedgerSnapshot>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with a snapshot, as if left by a previous run.
    pub fn with_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            ..Self::default()
        }
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.fail_saves.store(failing, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// The last successfully saved snapshot.
    pub fn current(&self) -> Option<LedgerSnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<Option<LedgerSnapshot>> {
        Ok(self.current())
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(LedgerError::Persist {
                path: self.location(),
                source: io::Error::other("simulated write failure"),
            });
        }
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AllocationEntry;
    use simalloc_id::{IterationId, WorkerId};
    use simalloc_testing::Workspace;

    fn snapshot() -> LedgerSnapshot {
        let mut snapshot = LedgerSnapshot::default();
        snapshot.allocations.insert(
            WorkerId::parse("w1").unwrap(),
            AllocationEntry::working(IterationId::parse("it0001").unwrap(), 42),
        );
        snapshot.iterations = snapshot.derived_iterations();
        snapshot
    }

    #[test]
    fn test_json_store_missing_file_is_first_boot() {
        let ws = Workspace::new();
        let store = JsonFileStore::new(ws.ledger_path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_json_store_roundtrip_creates_directory() {
        let ws = Workspace::new();
        let store = JsonFileStore::new(ws.ledger_path());
        store.save(&snapshot()).unwrap();

        assert_eq!(store.load().unwrap(), Some(snapshot()));
        // No temp files left next to the snapshot.
        let leftovers = fs::read_dir(ws.ledger_path().parent().unwrap())
            .unwrap()
            .count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_json_store_overwrites_previous_snapshot() {
        let ws = Workspace::new();
        let store = JsonFileStore::new(ws.ledger_path());
        store.save(&snapshot()).unwrap();
        store.save(&LedgerSnapshot::default()).unwrap();
        assert_eq!(store.load().unwrap(), Some(LedgerSnapshot::default()));
    }

    #[test]
    fn test_json_store_malformed_is_corrupt() {
        let ws = Workspace::new();
        ws.write_ledger("{\"allocations\": {\"w1\": ");
        let store = JsonFileStore::new(ws.ledger_path());
        assert!(matches!(
            store.load().unwrap_err(),
            LedgerError::CorruptSnapshot { .. }
        ));
    }

    #[test]
    fn test_json_store_empty_file_is_corrupt() {
        let ws = Workspace::new();
        ws.write_ledger("");
        let store = JsonFileStore::new(ws.ledger_path());
        assert!(store.load().unwrap_err().is_fatal());
    }

    #[test]
    fn test_json_store_save_failure() {
        let ws = Workspace::new();
        // A regular file where the state directory should be.
        fs::write(ws.path().join("state"), b"not a dir").unwrap();
        let store = JsonFileStore::new(ws.ledger_path());
        assert!(matches!(
            store.save(&snapshot()).unwrap_err(),
            LedgerError::Persist { .. }
        ));
    }

    #[test]
    fn test_write_atomic_concurrent_writers() {
        let ws = Workspace::new();
        let path = ws.path().join("out").join("it0001.json");

        std::thread::scope(|scope| {
            for i in 0..8 {
                let path = &path;
                scope.spawn(move || {
                    write_atomic(path, format!("{{\"v\":{i}}}").as_bytes()).unwrap();
                });
            }
        });

        let stored: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(stored["v"].as_u64().unwrap() < 8);
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_memory_store_failing_toggle() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(store.save(&snapshot()).is_err());
        assert_eq!(store.save_count(), 0);
        assert!(store.current().is_none());

        store.set_failing(false);
        store.save(&snapshot()).unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load().unwrap(), Some(snapshot()));
    }
}
