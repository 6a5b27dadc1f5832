//! Shared test utilities for delegate integration tests.
//!
//! Each test gets its own scratch directory for the registry snapshot, so
//! tests can run in parallel without sharing state. The directory is removed
//! when the returned [`TestRegistryPath`] is dropped.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uuid::Uuid;

use delegate_store::{TaskRecord, TaskState};

/// A unique snapshot path inside a temporary directory.
pub struct TestRegistryPath {
    /// Held to keep the directory alive.
    _dir: TempDir,
    path: PathBuf,
}

impl TestRegistryPath {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The directory holding the snapshot (and any quarantined copies).
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Current file contents as a string.
    ///
    /// Panics if the file cannot be read.
    pub fn read(&self) -> String {
        fs::read_to_string(&self.path)
            .unwrap_or_else(|e| panic!("failed to read {}: {e}", self.path.display()))
    }

    /// Files in the directory whose name starts with `prefix`, sorted.
    pub fn files_with_prefix(&self, prefix: &str) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = fs::read_dir(self.dir())
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.path())
                    .filter(|p| {
                        p.file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.starts_with(prefix))
                    })
                    .collect()
            })
            .unwrap_or_default();
        found.sort();
        found
    }
}

/// Create a fresh snapshot path. Nothing is written yet.
pub fn temp_registry_path() -> TestRegistryPath {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir
        .path()
        .join(format!("tasks-{}.json", Uuid::new_v4().simple()));
    TestRegistryPath { _dir: dir, path }
}

/// Write `contents` at the snapshot path, as a damaged file would look.
pub fn write_corrupt_file(target: &TestRegistryPath, contents: &str) {
    fs::write(target.path(), contents)
        .unwrap_or_else(|e| panic!("failed to write {}: {e}", target.path().display()));
}

/// A record in `state` for subagent `finder`, started at 1000 ms.
///
/// Terminal records end at 2000 ms; failed ones carry code `backend_failed`
/// and message `boom`, so every record returned here validates.
pub fn sample_record(id: &str, state: TaskState) -> TaskRecord {
    let mut record = TaskRecord::queued(id, "finder", format!("describe {id}"), "look around", 1_000);
    record.state = state;
    if state.is_terminal() {
        record.ended_at_epoch_ms = Some(2_000);
        record.updated_at_epoch_ms = 2_000;
    }
    if state == TaskState::Failed {
        record.last_error_code = Some("backend_failed".to_string());
        record.last_error_message = Some("boom".to_string());
    }
    record
}
