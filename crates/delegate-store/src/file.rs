//! Load, save and quarantine the snapshot file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::StoreError;
use crate::snapshot::PersistedSnapshot;

/// Details of a corrupt file that was moved aside on load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptRecovery {
    pub quarantined_path: PathBuf,
    pub reason: String,
}

/// Result of [`SnapshotFile::load`].
#[derive(Debug)]
pub enum LoadOutcome {
    /// No file yet; start empty.
    Missing,
    Loaded(PersistedSnapshot),
    /// The file was unreadable as a snapshot and has been quarantined.
    Recovered(CorruptRecovery),
}

/// Handle on the snapshot file path.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot.
    ///
    /// A file that is not UTF-8, not JSON, or fails validation is renamed to
    /// `<path>.corrupt-<now_ms>` and reported as [`LoadOutcome::Recovered`].
    /// Only I/O failures reading an existing file are errors.
    pub fn load(&self, now_ms: i64) -> Result<LoadOutcome, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LoadOutcome::Missing),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let parsed = match String::from_utf8(bytes) {
            Ok(text) => PersistedSnapshot::from_json(&text).map_err(|e| e.to_string()),
            Err(e) => Err(format!("snapshot is not valid UTF-8: {e}")),
        };

        match parsed {
            Ok(snapshot) => {
                info!(
                    path = %self.path.display(),
                    entries = snapshot.entries.len(),
                    "loaded task snapshot"
                );
                Ok(LoadOutcome::Loaded(snapshot))
            }
            Err(reason) => {
                let quarantined_path = self.quarantine(now_ms)?;
                warn!(
                    path = %self.path.display(),
                    quarantined = %quarantined_path.display(),
                    reason = %reason,
                    "snapshot file was corrupt; starting empty"
                );
                Ok(LoadOutcome::Recovered(CorruptRecovery {
                    quarantined_path,
                    reason,
                }))
            }
        }
    }

    /// Write the full snapshot: temp file in the same directory, then rename.
    pub fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), StoreError> {
        let content = snapshot.to_json()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let temp_path = self.sibling(".tmp");
        fs::write(&temp_path, content).map_err(|source| StoreError::Write {
            path: temp_path.clone(),
            source,
        })?;
        fs::rename(&temp_path, &self.path).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Move the current file aside, never overwriting an earlier quarantine.
    fn quarantine(&self, now_ms: i64) -> Result<PathBuf, StoreError> {
        let base = format!(".corrupt-{now_ms}");
        let mut target = self.sibling(&base);
        let mut n = 1;
        while target.exists() {
            target = self.sibling(&format!("{base}-{n}"));
            n += 1;
        }
        fs::rename(&self.path, &target).map_err(|source| StoreError::Quarantine {
            path: self.path.clone(),
            source,
        })?;
        Ok(target)
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_appends_suffix() {
        let file = SnapshotFile::new("/tmp/x/tasks.json");
        assert_eq!(
            file.sibling(".corrupt-5"),
            PathBuf::from("/tmp/x/tasks.json.corrupt-5")
        );
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("tasks.json"));
        assert!(matches!(file.load(1).unwrap(), LoadOutcome::Missing));
    }
}
