use std::path::PathBuf;

/// I/O failures while reading or writing the snapshot file.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to quarantine corrupt file {}: {source}", path.display())]
    Quarantine {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    /// Stable error code reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Read { .. } => "persistence_read_failed",
            Self::Write { .. } | Self::Quarantine { .. } | Self::Serialize(_) => {
                "persistence_write_failed"
            }
        }
    }
}
