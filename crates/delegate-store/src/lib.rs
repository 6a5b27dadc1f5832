//! Durable storage for delegated tasks.
//!
//! The registry in `delegate-core` keeps its live state in memory and writes
//! the full entry set through a [`SnapshotFile`] after every mutation. This
//! crate owns the on-disk shape of that file: the task data model, the
//! versioned snapshot envelope, and the load / save / quarantine logic.

pub mod config;
pub mod error;
pub mod file;
pub mod models;
pub mod snapshot;

pub use config::StoreConfig;
pub use error::StoreError;
pub use file::{CorruptRecovery, LoadOutcome, SnapshotFile};
pub use models::{RecordViolation, TaskInvocation, TaskRecord, TaskState, TaskStateParseError};
pub use snapshot::{PersistedEntry, PersistedSnapshot, SCHEMA_VERSION, SnapshotError};
