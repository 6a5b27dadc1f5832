//! The task registry: live task state, the transition functions that are
//! the only way to change it, and write-through persistence.
//!
//! The registry is a plain struct with `&mut self` methods. Concurrent
//! callers share it as a [`SharedRegistry`]; every method runs to completion
//! under the lock, so two mutations of the same task never interleave.

pub mod entry;
pub mod state;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use delegate_store::{LoadOutcome, PersistedSnapshot, SnapshotFile, TaskRecord, TaskState};

use crate::clock::Clock;
use crate::error::{ErrorCode, OperationError};
use crate::event::TaskEvent;

pub use entry::{
    CompletionHandle, CompletionSignal, ExecutionMetadata, NewTask, TaskOutcome, TaskRuntimeLookup,
    TaskSnapshot, completion_pair,
};
pub use state::TaskStateMachine;

use entry::TaskRuntimeEntry;

/// How the orchestrator and its helpers share one registry.
pub type SharedRegistry = Arc<Mutex<TaskRegistry>>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("illegal task state transition for {task_id}: {from} -> {to}")]
    IllegalTransition {
        task_id: String,
        from: TaskState,
        to: TaskState,
    },

    #[error("task id {0:?} already exists")]
    DuplicateTaskId(String),

    #[error("{message}")]
    Missing {
        id: String,
        code: ErrorCode,
        message: String,
    },

    #[error("task {task_id} is not resumable: {reason}")]
    NotResumable { task_id: String, reason: String },

    #[error("invalid task: {0}")]
    InvalidTask(String),
}

impl RegistryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::IllegalTransition { .. } => ErrorCode::IllegalTaskStateTransition,
            Self::DuplicateTaskId(_) => ErrorCode::DuplicateTaskId,
            Self::Missing { code, .. } => *code,
            Self::NotResumable { .. } => ErrorCode::TaskNotResumable,
            Self::InvalidTask(_) => ErrorCode::InvalidParams,
        }
    }
}

impl From<RegistryError> for OperationError {
    fn from(err: RegistryError) -> Self {
        OperationError::new(err.code(), err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// What happened to the snapshot file so far. Persistence problems land
/// here instead of failing the operation that triggered them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistenceDiagnostics {
    pub path: Option<PathBuf>,
    pub loaded_entries: usize,
    pub recovered_from_corrupt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantined_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrupt_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_error: Option<String>,
    /// Write-through was turned off because the existing file could not be
    /// read or moved aside; the file is left untouched.
    pub persistence_disabled: bool,
    pub write_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_write_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_saved_at_epoch_ms: Option<i64>,
}

impl PersistenceDiagnostics {
    /// Outstanding problems as coded messages.
    pub fn issues(&self) -> Vec<(ErrorCode, String)> {
        let mut issues = Vec::new();
        if self.recovered_from_corrupt {
            let location = self
                .quarantined_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            issues.push((
                ErrorCode::PersistenceCorrupt,
                format!(
                    "registry file was corrupt ({}); moved to {location}",
                    self.corrupt_reason.as_deref().unwrap_or("unknown reason")
                ),
            ));
        }
        if let Some(e) = &self.read_error {
            let message = if self.persistence_disabled {
                format!("{e}; changes this run will not be saved")
            } else {
                e.clone()
            };
            issues.push((ErrorCode::PersistenceReadFailed, message));
        }
        if let Some(e) = &self.last_write_error {
            issues.push((ErrorCode::PersistenceWriteFailed, e.clone()));
        }
        issues
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Construction options for [`TaskRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Snapshot file; `None` keeps the registry memory-only.
    pub path: Option<PathBuf>,
    pub retention: Duration,
}

impl RegistryConfig {
    pub const DEFAULT_RETENTION: Duration = Duration::from_millis(86_400_000);

    pub fn in_memory() -> Self {
        Self {
            path: None,
            retention: Self::DEFAULT_RETENTION,
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            retention: Self::DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

#[derive(Debug, Clone)]
struct Tombstone {
    reason: String,
    expired_at: i64,
}

pub struct TaskRegistry {
    entries: HashMap<String, TaskRuntimeEntry>,
    /// Expired ids, kept for one more retention window so lookups can say
    /// why the task is gone.
    tombstones: HashMap<String, Tombstone>,
    active_batches: HashSet<String>,
    file: Option<SnapshotFile>,
    clock: Arc<dyn Clock>,
    retention_ms: i64,
    diagnostics: PersistenceDiagnostics,
    revision: watch::Sender<u64>,
    next_seq: u64,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("entries", &self.entries.len())
            .field("tombstones", &self.tombstones.len())
            .field("path", &self.diagnostics.path)
            .finish()
    }
}

impl TaskRegistry {
    /// Expired ids remembered at most.
    pub const MAX_TOMBSTONES: usize = 1_024;

    /// Build a registry, loading the snapshot file when one is configured.
    ///
    /// Loading never fails: a corrupt file is quarantined and an unreadable
    /// one is skipped, both recorded in [`PersistenceDiagnostics`]. When the
    /// file can be neither read nor quarantined the registry runs
    /// memory-only for the rest of the process.
    pub fn new(config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        let retention_ms = i64::try_from(config.retention.as_millis()).unwrap_or(i64::MAX);
        let (revision, _) = watch::channel(0);
        let mut registry = Self {
            entries: HashMap::new(),
            tombstones: HashMap::new(),
            active_batches: HashSet::new(),
            file: config.path.clone().map(SnapshotFile::new),
            clock,
            retention_ms,
            diagnostics: PersistenceDiagnostics {
                path: config.path,
                ..PersistenceDiagnostics::default()
            },
            revision,
            next_seq: 0,
        };
        registry.load();
        registry
    }

    /// Memory-only registry on the system clock.
    pub fn in_memory() -> Self {
        Self::new(RegistryConfig::in_memory(), Arc::new(crate::clock::SystemClock))
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    fn load(&mut self) {
        let Some(file) = &self.file else {
            return;
        };
        let now = self.clock.now_ms();
        match file.load(now) {
            Ok(LoadOutcome::Missing) => {}
            Ok(LoadOutcome::Loaded(snapshot)) => {
                self.diagnostics.loaded_entries = snapshot.entries.len();
                for entry in snapshot.entries {
                    let seq = self.bump_seq();
                    let data = TaskSnapshot::from_persisted(entry);
                    self.entries.insert(
                        data.record.id.clone(),
                        TaskRuntimeEntry {
                            data,
                            abort: None,
                            completion: None,
                            seq,
                        },
                    );
                }
            }
            Ok(LoadOutcome::Recovered(recovery)) => {
                self.diagnostics.recovered_from_corrupt = true;
                self.diagnostics.quarantined_path = Some(recovery.quarantined_path);
                self.diagnostics.corrupt_reason = Some(recovery.reason);
            }
            Err(e) => {
                // Saving now would replace a file nobody has seen.
                warn!(error = %e, "failed to read task registry; starting empty without persistence");
                self.diagnostics.read_error = Some(e.to_string());
                self.diagnostics.persistence_disabled = true;
                self.file = None;
            }
        }
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Expired ids still remembered.
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    // -----------------------------------------------------------------------
    // Creation and transitions
    // -----------------------------------------------------------------------

    /// Register a new task in `queued`.
    pub fn create_task(&mut self, task: NewTask) -> Result<TaskSnapshot, RegistryError> {
        let now = self.prune();
        if task.id.trim().is_empty() {
            return Err(RegistryError::InvalidTask("task id is empty".to_string()));
        }
        if task.subagent_type.trim().is_empty() {
            return Err(RegistryError::InvalidTask("subagent type is empty".to_string()));
        }
        if self.entries.contains_key(&task.id) || self.tombstones.contains_key(&task.id) {
            return Err(RegistryError::DuplicateTaskId(task.id));
        }

        let record = TaskRecord::queued(
            task.id.clone(),
            task.subagent_type,
            task.description,
            task.prompt,
            now,
        );
        let data = TaskSnapshot {
            record,
            summary: "Queued".to_string(),
            output: None,
            backend: task.backend,
            provider: None,
            model: None,
            runtime: None,
            route: None,
            invocation: task.invocation,
            follow_up_prompts: Vec::new(),
            events: Vec::new(),
            interaction_active: false,
        };
        let snapshot = data.clone();
        let seq = self.bump_seq();
        self.entries.insert(
            task.id.clone(),
            TaskRuntimeEntry {
                data,
                abort: None,
                completion: None,
                seq,
            },
        );
        info!(task_id = %task.id, subagent = %snapshot.record.subagent_type, "task created");
        self.commit(true);
        Ok(snapshot)
    }

    pub fn mark_running(
        &mut self,
        id: &str,
        summary: impl Into<String>,
    ) -> Result<TaskSnapshot, RegistryError> {
        let summary = summary.into();
        self.transition(id, TaskState::Running, |data| {
            data.summary = summary;
        })
    }

    pub fn mark_succeeded(
        &mut self,
        id: &str,
        outcome: TaskOutcome,
    ) -> Result<TaskSnapshot, RegistryError> {
        self.transition(id, TaskState::Succeeded, |data| {
            data.summary = outcome.summary;
            data.output = Some(outcome.output);
            apply_metadata(data, outcome.metadata);
        })
    }

    pub fn mark_failed(
        &mut self,
        id: &str,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Result<TaskSnapshot, RegistryError> {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = code.as_str().to_string();
        }
        self.transition(id, TaskState::Failed, |data| {
            data.summary = format!("Failed: {}", first_line(&message));
            data.record.last_error_code = Some(code.as_str().to_string());
            data.record.last_error_message = Some(message);
        })
    }

    /// Cancel a task. On a task that is already terminal this returns the
    /// existing snapshot unchanged.
    pub fn mark_cancelled(
        &mut self,
        id: &str,
        reason: impl Into<String>,
    ) -> Result<TaskSnapshot, RegistryError> {
        self.prune();
        let Some(entry) = self.entries.get(id) else {
            return Err(self.missing(id));
        };
        if entry.data.is_terminal() {
            debug!(task_id = %id, state = %entry.data.state(), "cancel on terminal task ignored");
            return Ok(entry.data.clone());
        }
        let reason = reason.into();
        self.transition(id, TaskState::Cancelled, |data| {
            data.summary = reason;
        })
    }

    /// Store execution metadata on a running task without changing state.
    pub fn record_metadata(
        &mut self,
        id: &str,
        metadata: ExecutionMetadata,
    ) -> Result<(), RegistryError> {
        let Some(entry) = self.entries.get_mut(id) else {
            return Err(self.missing(id));
        };
        apply_metadata(&mut entry.data, metadata);
        self.commit(true);
        Ok(())
    }

    fn transition(
        &mut self,
        id: &str,
        to: TaskState,
        apply: impl FnOnce(&mut TaskSnapshot),
    ) -> Result<TaskSnapshot, RegistryError> {
        let now = self.prune();
        let Some(entry) = self.entries.get_mut(id) else {
            return Err(self.missing(id));
        };
        let from = entry.data.record.state;
        if !TaskStateMachine::is_valid_transition(from, to) {
            return Err(RegistryError::IllegalTransition {
                task_id: id.to_string(),
                from,
                to,
            });
        }

        let data = &mut entry.data;
        data.record.state = to;
        data.record.updated_at_epoch_ms = now;
        if to.is_terminal() {
            data.record.ended_at_epoch_ms = Some(now.max(data.record.started_at_epoch_ms));
            data.record.active_tool_calls = 0;
            data.interaction_active = false;
        }
        apply(data);
        let snapshot = data.clone();

        if to.is_terminal() {
            info!(task_id = %id, from = %from, to = %to, "task finished");
        } else {
            debug!(task_id = %id, from = %from, to = %to, "task transition");
        }
        self.commit(true);
        Ok(snapshot)
    }

    // -----------------------------------------------------------------------
    // Interactions
    // -----------------------------------------------------------------------

    /// Open a follow-up interaction on a running task.
    pub fn mark_interaction_running(
        &mut self,
        id: &str,
        prompt: impl Into<String>,
        summary: impl Into<String>,
    ) -> Result<TaskSnapshot, RegistryError> {
        let now = self.prune();
        let Some(entry) = self.entries.get_mut(id) else {
            return Err(self.missing(id));
        };
        let data = &mut entry.data;
        if data.record.state != TaskState::Running {
            return Err(RegistryError::NotResumable {
                task_id: id.to_string(),
                reason: format!("task is {}", data.record.state),
            });
        }
        if data.interaction_active {
            return Err(RegistryError::NotResumable {
                task_id: id.to_string(),
                reason: "another interaction is already running".to_string(),
            });
        }
        data.interaction_active = true;
        data.follow_up_prompts.push(prompt.into());
        data.summary = summary.into();
        data.record.updated_at_epoch_ms = now;
        let snapshot = data.clone();
        self.commit(true);
        Ok(snapshot)
    }

    /// Close the open interaction and store its output. The task stays
    /// `running`.
    pub fn mark_interaction_complete(
        &mut self,
        id: &str,
        summary: impl Into<String>,
        output: impl Into<String>,
    ) -> Result<TaskSnapshot, RegistryError> {
        let now = self.prune();
        let Some(entry) = self.entries.get_mut(id) else {
            return Err(self.missing(id));
        };
        let data = &mut entry.data;
        if data.record.state != TaskState::Running || !data.interaction_active {
            return Err(RegistryError::NotResumable {
                task_id: id.to_string(),
                reason: "no interaction is running".to_string(),
            });
        }
        data.interaction_active = false;
        data.summary = summary.into();
        data.output = Some(output.into());
        data.record.updated_at_epoch_ms = now;
        let snapshot = data.clone();
        self.commit(true);
        Ok(snapshot)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Append a backend event. Events that arrive after the task reached a
    /// terminal state are dropped.
    pub fn append_event(&mut self, id: &str, event: TaskEvent) -> Result<(), RegistryError> {
        let now = self.prune();
        let Some(entry) = self.entries.get_mut(id) else {
            return Err(self.missing(id));
        };
        let data = &mut entry.data;
        if data.is_terminal() {
            debug!(task_id = %id, "dropping event for terminal task");
            return Ok(());
        }

        match &event {
            TaskEvent::ToolStart { .. } => {
                data.record.total_tool_calls += 1;
                data.record.active_tool_calls += 1;
            }
            TaskEvent::ToolEnd { .. } => {
                data.record.active_tool_calls = data.record.active_tool_calls.saturating_sub(1);
            }
            _ => {}
        }
        data.record.updated_at_epoch_ms = now;
        let persist = event.touches_tool_counters();
        data.events.push(event);
        self.commit(persist);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn get_task(&mut self, id: &str) -> TaskRuntimeLookup {
        self.prune();
        self.lookup(id)
    }

    pub fn get_tasks(&mut self, ids: &[String]) -> Vec<TaskRuntimeLookup> {
        self.prune();
        ids.iter().map(|id| self.lookup(id)).collect()
    }

    /// Every live task in creation order.
    pub fn list_tasks(&mut self) -> Vec<TaskSnapshot> {
        self.prune();
        let mut entries: Vec<&TaskRuntimeEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.data.clone()).collect()
    }

    fn lookup(&self, id: &str) -> TaskRuntimeLookup {
        match self.entries.get(id) {
            Some(entry) => TaskRuntimeLookup::Found(entry.data.clone()),
            None => match self.missing(id) {
                RegistryError::Missing { id, code, message } => {
                    TaskRuntimeLookup::Missing { id, code, message }
                }
                other => TaskRuntimeLookup::Missing {
                    id: id.to_string(),
                    code: other.code(),
                    message: other.to_string(),
                },
            },
        }
    }

    fn missing(&self, id: &str) -> RegistryError {
        if let Some(tombstone) = self.tombstones.get(id) {
            return RegistryError::Missing {
                id: id.to_string(),
                code: ErrorCode::TaskExpired,
                message: tombstone.reason.clone(),
            };
        }
        let mut message = format!("task {id} not found");
        if let Some(path) = &self.diagnostics.quarantined_path {
            message.push_str(&format!(
                " (the registry was recovered from a corrupt file, quarantined at {}; \
                 earlier tasks may be missing)",
                path.display()
            ));
        }
        RegistryError::Missing {
            id: id.to_string(),
            code: ErrorCode::TaskNotFound,
            message,
        }
    }

    // -----------------------------------------------------------------------
    // Handles
    // -----------------------------------------------------------------------

    pub fn set_abort_handle(
        &mut self,
        id: &str,
        token: CancellationToken,
    ) -> Result<(), RegistryError> {
        let Some(entry) = self.entries.get_mut(id) else {
            return Err(self.missing(id));
        };
        entry.abort = Some(token);
        Ok(())
    }

    pub fn abort_handle(&self, id: &str) -> Option<CancellationToken> {
        self.entries.get(id).and_then(|e| e.abort.clone())
    }

    pub fn set_completion_handle(
        &mut self,
        id: &str,
        handle: CompletionHandle,
    ) -> Result<(), RegistryError> {
        let Some(entry) = self.entries.get_mut(id) else {
            return Err(self.missing(id));
        };
        entry.completion = Some(handle);
        Ok(())
    }

    pub fn completion_handle(&self, id: &str) -> Option<CompletionHandle> {
        self.entries.get(id).and_then(|e| e.completion.clone())
    }

    // -----------------------------------------------------------------------
    // Batches, retention and recovery
    // -----------------------------------------------------------------------

    /// Items of an active batch are exempt from retention pruning.
    pub fn begin_batch(&mut self, batch_id: impl Into<String>) {
        self.active_batches.insert(batch_id.into());
    }

    pub fn end_batch(&mut self, batch_id: &str) {
        self.active_batches.remove(batch_id);
        self.prune();
    }

    /// Expire terminal tasks past retention. Returns the current time.
    fn prune(&mut self) -> i64 {
        let now = self.clock.now_ms();
        let retention = self.retention_ms;
        self.prune_tombstones(now);
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| {
                let Some(ended) = e.data.record.ended_at_epoch_ms else {
                    return false;
                };
                let in_active_batch = e
                    .data
                    .invocation
                    .batch_id
                    .as_ref()
                    .is_some_and(|b| self.active_batches.contains(b));
                now.saturating_sub(ended) > retention && !in_active_batch
            })
            .map(|e| e.data.record.id.clone())
            .collect();

        if expired.is_empty() {
            return now;
        }
        for id in expired {
            if let Some(entry) = self.entries.remove(&id) {
                let state = entry.data.state();
                info!(task_id = %id, state = %state, "task expired by retention");
                self.tombstones.insert(
                    id.clone(),
                    Tombstone {
                        reason: format!(
                            "task {id} expired: it finished as {state} more than {retention}ms ago"
                        ),
                        expired_at: now,
                    },
                );
            }
        }
        self.prune_tombstones(now);
        self.commit(true);
        now
    }

    /// Forget tombstones older than one retention window, then the oldest
    /// beyond [`Self::MAX_TOMBSTONES`].
    fn prune_tombstones(&mut self, now: i64) {
        let retention = self.retention_ms;
        self.tombstones
            .retain(|_, t| now.saturating_sub(t.expired_at) <= retention);
        let excess = self.tombstones.len().saturating_sub(Self::MAX_TOMBSTONES);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(i64, String)> = self
            .tombstones
            .iter()
            .map(|(id, t)| (t.expired_at, id.clone()))
            .collect();
        by_age.sort_unstable();
        for (_, id) in by_age.into_iter().take(excess) {
            self.tombstones.remove(&id);
        }
        debug!(dropped = excess, "tombstone cap reached");
    }

    /// Settle tasks left non-terminal by a previous process: `running`
    /// becomes `failed` with `task_orphaned`, `queued` becomes `cancelled`.
    /// Returns the affected ids.
    pub fn recover_orphans(&mut self) -> Vec<String> {
        let mut orphans: Vec<(u64, String, TaskState)> = self
            .entries
            .values()
            .filter(|e| !e.data.is_terminal() && e.completion.is_none())
            .map(|e| (e.seq, e.data.record.id.clone(), e.data.state()))
            .collect();
        orphans.sort_by_key(|(seq, _, _)| *seq);

        let mut recovered = Vec::with_capacity(orphans.len());
        for (_, id, state) in orphans {
            let result = match state {
                TaskState::Running => self.mark_failed(
                    &id,
                    ErrorCode::TaskOrphaned,
                    "task was still running when its previous process exited",
                ),
                _ => self.mark_cancelled(&id, "Cancelled: never started before restart"),
            };
            match result {
                Ok(_) => {
                    warn!(task_id = %id, previous = %state, "recovered orphaned task");
                    recovered.push(id);
                }
                Err(e) => warn!(task_id = %id, error = %e, "failed to recover orphaned task"),
            }
        }
        recovered
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn persistence_diagnostics(&self) -> PersistenceDiagnostics {
        self.diagnostics.clone()
    }

    /// Watch channel bumped on every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn commit(&mut self, persist: bool) {
        self.revision.send_modify(|rev| *rev += 1);
        if persist {
            self.persist();
        }
    }

    fn persist(&mut self) {
        let Some(file) = &self.file else {
            return;
        };
        let now = self.clock.now_ms();
        let mut entries: Vec<&TaskRuntimeEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        let snapshot = PersistedSnapshot::new(
            now,
            entries.into_iter().map(|e| e.data.to_persisted()).collect(),
        );

        match file.save(&snapshot) {
            Ok(()) => {
                self.diagnostics.last_saved_at_epoch_ms = Some(now);
                self.diagnostics.last_write_error = None;
            }
            Err(e) => {
                warn!(path = %file.path().display(), error = %e, "failed to persist task registry");
                self.diagnostics.write_failures += 1;
                self.diagnostics.last_write_error = Some(e.to_string());
            }
        }
    }
}

fn apply_metadata(data: &mut TaskSnapshot, metadata: ExecutionMetadata) {
    if let Some(backend) = metadata.backend {
        data.backend = backend;
    }
    if metadata.provider.is_some() {
        data.provider = metadata.provider;
    }
    if metadata.model.is_some() {
        data.model = metadata.model;
    }
    if metadata.runtime.is_some() {
        data.runtime = metadata.runtime;
    }
    if metadata.route.is_some() {
        data.route = metadata.route;
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
