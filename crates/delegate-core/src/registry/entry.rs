//! Registry entry types and the read-only views handed to callers.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use delegate_store::{PersistedEntry, TaskInvocation, TaskRecord, TaskState};

use crate::error::ErrorCode;
use crate::event::TaskEvent;

/// Resolves once a task's execution lifecycle has finished.
pub type CompletionHandle = Shared<BoxFuture<'static, ()>>;

/// Completing side of a [`CompletionHandle`]. Dropping it also resolves the
/// handle, so a panicked lifecycle never leaves waiters hanging.
#[derive(Debug)]
pub struct CompletionSignal(oneshot::Sender<()>);

impl CompletionSignal {
    pub fn complete(self) {
        let _ = self.0.send(());
    }
}

pub fn completion_pair() -> (CompletionSignal, CompletionHandle) {
    let (tx, rx) = oneshot::channel::<()>();
    let handle = async move {
        let _ = rx.await;
    }
    .boxed()
    .shared();
    (CompletionSignal(tx), handle)
}

/// Immutable view of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    #[serde(flatten)]
    pub record: TaskRecord,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    pub invocation: TaskInvocation,
    pub follow_up_prompts: Vec<String>,
    pub events: Vec<TaskEvent>,
    pub interaction_active: bool,
}

impl TaskSnapshot {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn state(&self) -> TaskState {
        self.record.state
    }

    pub fn is_terminal(&self) -> bool {
        self.record.state.is_terminal()
    }

    /// Concatenated assistant text seen so far.
    pub fn assistant_text(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                TaskEvent::AssistantDelta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn from_persisted(entry: PersistedEntry) -> Self {
        Self {
            record: entry.record,
            summary: entry.summary,
            output: entry.output,
            backend: entry.backend,
            provider: entry.provider,
            model: entry.model,
            runtime: entry.runtime,
            route: entry.route,
            invocation: entry.invocation,
            follow_up_prompts: entry.follow_up_prompts,
            events: Vec::new(),
            interaction_active: false,
        }
    }

    pub(crate) fn to_persisted(&self) -> PersistedEntry {
        PersistedEntry {
            record: self.record.clone(),
            summary: self.summary.clone(),
            output: self.output.clone(),
            backend: self.backend.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            runtime: self.runtime.clone(),
            route: self.route.clone(),
            invocation: self.invocation.clone(),
            follow_up_prompts: self.follow_up_prompts.clone(),
        }
    }
}

/// The registry-owned entry: the view plus the handles that never leave
/// the registry by value.
pub(crate) struct TaskRuntimeEntry {
    pub(crate) data: TaskSnapshot,
    pub(crate) abort: Option<CancellationToken>,
    pub(crate) completion: Option<CompletionHandle>,
    /// Insertion order, used for listings and the on-disk entry order.
    pub(crate) seq: u64,
}

/// Input to [`super::TaskRegistry::create_task`].
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub subagent_type: String,
    pub description: String,
    pub prompt: String,
    pub backend: String,
    pub invocation: TaskInvocation,
}

/// Observability tags reported by a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionMetadata {
    pub backend: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub runtime: Option<String>,
    pub route: Option<String>,
}

/// Final result recorded by [`super::TaskRegistry::mark_succeeded`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutcome {
    pub summary: String,
    pub output: String,
    pub metadata: ExecutionMetadata,
}

impl TaskOutcome {
    pub fn new(summary: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            output: output.into(),
            metadata: ExecutionMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: ExecutionMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of resolving a task id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRuntimeLookup {
    Found(TaskSnapshot),
    Missing {
        id: String,
        code: ErrorCode,
        message: String,
    },
}

impl TaskRuntimeLookup {
    pub fn found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn snapshot(&self) -> Option<&TaskSnapshot> {
        match self {
            Self::Found(snapshot) => Some(snapshot),
            Self::Missing { .. } => None,
        }
    }

    pub fn into_snapshot(self) -> Option<TaskSnapshot> {
        match self {
            Self::Found(snapshot) => Some(snapshot),
            Self::Missing { .. } => None,
        }
    }

    /// Resolved means found and terminal.
    pub fn is_resolved(&self) -> bool {
        self.snapshot().is_some_and(TaskSnapshot::is_terminal)
    }
}
