use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Every state, in lifecycle order.
    pub const ALL: [TaskState; 5] = [
        Self::Queued,
        Self::Running,
        Self::Succeeded,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Terminal states are absorbing: no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = TaskStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskState`] string.
#[derive(Debug, Clone)]
pub struct TaskStateParseError(pub String);

impl fmt::Display for TaskStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task state: {:?}", self.0)
    }
}

impl std::error::Error for TaskStateParseError {}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// The durable core of a task.
///
/// Timestamps are milliseconds since the Unix epoch. `ended_at_epoch_ms` is
/// present exactly when the state is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub subagent_type: String,
    pub description: String,
    pub prompt: String,
    pub state: TaskState,
    pub total_tool_calls: u32,
    pub active_tool_calls: u32,
    pub started_at_epoch_ms: i64,
    pub updated_at_epoch_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_epoch_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_message: Option<String>,
}

impl TaskRecord {
    /// Build a freshly queued record.
    pub fn queued(
        id: impl Into<String>,
        subagent_type: impl Into<String>,
        description: impl Into<String>,
        prompt: impl Into<String>,
        now_ms: i64,
    ) -> Self {
        Self {
            id: id.into(),
            subagent_type: subagent_type.into(),
            description: description.into(),
            prompt: prompt.into(),
            state: TaskState::Queued,
            total_tool_calls: 0,
            active_tool_calls: 0,
            started_at_epoch_ms: now_ms,
            updated_at_epoch_ms: now_ms,
            ended_at_epoch_ms: None,
            last_error_code: None,
            last_error_message: None,
        }
    }

    /// Check the structural invariants every stored record must satisfy.
    pub fn validate(&self) -> Result<(), RecordViolation> {
        if self.id.trim().is_empty() {
            return Err(RecordViolation::EmptyId);
        }
        let id = self.id.clone();
        if self.subagent_type.trim().is_empty() {
            return Err(RecordViolation::EmptySubagentType { id });
        }
        if self.active_tool_calls > self.total_tool_calls {
            return Err(RecordViolation::ActiveExceedsTotal {
                id,
                active: self.active_tool_calls,
                total: self.total_tool_calls,
            });
        }

        if self.state.is_terminal() {
            if self.active_tool_calls != 0 {
                return Err(RecordViolation::ActiveToolCallsOnTerminal {
                    id,
                    state: self.state,
                    active: self.active_tool_calls,
                });
            }
            let Some(ended) = self.ended_at_epoch_ms else {
                return Err(RecordViolation::MissingEnd {
                    id,
                    state: self.state,
                });
            };
            if ended < self.started_at_epoch_ms {
                return Err(RecordViolation::EndBeforeStart {
                    id,
                    started: self.started_at_epoch_ms,
                    ended,
                });
            }
        } else if self.ended_at_epoch_ms.is_some() {
            return Err(RecordViolation::UnexpectedEnd {
                id,
                state: self.state,
            });
        }

        if self.state == TaskState::Failed
            && self
                .last_error_message
                .as_deref()
                .is_none_or(|m| m.trim().is_empty())
        {
            return Err(RecordViolation::FailedWithoutMessage { id });
        }

        Ok(())
    }
}

/// A broken [`TaskRecord`] invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordViolation {
    #[error("task id is empty")]
    EmptyId,

    #[error("task {id}: subagent type is empty")]
    EmptySubagentType { id: String },

    #[error("task {id}: {active} active tool calls exceed total {total}")]
    ActiveExceedsTotal { id: String, active: u32, total: u32 },

    #[error("task {id}: terminal state {state} still has {active} active tool calls")]
    ActiveToolCallsOnTerminal {
        id: String,
        state: TaskState,
        active: u32,
    },

    #[error("task {id}: terminal state {state} has no end timestamp")]
    MissingEnd { id: String, state: TaskState },

    #[error("task {id}: state {state} is not terminal but carries an end timestamp")]
    UnexpectedEnd { id: String, state: TaskState },

    #[error("task {id}: ended at {ended} before it started at {started}")]
    EndBeforeStart { id: String, started: i64, ended: i64 },

    #[error("task {id}: failed without an error message")]
    FailedWithoutMessage { id: String },
}

/// How a task was invoked. Carried alongside the record so a reloaded
/// registry still knows which batch an entry belonged to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInvocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<usize>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
