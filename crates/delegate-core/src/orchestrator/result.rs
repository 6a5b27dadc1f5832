//! The payload every operation returns.

use std::fmt;

use delegate_store::TaskState;
use serde::Serialize;

use crate::error::{ErrorCategory, ErrorCode, OperationError};
use crate::registry::TaskSnapshot;
use crate::transcript::{ToolRow, tool_rows};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Status reported for a task in `state`. Non-terminal tasks count as
    /// succeeded so far.
    pub fn for_state(state: TaskState) -> Self {
        match state {
            TaskState::Failed => Self::Failed,
            TaskState::Cancelled => Self::Cancelled,
            TaskState::Queued | TaskState::Running | TaskState::Succeeded => Self::Succeeded,
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStatus {
    Completed,
    Timeout,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every item accepted, some still running.
    Accepted,
    /// Some items rejected before scheduling.
    Partial,
    /// Every item accepted and terminal.
    Completed,
    /// No item accepted.
    Rejected,
}

// ---------------------------------------------------------------------------
// Output budget
// ---------------------------------------------------------------------------

/// Output after applying the character budget.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputView {
    pub text: Option<String>,
    pub available: bool,
    pub truncated: Option<bool>,
    pub total_chars: Option<usize>,
    pub returned_chars: Option<usize>,
}

/// Cut `output` to at most `budget` characters, on a char boundary.
pub fn truncate_output(output: Option<&str>, budget: usize) -> OutputView {
    let Some(output) = output.filter(|o| !o.is_empty()) else {
        return OutputView::default();
    };
    let total = output.chars().count();
    if total <= budget {
        return OutputView {
            text: Some(output.to_string()),
            available: true,
            truncated: None,
            total_chars: None,
            returned_chars: None,
        };
    }
    let cut = output
        .char_indices()
        .nth(budget)
        .map(|(i, _)| i)
        .unwrap_or(output.len());
    OutputView {
        text: Some(output[..cut].to_string()),
        available: true,
        truncated: Some(true),
        total_chars: Some(total),
        returned_chars: Some(budget),
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// One task inside a batch, status or wait result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subagent_type: Option<String>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub output_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_total_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_returned_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_rows: Option<Vec<ToolRow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ResultItem {
    fn empty(found: bool, summary: String) -> Self {
        Self {
            index: None,
            task_id: None,
            found,
            state: None,
            subagent_type: None,
            summary,
            backend: None,
            provider: None,
            model: None,
            runtime: None,
            route: None,
            output: None,
            output_available: false,
            output_truncated: None,
            output_total_chars: None,
            output_returned_chars: None,
            tool_rows: None,
            event_count: None,
            error_code: None,
            error_category: None,
            error_message: None,
        }
    }

    pub fn from_snapshot(snapshot: &TaskSnapshot, budget: usize) -> Self {
        let view = truncate_output(snapshot.output.as_deref(), budget);
        let rows = tool_rows(&snapshot.events);
        let mut item = Self::empty(true, snapshot.summary.clone());
        item.task_id = Some(snapshot.record.id.clone());
        item.state = Some(snapshot.state());
        item.subagent_type = Some(snapshot.record.subagent_type.clone());
        item.backend = Some(snapshot.backend.clone());
        item.provider = snapshot.provider.clone();
        item.model = snapshot.model.clone();
        item.runtime = snapshot.runtime.clone();
        item.route = snapshot.route.clone();
        item.output = view.text;
        item.output_available = view.available;
        item.output_truncated = view.truncated;
        item.output_total_chars = view.total_chars;
        item.output_returned_chars = view.returned_chars;
        item.tool_rows = (!rows.is_empty()).then_some(rows);
        item.event_count = Some(snapshot.events.len());
        if let Some(code) = snapshot.record.last_error_code.as_deref() {
            if let Ok(code) = code.parse::<ErrorCode>() {
                item.error_code = Some(code);
                item.error_category = Some(code.category());
            }
            item.error_message = snapshot.record.last_error_message.clone();
        }
        item
    }

    /// An id that does not resolve.
    pub fn missing(id: &str, code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut item = Self::empty(false, message.clone());
        item.task_id = Some(id.to_string());
        item.error_code = Some(code);
        item.error_category = Some(code.category());
        item.error_message = Some(message);
        item
    }

    /// A batch entry refused before a task was created.
    pub fn rejected(err: &OperationError) -> Self {
        let mut item = Self::empty(false, format!("Rejected: {}", err.message));
        item.error_code = Some(err.code);
        item.error_category = Some(err.category());
        item.error_message = Some(err.message.clone());
        item
    }

    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_some_and(TaskState::is_terminal)
    }

    pub fn succeeded(&self) -> bool {
        self.state == Some(TaskState::Succeeded)
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub op: String,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskState>,
    pub summary: String,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub output_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_total_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_returned_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_rows: Option<Vec<ToolRow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<ResultItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_status: Option<BatchStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_status: Option<WaitStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_applied: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<TaskState>,
}

impl OperationResult {
    fn base(op: &str, status: OperationStatus, summary: String, backend: String) -> Self {
        Self {
            op: op.to_string(),
            status,
            task_id: None,
            state: None,
            summary,
            backend,
            provider: None,
            model: None,
            runtime: None,
            route: None,
            output: None,
            output_available: false,
            output_truncated: None,
            output_total_chars: None,
            output_returned_chars: None,
            tool_rows: None,
            event_count: None,
            error_code: None,
            error_category: None,
            error_message: None,
            items: None,
            batch_status: None,
            wait_status: None,
            cancel_applied: None,
            previous_status: None,
        }
    }

    pub fn failure(op: &str, err: &OperationError, backend: &str) -> Self {
        let mut result = Self::base(
            op,
            OperationStatus::Failed,
            err.message.clone(),
            backend.to_string(),
        );
        result.error_code = Some(err.code);
        result.error_category = Some(err.category());
        result.error_message = Some(err.message.clone());
        result
    }

    /// A result describing one task.
    pub fn from_snapshot(op: &str, snapshot: &TaskSnapshot, budget: usize) -> Self {
        let item = ResultItem::from_snapshot(snapshot, budget);
        let mut result = Self::base(
            op,
            OperationStatus::for_state(snapshot.state()),
            item.summary,
            snapshot.backend.clone(),
        );
        result.task_id = item.task_id;
        result.state = item.state;
        result.provider = item.provider;
        result.model = item.model;
        result.runtime = item.runtime;
        result.route = item.route;
        result.output = item.output;
        result.output_available = item.output_available;
        result.output_truncated = item.output_truncated;
        result.output_total_chars = item.output_total_chars;
        result.output_returned_chars = item.output_returned_chars;
        result.tool_rows = item.tool_rows;
        result.event_count = item.event_count;
        result.error_code = item.error_code;
        result.error_category = item.error_category;
        result.error_message = item.error_message;
        result
    }

    /// A result carrying several items.
    pub fn with_items(
        op: &str,
        status: OperationStatus,
        summary: impl Into<String>,
        backend: &str,
        items: Vec<ResultItem>,
    ) -> Self {
        let mut result = Self::base(op, status, summary.into(), backend.to_string());
        result.items = Some(items);
        result
    }

    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Succeeded
    }
}
