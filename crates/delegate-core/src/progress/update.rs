use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use delegate_store::TaskState;
use serde::Serialize;

use crate::config::ProgressConfig;
use crate::registry::TaskSnapshot;

/// One task as shown in a progress display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressRow {
    pub id: String,
    pub subagent_type: String,
    pub state: TaskState,
    pub summary: String,
    pub active_tool_calls: u32,
    pub total_tool_calls: u32,
}

/// A bounded view of a set of tasks at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub rows: Vec<ProgressRow>,
    /// Tasks not shown because of the row limit.
    pub hidden: usize,
    pub status_line: String,
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub active_tool_calls: u32,
    pub event_count: usize,
    #[serde(skip)]
    pub terminal_ids: Vec<String>,
    #[serde(skip)]
    pub result_fingerprint: u64,
}

impl ProgressUpdate {
    /// Any task still queued or running.
    pub fn has_active(&self) -> bool {
        self.queued + self.running > 0
    }
}

/// Truncate to at most `limit` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    let first_line = text.lines().next().unwrap_or("");
    let more_lines = first_line.len() < text.trim_end().len();
    if first_line.chars().count() <= limit && !more_lines {
        return first_line.to_string();
    }
    if limit == 0 {
        return String::new();
    }
    let kept: String = first_line.chars().take(limit.saturating_sub(1)).collect();
    format!("{kept}…")
}

pub fn build_update(snapshots: &[TaskSnapshot], config: &ProgressConfig) -> ProgressUpdate {
    let mut ordered: Vec<&TaskSnapshot> = snapshots.iter().collect();
    ordered.sort_by(|a, b| {
        let key = |s: &TaskSnapshot| {
            (
                !s.is_terminal(),
                s.record.active_tool_calls,
                s.record.total_tool_calls,
                s.record.updated_at_epoch_ms,
            )
        };
        key(b).cmp(&key(a))
    });

    let rows: Vec<ProgressRow> = ordered
        .iter()
        .take(config.max_rows)
        .map(|s| ProgressRow {
            id: s.record.id.clone(),
            subagent_type: s.record.subagent_type.clone(),
            state: s.state(),
            summary: truncate_chars(&s.summary, config.text_limit),
            active_tool_calls: s.record.active_tool_calls,
            total_tool_calls: s.record.total_tool_calls,
        })
        .collect();

    let count = |state: TaskState| snapshots.iter().filter(|s| s.state() == state).count();
    let queued = count(TaskState::Queued);
    let running = count(TaskState::Running);
    let done = count(TaskState::Succeeded);
    let failed = count(TaskState::Failed);
    let cancelled = count(TaskState::Cancelled);
    let active_tool_calls = snapshots.iter().map(|s| s.record.active_tool_calls).sum();

    let mut status_line = String::new();
    if queued > 0 {
        status_line.push_str(&format!("{queued} queued · "));
    }
    status_line.push_str(&format!(
        "{running} running · {done} done · {failed} failed · {cancelled} cancelled · \
         {active_tool_calls} tools active"
    ));

    let mut hasher = DefaultHasher::new();
    for s in snapshots.iter().filter(|s| s.is_terminal()) {
        s.record.id.hash(&mut hasher);
        s.output.hash(&mut hasher);
    }

    ProgressUpdate {
        hidden: snapshots.len().saturating_sub(rows.len()),
        rows,
        status_line,
        queued,
        running,
        done,
        failed,
        cancelled,
        active_tool_calls,
        event_count: snapshots.iter().map(|s| s.events.len()).sum(),
        terminal_ids: snapshots
            .iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.record.id.clone())
            .collect(),
        result_fingerprint: hasher.finish(),
    }
}
