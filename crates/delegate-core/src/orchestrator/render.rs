//! Text projections of an [`OperationResult`].
//!
//! Both renderers are pure: they read nothing but the payload.

use delegate_store::TaskState;
use serde_json::Value;

use super::result::{OperationResult, OperationStatus, ResultItem};
use crate::transcript::{ToolRow, ToolRowStatus};

fn state_mark(state: Option<TaskState>, found: bool) -> &'static str {
    match (state, found) {
        (_, false) => "?",
        (Some(TaskState::Succeeded), _) => "✓",
        (Some(TaskState::Failed), _) => "✗",
        (Some(TaskState::Cancelled), _) => "⊘",
        (Some(TaskState::Running), _) => "…",
        (Some(TaskState::Queued), _) | (None, _) => "·",
    }
}

fn status_mark(status: OperationStatus) -> &'static str {
    match status {
        OperationStatus::Succeeded => "✓",
        OperationStatus::Failed => "✗",
        OperationStatus::Cancelled => "⊘",
    }
}

fn tool_line(row: &ToolRow) -> String {
    let mark = match row.status {
        ToolRowStatus::Running => "…",
        ToolRowStatus::Ok => "✓",
        ToolRowStatus::Error => "✗",
    };
    match &row.detail {
        Some(detail) => format!("{mark} {} {detail}", row.tool),
        None => format!("{mark} {}", row.tool),
    }
}

fn push_tree(out: &mut Vec<String>, indent: &str, lines: &[String]) {
    for (i, line) in lines.iter().enumerate() {
        let branch = if i + 1 == lines.len() { "└─" } else { "├─" };
        out.push(format!("{indent}{branch} {line}"));
    }
}

fn item_line(item: &ResultItem) -> String {
    let mut line = state_mark(item.state, item.found).to_string();
    if let Some(index) = item.index {
        line.push_str(&format!(" #{index}"));
    }
    if let Some(id) = &item.task_id {
        line.push_str(&format!(" {id}"));
    }
    if let Some(state) = item.state {
        line.push_str(&format!(" [{state}]"));
    }
    line.push_str(&format!(" {}", item.summary));
    if let Some(code) = item.error_code {
        if !item.summary.contains(code.as_str()) {
            line.push_str(&format!(" ({code})"));
        }
    }
    line
}

/// Progress-tree view: one header line, tool or item rows, then output.
pub fn render_compact(result: &OperationResult) -> String {
    let mut out = Vec::new();

    let mut header = format!("{} {}", status_mark(result.status), result.op);
    if let Some(id) = &result.task_id {
        header.push_str(&format!(" {id}"));
    }
    if let Some(state) = result.state {
        header.push_str(&format!(" [{state}]"));
    }
    for tag in [
        result.batch_status.map(|s| format!("batch: {}", snake(&s))),
        result.wait_status.map(|s| format!("wait: {}", snake(&s))),
        result.cancel_applied.map(|applied| {
            if applied {
                "cancel applied".to_string()
            } else {
                "already finished".to_string()
            }
        }),
    ]
    .into_iter()
    .flatten()
    {
        header.push_str(&format!(" ({tag})"));
    }
    header.push_str(&format!(" {}", result.summary));
    if let Some(code) = result.error_code {
        header.push_str(&format!(" [{code}]"));
    }
    out.push(header);

    if let Some(rows) = &result.tool_rows {
        let lines: Vec<String> = rows.iter().map(tool_line).collect();
        push_tree(&mut out, "  ", &lines);
    }
    if let Some(items) = &result.items {
        let lines: Vec<String> = items.iter().map(item_line).collect();
        push_tree(&mut out, "  ", &lines);
    }

    if let Some(output) = &result.output {
        if result.output_truncated == Some(true) {
            out.push(format!(
                "  output (truncated to {} of {} chars):",
                result.output_returned_chars.unwrap_or_default(),
                result.output_total_chars.unwrap_or_default()
            ));
        }
        out.extend(output.lines().map(|l| format!("  {l}")));
    }

    out.join("\n")
}

fn snake<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => String::new(),
    }
}

/// Field dump: one `path = value` line per leaf, keys sorted.
pub fn render_debug(result: &OperationResult) -> String {
    let value = serde_json::to_value(result).unwrap_or(Value::Null);
    let mut lines = Vec::new();
    flatten("", &value, &mut lines);
    lines.join("\n")
}

fn flatten(path: &str, value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                flatten(&child_path, child, out);
            }
        }
        Value::Array(values) => {
            if values.is_empty() {
                out.push(format!("{path} = []"));
            }
            for (i, child) in values.iter().enumerate() {
                flatten(&format!("{path}[{i}]"), child, out);
            }
        }
        Value::String(s) => out.push(format!("{path} = {s:?}")),
        other => out.push(format!("{path} = {other}")),
    }
}
