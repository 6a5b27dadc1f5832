//! Classification of backend text output.
//!
//! Plain-text backends interleave tool activity, metadata and narrative on
//! stdout. [`parse_line`] is the single place that decides which is which.
//!
//! Recognised shapes:
//!
//! ```text
//! [tool:start] Read src/lib.rs      -> ToolLifecycle { Start }
//! [tool:update] Read 120 lines      -> ToolLifecycle { Update }
//! [tool:end] Read ok                -> ToolLifecycle { End }
//! [tool:error] Read no such file    -> ToolLifecycle { Error }
//! Grep(pattern: "fn main")          -> ToolCall
//! ⏺ Read(src/main.rs)               -> ToolCall
//! model: sonnet                     -> metadata (see parse_metadata)
//! anything else                     -> Narrative
//! ```

use std::fmt;

use serde::Serialize;

use crate::event::TaskEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPhase {
    Start,
    Update,
    End,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptLine {
    ToolLifecycle {
        phase: ToolPhase,
        tool: String,
        detail: Option<String>,
    },
    ToolCall {
        tool: String,
        args: String,
    },
    Narrative(String),
}

/// Metadata keys a nested process may print about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKey {
    Backend,
    Provider,
    Model,
    Runtime,
}

impl MetadataKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Provider => "provider",
            Self::Model => "model",
            Self::Runtime => "runtime",
        }
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a `key: value` metadata line. Keys are case-insensitive and the
/// value must be a single non-empty token.
pub fn parse_metadata(line: &str) -> Option<(MetadataKey, String)> {
    let (key, value) = line.trim().split_once(':')?;
    let key = match key.trim().to_ascii_lowercase().as_str() {
        "backend" => MetadataKey::Backend,
        "provider" => MetadataKey::Provider,
        "model" => MetadataKey::Model,
        "runtime" => MetadataKey::Runtime,
        _ => return None,
    };
    let value = value.trim();
    if value.is_empty() || value.contains(char::is_whitespace) {
        return None;
    }
    Some((key, value.to_string()))
}

pub fn parse_line(line: &str) -> TranscriptLine {
    let trimmed = line.trim();

    if let Some(rest) = trimmed.strip_prefix("[tool:") {
        if let Some((phase, body)) = rest.split_once(']') {
            let phase = match phase {
                "start" => Some(ToolPhase::Start),
                "update" => Some(ToolPhase::Update),
                "end" => Some(ToolPhase::End),
                "error" => Some(ToolPhase::Error),
                _ => None,
            };
            let body = body.trim();
            if let (Some(phase), false) = (phase, body.is_empty()) {
                let (tool, detail) = match body.split_once(char::is_whitespace) {
                    Some((tool, detail)) => (tool, Some(detail.trim().to_string())),
                    None => (body, None),
                };
                return TranscriptLine::ToolLifecycle {
                    phase,
                    tool: tool.to_string(),
                    detail: detail.filter(|d| !d.is_empty()),
                };
            }
        }
    }

    if let Some(call) = parse_tool_call(trimmed) {
        return call;
    }

    TranscriptLine::Narrative(line.to_string())
}

/// `Name(args)` where `Name` starts with an uppercase ASCII letter, with an
/// optional leading bullet.
fn parse_tool_call(line: &str) -> Option<TranscriptLine> {
    let line = line
        .strip_prefix('⏺')
        .or_else(|| line.strip_prefix('●'))
        .or_else(|| line.strip_prefix('*'))
        .map(str::trim_start)
        .unwrap_or(line);

    let open = line.find('(')?;
    if !line.ends_with(')') {
        return None;
    }
    let name = &line[..open];
    let mut chars = name.chars();
    let first = chars.next()?;
    if !first.is_ascii_uppercase() || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let args = &line[open + 1..line.len() - 1];
    Some(TranscriptLine::ToolCall {
        tool: name.to_string(),
        args: args.trim().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tool rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRowStatus {
    Running,
    Ok,
    Error,
}

/// One tool call, folded from its start/update/end events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolRow {
    pub call_id: String,
    pub tool: String,
    pub status: ToolRowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Fold an event log into one row per tool call, in start order.
pub fn tool_rows(events: &[TaskEvent]) -> Vec<ToolRow> {
    let mut rows: Vec<ToolRow> = Vec::new();
    for event in events {
        match event {
            TaskEvent::ToolStart {
                call_id,
                tool,
                detail,
            } => rows.push(ToolRow {
                call_id: call_id.clone(),
                tool: tool.clone(),
                status: ToolRowStatus::Running,
                detail: detail.clone(),
            }),
            TaskEvent::ToolUpdate { call_id, text } => {
                if let Some(row) = rows.iter_mut().rev().find(|r| &r.call_id == call_id) {
                    row.detail = Some(text.clone());
                }
            }
            TaskEvent::ToolEnd {
                call_id,
                tool,
                is_error,
                detail,
            } => {
                let status = if *is_error {
                    ToolRowStatus::Error
                } else {
                    ToolRowStatus::Ok
                };
                match rows.iter_mut().rev().find(|r| &r.call_id == call_id) {
                    Some(row) => {
                        row.status = status;
                        if detail.is_some() {
                            row.detail = detail.clone();
                        }
                    }
                    None => rows.push(ToolRow {
                        call_id: call_id.clone(),
                        tool: tool.clone(),
                        status,
                        detail: detail.clone(),
                    }),
                }
            }
            _ => {}
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_lines() {
        assert_eq!(
            parse_line("[tool:start] Read src/lib.rs"),
            TranscriptLine::ToolLifecycle {
                phase: ToolPhase::Start,
                tool: "Read".to_string(),
                detail: Some("src/lib.rs".to_string()),
            }
        );
        assert_eq!(
            parse_line("  [tool:end] Grep"),
            TranscriptLine::ToolLifecycle {
                phase: ToolPhase::End,
                tool: "Grep".to_string(),
                detail: None,
            }
        );
        assert!(matches!(
            parse_line("[tool:error] LS permission denied"),
            TranscriptLine::ToolLifecycle { phase: ToolPhase::Error, .. }
        ));
    }

    #[test]
    fn unknown_phase_is_narrative() {
        assert!(matches!(
            parse_line("[tool:paused] Read"),
            TranscriptLine::Narrative(_)
        ));
        assert!(matches!(parse_line("[tool:start]"), TranscriptLine::Narrative(_)));
    }

    #[test]
    fn tool_call_lines() {
        assert_eq!(
            parse_line("⏺ Read(src/main.rs)"),
            TranscriptLine::ToolCall {
                tool: "Read".to_string(),
                args: "src/main.rs".to_string(),
            }
        );
        assert_eq!(
            parse_line("Grep(pattern: \"fn main\")"),
            TranscriptLine::ToolCall {
                tool: "Grep".to_string(),
                args: "pattern: \"fn main\"".to_string(),
            }
        );
    }

    #[test]
    fn prose_with_parentheses_is_narrative() {
        for line in [
            "The function (see below) is unused.",
            "call main() first",
            "Read the file (carefully",
            "lowercase(args)",
        ] {
            assert!(
                matches!(parse_line(line), TranscriptLine::Narrative(_)),
                "{line:?} should be narrative"
            );
        }
    }

    #[test]
    fn metadata_lines() {
        assert_eq!(
            parse_metadata("model: sonnet-4"),
            Some((MetadataKey::Model, "sonnet-4".to_string()))
        );
        assert_eq!(
            parse_metadata("Provider:  anthropic "),
            Some((MetadataKey::Provider, "anthropic".to_string()))
        );
        assert_eq!(parse_metadata("model: a sentence about models"), None);
        assert_eq!(parse_metadata("note: x"), None);
        assert_eq!(parse_metadata("model:"), None);
    }

    #[test]
    fn rows_fold_start_update_end() {
        let events = vec![
            TaskEvent::ToolStart {
                call_id: "1".into(),
                tool: "Read".into(),
                detail: Some("a.rs".into()),
            },
            TaskEvent::ToolStart {
                call_id: "2".into(),
                tool: "Grep".into(),
                detail: None,
            },
            TaskEvent::ToolUpdate {
                call_id: "2".into(),
                text: "3 matches".into(),
            },
            TaskEvent::ToolEnd {
                call_id: "1".into(),
                tool: "Read".into(),
                is_error: true,
                detail: None,
            },
            TaskEvent::AssistantDelta { text: "x".into() },
        ];
        let rows = tool_rows(&events);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, ToolRowStatus::Error);
        assert_eq!(rows[0].detail.as_deref(), Some("a.rs"));
        assert_eq!(rows[1].status, ToolRowStatus::Running);
        assert_eq!(rows[1].detail.as_deref(), Some("3 matches"));
    }

    #[test]
    fn end_without_start_still_produces_a_row() {
        let rows = tool_rows(&[TaskEvent::ToolEnd {
            call_id: "z".into(),
            tool: "LS".into(),
            is_error: false,
            detail: None,
        }]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ToolRowStatus::Ok);
    }
}
