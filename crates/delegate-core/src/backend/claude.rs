//! Streaming runner for the `claude` CLI.
//!
//! Spawns `claude -p --output-format stream-json` and turns each JSONL line
//! on stdout into [`RunnerEvent`]s.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::process::{
    Interrupt, allowed_tools, drain_stderr, stderr_tail, terminate_child, until_interrupted,
};
use super::streaming::{
    RunnerEvent, RunnerFailure, RunnerFailureKind, RunnerJob, RunnerOutcome, StreamRunner,
};
use crate::event::TaskEvent;

#[derive(Debug, Clone)]
pub struct ClaudeStreamRunner {
    binary: String,
    grace_period: Duration,
}

impl ClaudeStreamRunner {
    pub fn new() -> Self {
        Self::with_binary("claude")
    }

    /// Use a custom binary path. Useful for testing.
    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            binary: path.into(),
            grace_period: Duration::from_secs(5),
        }
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }
}

impl Default for ClaudeStreamRunner {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// JSONL parsing
// ---------------------------------------------------------------------------

/// One meaningful piece of a stream-json line.
#[derive(Debug, Clone, PartialEq)]
enum StreamItem {
    Model(String),
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        id: String,
        is_error: bool,
    },
    Result {
        text: Option<String>,
        is_error: bool,
    },
    Error(String),
}

fn str_field<'a>(v: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(|x| x.as_str())
}

/// Parse one JSONL line. `Err` means the line was not JSON; callers log and
/// keep reading.
fn parse_stream_json_line(line: &str) -> Result<Vec<StreamItem>> {
    let v: serde_json::Value =
        serde_json::from_str(line).context("malformed JSON in stream output")?;

    let mut items = Vec::new();
    match str_field(&v, "type").unwrap_or("") {
        "system" => {
            if let Some(model) = str_field(&v, "model") {
                items.push(StreamItem::Model(model.to_string()));
            }
        }
        "assistant" | "user" => {
            let blocks = v
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array());
            for block in blocks.into_iter().flatten() {
                match str_field(block, "type").unwrap_or("") {
                    "text" => {
                        if let Some(text) = str_field(block, "text") {
                            items.push(StreamItem::Text(text.to_string()));
                        }
                    }
                    "tool_use" => items.push(StreamItem::ToolUse {
                        id: str_field(block, "id").unwrap_or("").to_string(),
                        name: str_field(block, "name").unwrap_or("unknown").to_string(),
                        input: block.get("input").cloned().unwrap_or_default(),
                    }),
                    "tool_result" => items.push(StreamItem::ToolResult {
                        id: str_field(block, "tool_use_id").unwrap_or("").to_string(),
                        is_error: block
                            .get("is_error")
                            .and_then(|e| e.as_bool())
                            .unwrap_or(false),
                    }),
                    _ => {}
                }
            }
            if let Some(model) = v.get("message").and_then(|m| str_field(m, "model")) {
                items.push(StreamItem::Model(model.to_string()));
            }
        }
        "tool_use" => items.push(StreamItem::ToolUse {
            id: str_field(&v, "id").unwrap_or("").to_string(),
            name: str_field(&v, "name")
                .or_else(|| str_field(&v, "tool"))
                .unwrap_or("unknown")
                .to_string(),
            input: v.get("input").cloned().unwrap_or_default(),
        }),
        "tool_result" => items.push(StreamItem::ToolResult {
            id: str_field(&v, "tool_use_id")
                .or_else(|| str_field(&v, "id"))
                .unwrap_or("")
                .to_string(),
            is_error: v.get("is_error").and_then(|e| e.as_bool()).unwrap_or(false),
        }),
        "result" => items.push(StreamItem::Result {
            text: str_field(&v, "result").map(str::to_string),
            is_error: v.get("is_error").and_then(|e| e.as_bool()).unwrap_or(false),
        }),
        "error" => {
            let message = v
                .get("error")
                .and_then(|e| str_field(e, "message"))
                .or_else(|| str_field(&v, "message"))
                .unwrap_or("unknown error");
            items.push(StreamItem::Error(message.to_string()));
        }
        other => debug!(event_type = other, "ignoring unrecognised stream-json event type"),
    }
    Ok(items)
}

/// Short human detail for a tool input: the first string argument.
fn input_detail(input: &serde_json::Value) -> Option<String> {
    input
        .as_object()?
        .values()
        .find_map(|v| v.as_str())
        .map(|s| s.lines().next().unwrap_or("").to_string())
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Folds stream items into events and the final outcome.
#[derive(Default)]
struct Collector {
    outcome: RunnerOutcome,
    turn: u32,
    in_turn: bool,
    /// Open tool calls: (call id, tool name).
    open_tools: Vec<(String, String)>,
    anonymous_calls: u32,
    final_text: Option<String>,
}

impl Collector {
    fn apply(&mut self, item: StreamItem) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        match item {
            StreamItem::Model(model) => self.outcome.model = Some(model),
            StreamItem::Text(text) => {
                self.ensure_turn(&mut events);
                if !self.outcome.text.is_empty() {
                    self.outcome.text.push('\n');
                }
                self.outcome.text.push_str(&text);
                events.push(TaskEvent::AssistantDelta { text });
            }
            StreamItem::ToolUse { id, name, input } => {
                self.ensure_turn(&mut events);
                let id = if id.is_empty() {
                    self.anonymous_calls += 1;
                    format!("call-{}", self.anonymous_calls)
                } else {
                    id
                };
                self.open_tools.push((id.clone(), name.clone()));
                events.push(TaskEvent::ToolStart {
                    call_id: id,
                    tool: name,
                    detail: input_detail(&input),
                });
            }
            StreamItem::ToolResult { id, is_error } => {
                let position = self
                    .open_tools
                    .iter()
                    .position(|(open, _)| open == &id)
                    .or_else(|| (!self.open_tools.is_empty()).then_some(0));
                if let Some(position) = position {
                    let (call_id, tool) = self.open_tools.remove(position);
                    events.push(TaskEvent::ToolEnd {
                        call_id,
                        tool,
                        is_error,
                        detail: None,
                    });
                }
                self.close_turn(&mut events);
            }
            StreamItem::Result { text, is_error } => {
                if is_error {
                    let message = text.unwrap_or_else(|| "run ended with an error".to_string());
                    self.outcome.error = Some(RunnerFailure::new(RunnerFailureKind::Other, message));
                } else {
                    self.final_text = text;
                }
            }
            StreamItem::Error(message) => {
                self.outcome.error = Some(RunnerFailure::new(RunnerFailureKind::Other, message));
            }
        }
        events
    }

    fn ensure_turn(&mut self, events: &mut Vec<TaskEvent>) {
        if !self.in_turn {
            self.turn += 1;
            self.in_turn = true;
            events.push(TaskEvent::TurnStart { turn: self.turn });
        }
    }

    fn close_turn(&mut self, events: &mut Vec<TaskEvent>) {
        if self.in_turn && self.open_tools.is_empty() {
            self.in_turn = false;
            events.push(TaskEvent::TurnEnd { turn: self.turn });
        }
    }

    /// Close anything still open so the counters end balanced.
    fn finish(mut self) -> (RunnerOutcome, Vec<TaskEvent>) {
        let mut events = Vec::new();
        for (call_id, tool) in std::mem::take(&mut self.open_tools) {
            events.push(TaskEvent::ToolEnd {
                call_id,
                tool,
                is_error: true,
                detail: Some("no result before the run ended".to_string()),
            });
        }
        self.close_turn(&mut events);
        if let Some(text) = self.final_text.take() {
            if !text.trim().is_empty() {
                self.outcome.text = text;
            }
        }
        self.outcome.provider = Some("anthropic".to_string());
        self.outcome.runtime = Some("streaming".to_string());
        (self.outcome, events)
    }
}

async fn send_all(tx: &mpsc::Sender<RunnerEvent>, events: Vec<TaskEvent>) {
    for event in events {
        let _ = tx.send(RunnerEvent::Event(event)).await;
    }
}

#[async_trait]
impl StreamRunner for ClaudeStreamRunner {
    fn name(&self) -> &str {
        "claude-stream-json"
    }

    async fn run(
        &self,
        job: RunnerJob,
        tx: mpsc::Sender<RunnerEvent>,
        cancel: CancellationToken,
        deadline: Duration,
    ) -> RunnerOutcome {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--allowedTools")
            .arg(allowed_tools(&job.subagent))
            .arg("--append-system-prompt")
            .arg(&job.subagent.system_prompt);
        if let Some(cwd) = &job.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return RunnerOutcome {
                    error: Some(RunnerFailure::new(
                        RunnerFailureKind::Spawn,
                        format!("failed to spawn '{}': {e}", self.binary),
                    )),
                    ..RunnerOutcome::default()
                };
            }
        };

        let deadline_at = Instant::now() + deadline;
        let stdin = child.stdin.take();
        let prompt = job.prompt.as_bytes();
        let task_id = job.task_id.as_str();
        let wrote = until_interrupted(&cancel, deadline_at, async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(prompt).await {
                    warn!(task_id, error = %e, "failed to write prompt to stdin");
                }
            }
        })
        .await;
        if let Err(interrupt) = wrote {
            terminate_child(&mut child, self.grace_period).await;
            return RunnerOutcome {
                timed_out: interrupt == Interrupt::TimedOut,
                aborted: interrupt == Interrupt::Cancelled,
                ..RunnerOutcome::default()
            };
        }

        let stderr = child.stderr.take().map(drain_stderr);
        let Some(stdout) = child.stdout.take() else {
            terminate_child(&mut child, self.grace_period).await;
            return RunnerOutcome {
                error: Some(RunnerFailure::new(RunnerFailureKind::Other, "stdout not captured")),
                ..RunnerOutcome::default()
            };
        };

        let mut lines = BufReader::new(stdout).lines();
        let mut collector = Collector::default();
        let read = until_interrupted(&cancel, deadline_at, async {
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(task_id, error = %e, "error reading runner stdout");
                        break;
                    }
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_stream_json_line(trimmed) {
                    Ok(items) => {
                        for item in items {
                            let events = collector.apply(item);
                            send_all(&tx, events).await;
                        }
                    }
                    Err(e) => {
                        warn!(task_id, error = %e, "skipping malformed JSONL line");
                        let _ = tx.send(RunnerEvent::Notice(trimmed.to_string())).await;
                    }
                }
            }
        })
        .await;

        let finished = match read {
            Ok(()) => {
                until_interrupted(&cancel, deadline_at, async {
                    let status = child.wait().await;
                    (status, stderr_tail(stderr).await)
                })
                .await
            }
            Err(interrupt) => Err(interrupt),
        };
        let (status, tail) = match finished {
            Ok(done) => done,
            Err(interrupt) => {
                terminate_child(&mut child, self.grace_period).await;
                let (mut outcome, events) = collector.finish();
                send_all(&tx, events).await;
                outcome.timed_out = interrupt == Interrupt::TimedOut;
                outcome.aborted = interrupt == Interrupt::Cancelled;
                return outcome;
            }
        };

        let (mut outcome, events) = collector.finish();
        send_all(&tx, events).await;
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                let mut message = format!("exited with {status}");
                if !tail.is_empty() {
                    message.push_str(&format!(": {tail}"));
                }
                outcome.error = Some(RunnerFailure::new(RunnerFailureKind::Exit, message));
            }
            Err(e) => {
                outcome.error = Some(RunnerFailure::new(
                    RunnerFailureKind::Other,
                    format!("failed to wait for child: {e}"),
                ));
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SubagentDescriptor;

    #[test]
    fn parse_assistant_text_and_tool_use() {
        let line = r#"{"type":"assistant","message":{"model":"claude-sonnet","content":[{"type":"text","text":"Looking"},{"type":"tool_use","id":"tu1","name":"Grep","input":{"pattern":"fn main"}}]}}"#;
        let items = parse_stream_json_line(line).unwrap();
        assert_eq!(items[0], StreamItem::Text("Looking".into()));
        assert!(matches!(&items[1], StreamItem::ToolUse { id, name, .. } if id == "tu1" && name == "Grep"));
        assert_eq!(items[2], StreamItem::Model("claude-sonnet".into()));
    }

    #[test]
    fn parse_user_tool_result() {
        let line = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"tu1","is_error":true}]}}"#;
        assert_eq!(
            parse_stream_json_line(line).unwrap(),
            vec![StreamItem::ToolResult {
                id: "tu1".into(),
                is_error: true,
            }]
        );
    }

    #[test]
    fn parse_result_and_error() {
        let items = parse_stream_json_line(r#"{"type":"result","result":"Done."}"#).unwrap();
        assert_eq!(
            items,
            vec![StreamItem::Result {
                text: Some("Done.".into()),
                is_error: false,
            }]
        );
        let items =
            parse_stream_json_line(r#"{"type":"error","error":{"message":"rate limited"}}"#).unwrap();
        assert_eq!(items, vec![StreamItem::Error("rate limited".into())]);
    }

    #[test]
    fn parse_unknown_and_malformed() {
        assert!(parse_stream_json_line(r#"{"type":"ping"}"#).unwrap().is_empty());
        assert!(parse_stream_json_line("not json").is_err());
    }

    #[test]
    fn collector_balances_tool_calls() {
        let mut collector = Collector::default();
        let mut events = collector.apply(StreamItem::ToolUse {
            id: "a".into(),
            name: "Read".into(),
            input: serde_json::json!({"file_path": "src/lib.rs"}),
        });
        events.extend(collector.apply(StreamItem::ToolUse {
            id: "b".into(),
            name: "LS".into(),
            input: serde_json::Value::Null,
        }));
        events.extend(collector.apply(StreamItem::ToolResult {
            id: "a".into(),
            is_error: false,
        }));
        let (_, tail) = collector.finish();
        events.extend(tail);

        let starts = events.iter().filter(|e| matches!(e, TaskEvent::ToolStart { .. })).count();
        let ends = events.iter().filter(|e| matches!(e, TaskEvent::ToolEnd { .. })).count();
        assert_eq!(starts, 2);
        assert_eq!(ends, 2);
        assert!(matches!(
            &events[1],
            TaskEvent::ToolStart { detail: Some(d), .. } if d == "src/lib.rs"
        ));
        assert!(matches!(events.last(), Some(TaskEvent::TurnEnd { turn: 1 })));
    }

    #[test]
    fn final_result_text_replaces_streamed_text() {
        let mut collector = Collector::default();
        collector.apply(StreamItem::Text("thinking".into()));
        collector.apply(StreamItem::Result {
            text: Some("final answer".into()),
            is_error: false,
        });
        let (outcome, _) = collector.finish();
        assert_eq!(outcome.text, "final answer");
        assert!(outcome.error.is_none());
    }

    #[cfg(unix)]
    fn script(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake_claude.sh");
        std::fs::write(&path, format!("#!/bin/sh\ncat > /dev/null\n{body}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    fn job(dir: &std::path::Path) -> RunnerJob {
        RunnerJob {
            task_id: "t1".into(),
            subagent: SubagentDescriptor::named("finder"),
            prompt: "find".into(),
            cwd: Some(dir.to_path_buf()),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_fake_binary_and_streams_events() {
        let tmp = tempfile::tempdir().unwrap();
        let binary = script(
            tmp.path(),
            "echo '{\"type\":\"system\",\"model\":\"fake-model\"}'\n\
             echo 'garbage'\n\
             echo '{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"tool_use\",\"id\":\"x\",\"name\":\"Read\",\"input\":{}}]}}'\n\
             echo '{\"type\":\"user\",\"message\":{\"content\":[{\"type\":\"tool_result\",\"tool_use_id\":\"x\"}]}}'\n\
             echo '{\"type\":\"result\",\"result\":\"Done.\"}'\n",
        );
        let runner = ClaudeStreamRunner::with_binary(binary);
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = runner
            .run(job(tmp.path()), tx, CancellationToken::new(), Duration::from_secs(10))
            .await;
        assert!(outcome.error.is_none(), "{:?}", outcome.error);
        assert_eq!(outcome.text, "Done.");
        assert_eq!(outcome.model.as_deref(), Some("fake-model"));

        let mut events = Vec::new();
        while let Some(item) = rx.recv().await {
            if let RunnerEvent::Event(e) = item {
                events.push(e);
            }
        }
        assert!(events.iter().any(|e| matches!(e, TaskEvent::ToolEnd { is_error: false, .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let binary = script(tmp.path(), "echo oops >&2\nexit 3\n");
        let (tx, _rx) = mpsc::channel(64);
        let outcome = ClaudeStreamRunner::with_binary(binary)
            .run(job(tmp.path()), tx, CancellationToken::new(), Duration::from_secs(10))
            .await;
        let failure = outcome.error.unwrap();
        assert_eq!(failure.kind, RunnerFailureKind::Exit);
        assert!(failure.message.contains("oops"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_failure() {
        let (tx, _rx) = mpsc::channel(4);
        let outcome = ClaudeStreamRunner::with_binary("/nonexistent/claude")
            .run(
                RunnerJob {
                    task_id: "t1".into(),
                    subagent: SubagentDescriptor::named("finder"),
                    prompt: "p".into(),
                    cwd: None,
                },
                tx,
                CancellationToken::new(),
                Duration::from_secs(1),
            )
            .await;
        assert_eq!(outcome.error.unwrap().kind, RunnerFailureKind::Spawn);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deadline_terminates_the_child() {
        let tmp = tempfile::tempdir().unwrap();
        let binary = script(tmp.path(), "sleep 3600\n");
        let (tx, _rx) = mpsc::channel(4);
        let outcome = ClaudeStreamRunner::with_binary(binary)
            .grace_period(Duration::from_millis(200))
            .run(job(tmp.path()), tx, CancellationToken::new(), Duration::from_millis(100))
            .await;
        assert!(outcome.timed_out);
        assert!(!outcome.aborted);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_reaches_a_child_that_closed_stdout() {
        let tmp = tempfile::tempdir().unwrap();
        let binary = script(tmp.path(), "exec >&-\nexec sleep 3600\n");
        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = ClaudeStreamRunner::with_binary(binary)
            .grace_period(Duration::from_millis(200))
            .run(job(tmp.path()), tx, cancel, Duration::from_secs(60))
            .await;
        assert!(outcome.aborted);
        assert!(!outcome.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deadline_covers_a_child_that_never_reads_stdin() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deaf.sh");
        std::fs::write(&path, "#!/bin/sh\nexec sleep 3600\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut job = job(tmp.path());
        // Far more than a pipe buffer holds.
        job.prompt = "x".repeat(4 * 1024 * 1024);
        let (tx, _rx) = mpsc::channel(4);
        let started = std::time::Instant::now();
        let outcome = ClaudeStreamRunner::with_binary(path.to_string_lossy().into_owned())
            .grace_period(Duration::from_millis(200))
            .run(job, tx, CancellationToken::new(), Duration::from_millis(150))
            .await;
        assert!(outcome.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
