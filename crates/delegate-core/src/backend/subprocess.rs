//! Local CLI backend.
//!
//! Runs the configured binary once per execution, writes the prompt to its
//! stdin and classifies stdout line by line with [`crate::transcript`]. When
//! the resolved runtime is streaming, the run is handed to the attached
//! [`StreamingBackend`] instead, optionally falling back to the plain
//! subprocess path if streaming fails.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::process::{
    Interrupt, allowed_tools, drain_stderr, stderr_tail, terminate_child, until_interrupted,
};
use super::streaming::StreamingBackend;
use super::trait_def::ExecutionBackend;
use super::types::{
    BackendOutcome, ExecutionContext, RuntimeError, RuntimeStage, SendRequest, StartRequest,
};
use crate::catalog::SubagentDescriptor;
use crate::config::{RuntimeKind, SubprocessConfig};
use crate::error::ErrorCode;
use crate::event::{EventSink, TaskEvent};
use crate::transcript::{self, MetadataKey, ToolPhase, TranscriptLine};

/// Route recorded when a streaming failure was retried as a subprocess run.
pub const FALLBACK_ROUTE: &str = "streaming->subprocess";

#[derive(Debug)]
pub struct SubprocessBackend {
    config: SubprocessConfig,
    streaming: Option<Arc<StreamingBackend>>,
    default_runtime: RuntimeKind,
    fallback_enabled: bool,
}

impl SubprocessBackend {
    pub const ID: &'static str = "subprocess";

    pub fn new(config: SubprocessConfig) -> Self {
        Self {
            config,
            streaming: None,
            default_runtime: RuntimeKind::Subprocess,
            fallback_enabled: false,
        }
    }

    /// Attach a streaming backend and the runtime used when a subagent does
    /// not pick one.
    pub fn with_streaming(mut self, streaming: Arc<StreamingBackend>, default: RuntimeKind) -> Self {
        self.streaming = Some(streaming);
        self.default_runtime = default;
        self
    }

    /// Retry fallback-eligible streaming failures on the subprocess path.
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    fn streaming_for(&self, subagent: &SubagentDescriptor) -> Option<&Arc<StreamingBackend>> {
        let runtime = subagent.runtime.unwrap_or(self.default_runtime);
        match (runtime, &self.streaming) {
            (RuntimeKind::Streaming, Some(streaming)) => Some(streaming),
            (RuntimeKind::Streaming, None) => {
                debug!(subagent = %subagent.name, "streaming runtime requested but not attached");
                None
            }
            (RuntimeKind::Subprocess, _) => None,
        }
    }

    /// Decide what a streaming failure turns into.
    fn after_streaming_failure(&self, task_id: &str, err: RuntimeError) -> Result<(), RuntimeError> {
        if self.fallback_enabled && err.is_fallback_eligible() {
            warn!(task_id, error = %err, "streaming runtime failed, falling back to subprocess");
            return Ok(());
        }
        Err(RuntimeError::new(
            err.code,
            RuntimeStage::Stream,
            format!("streaming_{}: {}", err.code, err.message),
        ))
    }

    async fn run_process(
        &self,
        run: ProcessRun<'_>,
        ctx: &ExecutionContext,
    ) -> Result<BackendOutcome, RuntimeError> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(&self.config.args)
            .arg("--allowedTools")
            .arg(allowed_tools(run.subagent));
        if !run.subagent.system_prompt.is_empty() {
            cmd.arg("--append-system-prompt").arg(&run.subagent.system_prompt);
        }
        if let Some(cwd) = run.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            RuntimeError::new(
                ErrorCode::BackendSpawnFailed,
                RuntimeStage::Spawn,
                format!("failed to spawn '{}': {e}", self.config.binary),
            )
        })?;
        info!(task_id = run.task_id, pid = child.id(), binary = %self.config.binary, "subprocess spawned");

        let deadline = Instant::now() + ctx.deadline;
        let interrupt_error = |interrupt: Interrupt| match interrupt {
            Interrupt::Cancelled => RuntimeError::aborted(RuntimeStage::Execute),
            Interrupt::TimedOut => RuntimeError::timeout(RuntimeStage::Execute, ctx.deadline),
        };

        let (task_id, prompt) = (run.task_id, run.prompt);
        let stdin = child.stdin.take();
        let wrote = until_interrupted(&ctx.cancel, deadline, async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    warn!(task_id, error = %e, "failed to write prompt to stdin");
                }
            }
        })
        .await;
        if let Err(interrupt) = wrote {
            debug!(task_id = run.task_id, ?interrupt, "interrupted while writing the prompt");
            terminate_child(&mut child, self.config.grace_period()).await;
            return Err(interrupt_error(interrupt));
        }

        let stderr = child.stderr.take().map(drain_stderr);
        let Some(stdout) = child.stdout.take() else {
            terminate_child(&mut child, self.config.grace_period()).await;
            return Err(RuntimeError::new(
                ErrorCode::BackendFailed,
                RuntimeStage::Spawn,
                "stdout not captured",
            ));
        };

        let mut lines = BufReader::new(stdout).lines();
        let mut collector = LineCollector::new(run.task_id, ctx.events.clone());
        let read = until_interrupted(&ctx.cancel, deadline, async {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => collector.push(&line),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(task_id = run.task_id, error = %e, "error reading subprocess stdout");
                        break;
                    }
                }
            }
        })
        .await;

        // stdout closing does not mean the child is gone.
        let finished = match read {
            Ok(()) => {
                until_interrupted(&ctx.cancel, deadline, async {
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
                terminate_child(&mut child, self.config.grace_period()).await;
                collector.close_open_tools(true);
                return Err(interrupt_error(interrupt));
            }
        };

        let status = status.map_err(|e| {
            RuntimeError::new(
                ErrorCode::BackendFailed,
                RuntimeStage::Collect,
                format!("failed to wait for child: {e}"),
            )
        })?;
        collector.close_open_tools(!status.success());

        if !status.success() {
            let mut message = format!("{} exited with {status}", self.config.binary);
            if !tail.is_empty() {
                message.push_str(&format!(": {tail}"));
            }
            return Err(RuntimeError::new(
                ErrorCode::BackendExitNonzero,
                RuntimeStage::Execute,
                message,
            ));
        }

        Ok(collector.finish(run.route))
    }
}

/// The fallback run only gets what the streaming attempt left of the deadline.
fn remaining_budget(ctx: ExecutionContext, began: Instant) -> ExecutionContext {
    let deadline = ctx.deadline.saturating_sub(began.elapsed());
    debug!(remaining_ms = deadline.as_millis() as u64, "fallback deadline");
    ExecutionContext { deadline, ..ctx }
}

struct ProcessRun<'a> {
    task_id: &'a str,
    subagent: &'a SubagentDescriptor,
    prompt: &'a str,
    cwd: Option<&'a PathBuf>,
    route: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// Output classification
// ---------------------------------------------------------------------------

/// Turns stdout lines into events, metadata and narrative output.
struct LineCollector<'a> {
    task_id: &'a str,
    events: EventSink,
    narrative: Vec<String>,
    backend: Option<String>,
    provider: Option<String>,
    model: Option<String>,
    runtime: Option<String>,
    /// Open calls: (call id, tool).
    open: Vec<(String, String)>,
    next_call: u32,
}

impl<'a> LineCollector<'a> {
    fn new(task_id: &'a str, events: EventSink) -> Self {
        Self {
            task_id,
            events,
            narrative: Vec::new(),
            backend: None,
            provider: None,
            model: None,
            runtime: None,
            open: Vec::new(),
            next_call: 0,
        }
    }

    fn call_id(&mut self) -> String {
        self.next_call += 1;
        format!("{}-{}", self.task_id, self.next_call)
    }

    fn push(&mut self, line: &str) {
        if let Some((key, value)) = transcript::parse_metadata(line) {
            let slot = match key {
                MetadataKey::Backend => &mut self.backend,
                MetadataKey::Provider => &mut self.provider,
                MetadataKey::Model => &mut self.model,
                MetadataKey::Runtime => &mut self.runtime,
            };
            *slot = Some(value);
            return;
        }

        match transcript::parse_line(line) {
            TranscriptLine::ToolLifecycle {
                phase: ToolPhase::Start,
                tool,
                detail,
            } => {
                let call_id = self.call_id();
                self.open.push((call_id.clone(), tool.clone()));
                self.events.emit(TaskEvent::ToolStart {
                    call_id,
                    tool,
                    detail,
                });
            }
            TranscriptLine::ToolLifecycle {
                phase: ToolPhase::Update,
                tool,
                detail,
            } => {
                if let Some((call_id, _)) = self.open.iter().rev().find(|(_, t)| *t == tool) {
                    self.events.emit(TaskEvent::ToolUpdate {
                        call_id: call_id.clone(),
                        text: detail.unwrap_or_default(),
                    });
                }
            }
            TranscriptLine::ToolLifecycle { phase, tool, detail } => {
                let is_error = phase == ToolPhase::Error;
                match self.open.iter().rposition(|(_, t)| *t == tool) {
                    Some(position) => {
                        let (call_id, tool) = self.open.remove(position);
                        self.events.emit(TaskEvent::ToolEnd {
                            call_id,
                            tool,
                            is_error,
                            detail,
                        });
                    }
                    None => self.complete_call(tool, detail, is_error),
                }
            }
            TranscriptLine::ToolCall { tool, args } => {
                let detail = (!args.is_empty()).then_some(args);
                self.complete_call(tool, detail, false);
            }
            TranscriptLine::Narrative(text) => {
                if !text.trim().is_empty() {
                    self.events.emit(TaskEvent::AssistantDelta { text: text.clone() });
                }
                self.narrative.push(text);
            }
        }
    }

    /// A call seen only once: emit a balanced start/end pair.
    fn complete_call(&mut self, tool: String, detail: Option<String>, is_error: bool) {
        let call_id = self.call_id();
        self.events.emit(TaskEvent::ToolStart {
            call_id: call_id.clone(),
            tool: tool.clone(),
            detail: detail.clone(),
        });
        self.events.emit(TaskEvent::ToolEnd {
            call_id,
            tool,
            is_error,
            detail: None,
        });
    }

    fn close_open_tools(&mut self, is_error: bool) {
        for (call_id, tool) in self.open.drain(..) {
            self.events.emit(TaskEvent::ToolEnd {
                call_id,
                tool,
                is_error,
                detail: None,
            });
        }
    }

    fn finish(self, route: Option<&str>) -> BackendOutcome {
        let output = self.narrative.join("\n").trim().to_string();
        BackendOutcome {
            summary: "Completed via subprocess".to_string(),
            output,
            backend: Some(self.backend.unwrap_or_else(|| SubprocessBackend::ID.to_string())),
            provider: self.provider,
            model: self.model,
            runtime: Some(self.runtime.unwrap_or_else(|| "subprocess".to_string())),
            route: route.map(str::to_string),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionBackend
// ---------------------------------------------------------------------------

#[async_trait]
impl ExecutionBackend for SubprocessBackend {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn execute_start(
        &self,
        request: StartRequest,
        ctx: ExecutionContext,
    ) -> Result<BackendOutcome, RuntimeError> {
        let mut route = None;
        let mut ctx = ctx;
        if let Some(streaming) = self.streaming_for(&request.subagent) {
            let began = Instant::now();
            match streaming.execute_start(request.clone(), ctx.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    self.after_streaming_failure(&request.task_id, err)?;
                    ctx = remaining_budget(ctx, began);
                    route = Some(FALLBACK_ROUTE);
                }
            }
        }

        let run = ProcessRun {
            task_id: &request.task_id,
            subagent: &request.subagent,
            prompt: &request.prompt,
            cwd: request.cwd.as_ref(),
            route,
        };
        self.run_process(run, &ctx).await
    }

    async fn execute_send(
        &self,
        request: SendRequest,
        ctx: ExecutionContext,
    ) -> Result<BackendOutcome, RuntimeError> {
        let mut route = None;
        let mut ctx = ctx;
        if let Some(streaming) = self.streaming_for(&request.subagent) {
            let began = Instant::now();
            match streaming.execute_send(request.clone(), ctx.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    self.after_streaming_failure(&request.task_id, err)?;
                    ctx = remaining_budget(ctx, began);
                    route = Some(FALLBACK_ROUTE);
                }
            }
        }

        let prompt = request.transcript_prompt();
        let run = ProcessRun {
            task_id: &request.task_id,
            subagent: &request.subagent,
            prompt: &prompt,
            cwd: request.cwd.as_ref(),
            route,
        };
        self.run_process(run, &ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(lines: &[&str]) -> (BackendOutcome, Vec<TaskEvent>) {
        let (sink, mut rx) = EventSink::channel();
        let mut collector = LineCollector::new("t1", sink);
        for line in lines {
            collector.push(line);
        }
        collector.close_open_tools(false);
        let outcome = collector.finish(None);
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        (outcome, events)
    }

    #[test]
    fn metadata_lines_become_fields_not_output() {
        let (outcome, events) = collect(&["model: sonnet", "provider: anthropic", "hello"]);
        assert_eq!(outcome.output, "hello");
        assert_eq!(outcome.model.as_deref(), Some("sonnet"));
        assert_eq!(outcome.provider.as_deref(), Some("anthropic"));
        assert_eq!(outcome.backend.as_deref(), Some("subprocess"));
        assert_eq!(events, vec![TaskEvent::AssistantDelta { text: "hello".into() }]);
    }

    #[test]
    fn lifecycle_lines_pair_up() {
        let (outcome, events) = collect(&[
            "[tool:start] Read src/lib.rs",
            "[tool:update] Read 40 lines",
            "[tool:error] Read denied",
            "done",
        ]);
        assert_eq!(outcome.output, "done");
        assert!(matches!(&events[0], TaskEvent::ToolStart { call_id, .. } if call_id == "t1-1"));
        assert!(matches!(&events[1], TaskEvent::ToolUpdate { text, .. } if text == "40 lines"));
        assert!(matches!(&events[2], TaskEvent::ToolEnd { is_error: true, .. }));
    }

    #[test]
    fn tool_call_lines_are_balanced() {
        let (_, events) = collect(&["⏺ Grep(fn main)", "[tool:end] LS"]);
        let starts = events.iter().filter(|e| matches!(e, TaskEvent::ToolStart { .. })).count();
        let ends = events.iter().filter(|e| matches!(e, TaskEvent::ToolEnd { .. })).count();
        assert_eq!((starts, ends), (2, 2));
    }

    #[test]
    fn unterminated_tools_are_closed() {
        let (_, events) = collect(&["[tool:start] Glob **/*.rs"]);
        assert!(matches!(events.last(), Some(TaskEvent::ToolEnd { .. })));
    }
}
