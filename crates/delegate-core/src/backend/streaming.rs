//! Streaming runtime: a [`StreamRunner`] pushes events through a channel
//! while it runs, and the backend forwards them to the task's sink as they
//! arrive.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::trait_def::ExecutionBackend;
use super::types::{
    BackendOutcome, ExecutionContext, RuntimeError, RuntimeStage, SendRequest, StartRequest,
};
use crate::catalog::SubagentDescriptor;
use crate::error::ErrorCode;
use crate::event::TaskEvent;

/// Channel capacity between a runner and the forwarding loop.
const RUNNER_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
    Event(TaskEvent),
    /// Free-form diagnostic, logged but not recorded on the task.
    Notice(String),
}

#[derive(Debug, Clone)]
pub struct RunnerJob {
    pub task_id: String,
    pub subagent: SubagentDescriptor,
    pub prompt: String,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerFailureKind {
    Spawn,
    Exit,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerFailure {
    pub kind: RunnerFailureKind,
    pub message: String,
}

impl RunnerFailure {
    pub fn new(kind: RunnerFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// What a runner reports once it stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerOutcome {
    pub text: String,
    pub summary: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub runtime: Option<String>,
    pub timed_out: bool,
    pub aborted: bool,
    pub error: Option<RunnerFailure>,
}

/// Drives one streaming execution.
///
/// Implementations must stop promptly when `cancel` fires or `deadline`
/// passes and report that through `aborted` / `timed_out`.
#[async_trait]
pub trait StreamRunner: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        &self,
        job: RunnerJob,
        events: mpsc::Sender<RunnerEvent>,
        cancel: CancellationToken,
        deadline: Duration,
    ) -> RunnerOutcome;
}

const _: () = {
    fn _assert_object_safe(_: &dyn StreamRunner) {}
};

pub struct StreamingBackend {
    runner: Arc<dyn StreamRunner>,
}

impl StreamingBackend {
    pub const ID: &'static str = "streaming";

    pub fn new(runner: Arc<dyn StreamRunner>) -> Self {
        Self { runner }
    }

    async fn execute(
        &self,
        job: RunnerJob,
        ctx: ExecutionContext,
    ) -> Result<BackendOutcome, RuntimeError> {
        let task_id = job.task_id.clone();
        info!(task_id = %task_id, runner = self.runner.name(), "streaming execution started");

        let (tx, rx) = mpsc::channel(RUNNER_CHANNEL_CAPACITY);
        let run = self
            .runner
            .run(job, tx, ctx.cancel.clone(), ctx.deadline);
        let sink = ctx.events.clone();
        let forward = async move {
            let mut stream = ReceiverStream::new(rx);
            while let Some(item) = stream.next().await {
                match item {
                    RunnerEvent::Event(event) => sink.emit(event),
                    RunnerEvent::Notice(text) => debug!(task_id = %task_id, notice = %text, "runner notice"),
                }
            }
        };
        // The runner owns the only sender, so forwarding ends when it returns.
        let (outcome, ()) = tokio::join!(run, forward);
        map_outcome(outcome, ctx.deadline)
    }
}

impl std::fmt::Debug for StreamingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingBackend")
            .field("runner", &self.runner.name())
            .finish()
    }
}

fn map_outcome(outcome: RunnerOutcome, deadline: Duration) -> Result<BackendOutcome, RuntimeError> {
    if outcome.aborted {
        return Err(RuntimeError::aborted(RuntimeStage::Stream));
    }
    if outcome.timed_out {
        return Err(RuntimeError::timeout(RuntimeStage::Stream, deadline));
    }
    if let Some(failure) = outcome.error {
        let (code, stage) = match failure.kind {
            RunnerFailureKind::Spawn => (ErrorCode::BackendSpawnFailed, RuntimeStage::Spawn),
            RunnerFailureKind::Exit => (ErrorCode::BackendExitNonzero, RuntimeStage::Stream),
            RunnerFailureKind::Other => (ErrorCode::BackendFailed, RuntimeStage::Stream),
        };
        return Err(RuntimeError::new(code, stage, failure.message));
    }

    let text = outcome.text.trim().to_string();
    Ok(BackendOutcome {
        summary: outcome
            .summary
            .unwrap_or_else(|| "Completed via streaming runtime".to_string()),
        output: text,
        backend: Some(StreamingBackend::ID.to_string()),
        provider: outcome.provider,
        model: outcome.model,
        runtime: Some(outcome.runtime.unwrap_or_else(|| "streaming".to_string())),
        route: None,
    })
}

#[async_trait]
impl ExecutionBackend for StreamingBackend {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn execute_start(
        &self,
        request: StartRequest,
        ctx: ExecutionContext,
    ) -> Result<BackendOutcome, RuntimeError> {
        let job = RunnerJob {
            task_id: request.task_id,
            subagent: request.subagent,
            prompt: request.prompt,
            cwd: request.cwd,
        };
        self.execute(job, ctx).await
    }

    async fn execute_send(
        &self,
        request: SendRequest,
        ctx: ExecutionContext,
    ) -> Result<BackendOutcome, RuntimeError> {
        let job = RunnerJob {
            prompt: request.transcript_prompt(),
            task_id: request.task_id,
            subagent: request.subagent,
            cwd: request.cwd,
        };
        self.execute(job, ctx).await
    }
}
