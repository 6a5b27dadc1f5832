//! Deterministic in-process backend.
//!
//! Produces canned output without touching the network or filesystem. Used
//! when no backend is configured and as the default in tests.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::trait_def::ExecutionBackend;
use super::types::{
    BackendOutcome, ExecutionContext, RuntimeError, RuntimeStage, SendRequest, StartRequest,
};
use crate::event::{EventSink, TaskEvent};

#[derive(Debug, Clone, Default)]
pub struct SimulateBackend {
    latency: Duration,
}

impl SimulateBackend {
    pub const ID: &'static str = "simulate";

    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long before answering, racing cancellation and the deadline.
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }

    async fn run(
        &self,
        task_id: &str,
        subagent: &str,
        prompt: &str,
        ctx: ExecutionContext,
    ) -> Result<BackendOutcome, RuntimeError> {
        debug!(task_id, subagent, latency_ms = self.latency.as_millis() as u64, "simulating");
        emit_script(&ctx.events, task_id, subagent);

        if !self.latency.is_zero() {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(RuntimeError::aborted(RuntimeStage::Execute)),
                _ = tokio::time::sleep(ctx.deadline) => {
                    return Err(RuntimeError::timeout(RuntimeStage::Execute, ctx.deadline));
                }
                _ = tokio::time::sleep(self.latency) => {}
            }
        } else if ctx.cancel.is_cancelled() {
            return Err(RuntimeError::aborted(RuntimeStage::Execute));
        }

        let output = format!("[simulated {subagent}] {}", first_line(prompt));
        ctx.events.emit(TaskEvent::AssistantDelta {
            text: output.clone(),
        });
        ctx.events.emit(TaskEvent::TurnEnd { turn: 1 });

        Ok(BackendOutcome {
            summary: format!("Simulated {subagent} run completed"),
            output,
            backend: Some(Self::ID.to_string()),
            provider: Some(Self::ID.to_string()),
            model: None,
            runtime: None,
            route: None,
        })
    }
}

fn emit_script(events: &EventSink, task_id: &str, subagent: &str) {
    let call_id = format!("{task_id}-sim-1");
    events.emit(TaskEvent::TurnStart { turn: 1 });
    events.emit(TaskEvent::ToolStart {
        call_id: call_id.clone(),
        tool: "Read".to_string(),
        detail: Some(format!("{subagent} context")),
    });
    events.emit(TaskEvent::ToolEnd {
        call_id,
        tool: "Read".to_string(),
        is_error: false,
        detail: None,
    });
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

#[async_trait]
impl ExecutionBackend for SimulateBackend {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn execute_start(
        &self,
        request: StartRequest,
        ctx: ExecutionContext,
    ) -> Result<BackendOutcome, RuntimeError> {
        self.run(&request.task_id, &request.subagent.name, &request.prompt, ctx)
            .await
    }

    async fn execute_send(
        &self,
        request: SendRequest,
        ctx: ExecutionContext,
    ) -> Result<BackendOutcome, RuntimeError> {
        self.run(&request.task_id, &request.subagent.name, request.prompt(), ctx)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SubagentDescriptor;
    use crate::error::ErrorCode;
    use tokio_util::sync::CancellationToken;

    fn start(prompt: &str) -> StartRequest {
        StartRequest {
            task_id: "t1".into(),
            subagent: SubagentDescriptor::named("finder"),
            description: "d".into(),
            prompt: prompt.into(),
            cwd: None,
        }
    }

    #[tokio::test]
    async fn produces_events_and_output() {
        let (events, mut rx) = EventSink::channel();
        let ctx = ExecutionContext {
            cancel: CancellationToken::new(),
            events,
            deadline: Duration::from_secs(1),
        };
        let outcome = SimulateBackend::new()
            .execute_start(start("find main\nmore"), ctx)
            .await
            .unwrap();
        assert_eq!(outcome.output, "[simulated finder] find main");
        assert_eq!(outcome.backend.as_deref(), Some("simulate"));

        let mut got = Vec::new();
        while let Some(e) = rx.recv().await {
            got.push(e);
        }
        assert!(matches!(got[0], TaskEvent::TurnStart { turn: 1 }));
        assert!(matches!(got[1], TaskEvent::ToolStart { .. }));
        assert!(matches!(got[2], TaskEvent::ToolEnd { is_error: false, .. }));
        assert!(matches!(got[3], TaskEvent::AssistantDelta { .. }));
    }

    #[tokio::test]
    async fn cancellation_wins_over_latency() {
        let cancel = CancellationToken::new();
        let ctx = ExecutionContext {
            cancel: cancel.clone(),
            events: EventSink::discard(),
            deadline: Duration::from_secs(10),
        };
        let backend = SimulateBackend::with_latency(Duration::from_secs(10));
        let run = tokio::spawn(async move { backend.execute_start(start("x"), ctx).await });
        cancel.cancel();
        let err = run.await.unwrap().unwrap_err();
        assert_eq!(err.code, ErrorCode::BackendAborted);
    }

    #[tokio::test]
    async fn deadline_shorter_than_latency_times_out() {
        let ctx = ExecutionContext {
            cancel: CancellationToken::new(),
            events: EventSink::discard(),
            deadline: Duration::from_millis(10),
        };
        let err = SimulateBackend::with_latency(Duration::from_secs(10))
            .execute_start(start("x"), ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BackendTimeout);
    }
}
