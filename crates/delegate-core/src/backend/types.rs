//! Request, context and result types shared by every backend.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::catalog::SubagentDescriptor;
use crate::error::ErrorCode;
use crate::event::EventSink;
use crate::registry::ExecutionMetadata;

/// First execution of a task.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub task_id: String,
    pub subagent: SubagentDescriptor,
    pub description: String,
    pub prompt: String,
    pub cwd: Option<PathBuf>,
}

/// A follow-up on a running task. `follow_up_prompts` is the full ordered
/// history and ends with the prompt being sent now.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub task_id: String,
    pub subagent: SubagentDescriptor,
    pub description: String,
    pub initial_prompt: String,
    pub follow_up_prompts: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl SendRequest {
    /// The latest prompt.
    pub fn prompt(&self) -> &str {
        self.follow_up_prompts
            .last()
            .map(String::as_str)
            .unwrap_or(&self.initial_prompt)
    }

    /// The whole conversation rendered as one prompt for backends without
    /// native session support.
    pub fn transcript_prompt(&self) -> String {
        let mut text = self.initial_prompt.clone();
        for (i, follow_up) in self.follow_up_prompts.iter().enumerate() {
            text.push_str(&format!("\n\nFollow-up {}:\n{follow_up}", i + 1));
        }
        text
    }
}

/// Everything a backend needs besides the request itself.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub cancel: CancellationToken,
    pub events: EventSink,
    pub deadline: Duration,
}

/// Successful backend result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOutcome {
    pub summary: String,
    pub output: String,
    pub backend: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub runtime: Option<String>,
    pub route: Option<String>,
}

impl BackendOutcome {
    pub fn metadata(&self) -> ExecutionMetadata {
        ExecutionMetadata {
            backend: self.backend.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            runtime: self.runtime.clone(),
            route: self.route.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStage {
    Spawn,
    Execute,
    Stream,
    Collect,
}

impl RuntimeStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spawn => "spawn",
            Self::Execute => "execute",
            Self::Stream => "stream",
            Self::Collect => "collect",
        }
    }
}

impl fmt::Display for RuntimeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed backend failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code} during {stage}: {message}")]
pub struct RuntimeError {
    pub code: ErrorCode,
    pub stage: RuntimeStage,
    pub message: String,
}

impl RuntimeError {
    pub fn new(code: ErrorCode, stage: RuntimeStage, message: impl Into<String>) -> Self {
        Self {
            code,
            stage,
            message: message.into(),
        }
    }

    pub fn timeout(stage: RuntimeStage, deadline: Duration) -> Self {
        Self::new(
            ErrorCode::BackendTimeout,
            stage,
            format!("no result within {}ms", deadline.as_millis()),
        )
    }

    pub fn aborted(stage: RuntimeStage) -> Self {
        Self::new(ErrorCode::BackendAborted, stage, "execution was cancelled")
    }

    /// Failures a streaming run may recover from by taking the subprocess
    /// path instead.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::BackendFailed | ErrorCode::BackendSpawnFailed | ErrorCode::BackendExitNonzero
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send_request(follow_ups: &[&str]) -> SendRequest {
        SendRequest {
            task_id: "t1".into(),
            subagent: SubagentDescriptor::named("finder"),
            description: "d".into(),
            initial_prompt: "first".into(),
            follow_up_prompts: follow_ups.iter().map(|s| s.to_string()).collect(),
            cwd: None,
        }
    }

    #[test]
    fn send_prompt_is_latest_follow_up() {
        assert_eq!(send_request(&["a", "b"]).prompt(), "b");
        assert_eq!(send_request(&[]).prompt(), "first");
    }

    #[test]
    fn transcript_prompt_keeps_order() {
        let text = send_request(&["a", "b"]).transcript_prompt();
        let a = text.find("Follow-up 1:\na").unwrap();
        let b = text.find("Follow-up 2:\nb").unwrap();
        assert!(text.starts_with("first"));
        assert!(a < b);
    }

    #[test]
    fn fallback_eligibility() {
        let eligible = [
            ErrorCode::BackendFailed,
            ErrorCode::BackendSpawnFailed,
            ErrorCode::BackendExitNonzero,
        ];
        for code in ErrorCode::ALL {
            let err = RuntimeError::new(code, RuntimeStage::Stream, "x");
            assert_eq!(err.is_fallback_eligible(), eligible.contains(&code), "{code}");
        }
    }

    #[test]
    fn display_includes_code_and_stage() {
        let err = RuntimeError::timeout(RuntimeStage::Execute, Duration::from_millis(5));
        assert_eq!(err.to_string(), "backend_timeout during execute: no result within 5ms");
    }
}
