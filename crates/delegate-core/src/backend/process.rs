//! Child process helpers shared by the process-backed runtimes.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::catalog::SubagentDescriptor;

/// Lines of stderr kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Read-only tools a nested CLI may ever be granted.
pub const TOOL_ALLOWLIST: [&str; 4] = ["Read", "Grep", "Glob", "LS"];

/// The descriptor's tools restricted to [`TOOL_ALLOWLIST`], comma-joined.
pub fn allowed_tools(subagent: &SubagentDescriptor) -> String {
    subagent
        .tools
        .iter()
        .filter(|tool| TOOL_ALLOWLIST.contains(&tool.as_str()))
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Stop a child: SIGTERM, wait up to `grace`, then SIGKILL.
pub async fn terminate_child(child: &mut Child, grace: Duration) {
    let Some(pid) = child.id() else {
        // Already reaped.
        return;
    };

    #[cfg(unix)]
    {
        // SAFETY: pid belongs to a child we spawned and have not reaped.
        let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if ret != 0 {
            warn!(pid, "SIGTERM failed, proceeding to SIGKILL");
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(pid, %status, "process exited after SIGTERM"),
        _ => {
            debug!(pid, "process did not exit after SIGTERM, sending SIGKILL");
            let _ = child.kill().await;
        }
    }
}

/// Why a step of a child's run did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    TimedOut,
}

/// Drive `work` unless `cancel` fires or `deadline` passes first. The
/// caller still owns the child and must terminate it on `Err`.
pub async fn until_interrupted<T>(
    cancel: &CancellationToken,
    deadline: Instant,
    work: impl Future<Output = T>,
) -> Result<T, Interrupt> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        _ = tokio::time::sleep_until(deadline) => Err(Interrupt::TimedOut),
        out = work => Ok(out),
    }
}

/// Read a child's stderr to EOF in the background, keeping the last lines.
pub fn drain_stderr<R>(stderr: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        Vec::from(tail).join("\n")
    })
}

/// Collect a drained stderr tail, tolerating a panicked reader.
pub async fn stderr_tail(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}
