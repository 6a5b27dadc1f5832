//! `delegate session`: a long-lived NDJSON loop over stdin/stdout.
//!
//! ```text
//! stdin : {"request_id": "r1", "operation": {"op": "start", ...}}
//! stdout: {"request_id": "r1", "result": {...}}
//! stderr: {"request_id": "r1", "progress": {...}}
//! ```
//!
//! Requests run concurrently; responses are written in completion order,
//! one line each. A line that cannot be parsed gets an `error` response.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use delegate_core::progress::{FnSink, ProgressUpdate};
use delegate_core::{CallContext, OperationResult, Orchestrator};

use crate::signal;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionRequest {
    request_id: Value,
    operation: Value,
    /// Requests naming the same surface share one progress stream.
    #[serde(default)]
    surface: Option<String>,
}

#[derive(Debug, Serialize)]
struct SessionResponse<'a> {
    request_id: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a OperationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProgressLine<'a> {
    request_id: &'a Value,
    progress: &'a ProgressUpdate,
}

/// Run the session on the process's stdin/stdout until EOF or Ctrl-C.
pub async fn run_session(orch: Arc<Orchestrator>) -> Result<()> {
    let cancel = CancellationToken::new();
    signal::install_ctrl_c(cancel.clone());

    let stdin = BufReader::new(tokio::io::stdin());
    serve(orch, stdin, tokio::io::stdout(), cancel).await
}

/// Read requests from `input` and write responses to `output`.
///
/// Stops reading at EOF or when `cancel` fires; in-flight requests see the
/// cancellation through their call context and are drained before return.
pub async fn serve<R, W>(
    orch: Arc<Orchestrator>,
    input: R,
    output: W,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_lines(output, rx));

    let mut lines = input.lines();
    let mut in_flight = JoinSet::new();
    info!("session started");

    loop {
        reap(&mut in_flight);
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                info!("session cancelled; draining in-flight requests");
                break;
            }
            line = lines.next_line() => line.context("failed to read session input")?,
        };
        let Some(line) = line else {
            debug!("session input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: SessionRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "unparseable session request");
                let request_id = serde_json::from_str::<Value>(&line)
                    .ok()
                    .and_then(|v| v.get("request_id").cloned())
                    .unwrap_or(Value::Null);
                send_line(
                    &tx,
                    &SessionResponse {
                        request_id: &request_id,
                        result: None,
                        error: Some(format!("invalid request: {e}")),
                    },
                );
                continue;
            }
        };

        let orch = Arc::clone(&orch);
        let tx = tx.clone();
        let cancel = cancel.child_token();
        in_flight.spawn(async move {
            let call = request_context(&request, cancel);
            let result = orch.execute_value(request.operation, &call).await;
            debug!(request_id = %request.request_id, op = %result.op, status = %result.status, "request finished");
            send_line(
                &tx,
                &SessionResponse {
                    request_id: &request.request_id,
                    result: Some(&result),
                    error: None,
                },
            );
        });
    }

    while let Some(joined) = in_flight.join_next().await {
        log_join(joined);
    }
    orch.surfaces().dispose_all().await;
    drop(tx);
    writer.await.context("session writer task failed")??;
    info!("session finished");
    Ok(())
}

/// Collect requests that have already answered.
fn reap(in_flight: &mut JoinSet<()>) {
    while let Some(joined) = in_flight.try_join_next() {
        log_join(joined);
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        warn!(error = %e, "session request task panicked");
    }
}

fn request_context(request: &SessionRequest, cancel: CancellationToken) -> CallContext {
    let request_id = request.request_id.clone();
    let surface = request.surface.clone().unwrap_or_else(|| match &request_id {
        Value::String(id) => format!("session:{id}"),
        other => format!("session:{other}"),
    });
    CallContext::new()
        .with_cancel(cancel)
        .with_surface(surface)
        .with_sink(Arc::new(FnSink(move |update: &ProgressUpdate| {
            let line = ProgressLine {
                request_id: &request_id,
                progress: update,
            };
            if let Ok(text) = serde_json::to_string(&line) {
                eprintln!("{text}");
            }
        })))
}

fn send_line<T: Serialize>(tx: &mpsc::UnboundedSender<String>, value: &T) {
    match serde_json::to_string(value) {
        Ok(text) => {
            if tx.send(text).is_err() {
                warn!("session output closed; dropping response");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize session response"),
    }
}

async fn write_lines<W>(mut output: W, mut rx: mpsc::UnboundedReceiver<String>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        output
            .write_all(line.as_bytes())
            .await
            .context("failed to write session output")?;
        output.write_all(b"\n").await.context("failed to write session output")?;
        output.flush().await.context("failed to flush session output")?;
    }
    Ok(())
}
