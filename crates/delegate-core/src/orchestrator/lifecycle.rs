//! Execution lifecycle of one prepared task: mark running, run the backend
//! with events drained into the registry in order, mark terminal.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{
    BackendOutcome, ExecutionBackend, ExecutionContext, RuntimeError, RuntimeStage, SendRequest,
    StartRequest,
};
use crate::error::ErrorCode;
use crate::event::EventSink;
use crate::registry::{
    CompletionSignal, RegistryError, SharedRegistry, TaskOutcome, TaskRuntimeLookup, TaskSnapshot,
};

/// Budget for one backend call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadlines {
    /// Handed to the backend.
    pub backend: Duration,
    /// Extra time the backend gets to stop on its own before the call is
    /// abandoned.
    pub grace: Duration,
}

/// A created task that has not started executing yet.
pub(crate) struct PreparedTask {
    pub request: StartRequest,
    pub backend: Arc<dyn ExecutionBackend>,
    pub abort: CancellationToken,
    pub completion: CompletionSignal,
    pub deadlines: Deadlines,
}

/// Forward events from a fresh sink into the registry. The returned handle
/// finishes once every clone of the sink is dropped.
fn spawn_drain(registry: &SharedRegistry, task_id: &str) -> (EventSink, JoinHandle<()>) {
    let (sink, mut rx) = EventSink::channel();
    let registry = Arc::clone(registry);
    let task_id = task_id.to_string();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = registry.lock().await.append_event(&task_id, event) {
                debug!(task_id = %task_id, error = %e, "event not recorded");
            }
        }
    });
    (sink, handle)
}

/// Run a backend call under the outer deadline.
async fn call_backend<F>(call: F, deadlines: Deadlines) -> Result<BackendOutcome, RuntimeError>
where
    F: std::future::Future<Output = Result<BackendOutcome, RuntimeError>>,
{
    match tokio::time::timeout(deadlines.backend + deadlines.grace, call).await {
        Ok(result) => result,
        Err(_) => Err(RuntimeError::timeout(RuntimeStage::Execute, deadlines.backend)),
    }
}

async fn current(registry: &SharedRegistry, task_id: &str) -> Option<TaskSnapshot> {
    match registry.lock().await.get_task(task_id) {
        TaskRuntimeLookup::Found(snapshot) => Some(snapshot),
        TaskRuntimeLookup::Missing { .. } => None,
    }
}

/// A transition that lost a race with `cancel` is not an error.
fn settle(task_id: &str, result: Result<TaskSnapshot, RegistryError>) {
    match result {
        Ok(_) => {}
        Err(RegistryError::IllegalTransition { from, to, .. }) => {
            debug!(task_id, %from, %to, "task already settled, keeping existing state");
        }
        Err(e) => warn!(task_id, error = %e, "failed to record task outcome"),
    }
}

/// Execute a prepared task to a terminal state and return its final
/// snapshot.
pub(crate) async fn run_task(registry: &SharedRegistry, task: PreparedTask) -> Option<TaskSnapshot> {
    let PreparedTask {
        request,
        backend,
        abort,
        completion,
        deadlines,
    } = task;
    let task_id = request.task_id.clone();

    let running = registry
        .lock()
        .await
        .mark_running(&task_id, format!("Running {}", request.subagent.name));
    if let Err(e) = running {
        // Cancelled while queued.
        debug!(task_id = %task_id, error = %e, "task not started");
        completion.complete();
        return current(registry, &task_id).await;
    }
    info!(
        task_id = %task_id,
        subagent = %request.subagent.name,
        backend = backend.id(),
        deadline_ms = deadlines.backend.as_millis() as u64,
        "task started"
    );

    let (events, drain) = spawn_drain(registry, &task_id);
    let ctx = ExecutionContext {
        cancel: abort.clone(),
        events,
        deadline: deadlines.backend,
    };
    let result = call_backend(backend.execute_start(request, ctx), deadlines).await;
    if drain.await.is_err() {
        warn!(task_id = %task_id, "event drain task panicked");
    }

    let settled = {
        let mut registry = registry.lock().await;
        match result {
            Ok(outcome) => {
                let metadata = outcome.metadata();
                registry.mark_succeeded(
                    &task_id,
                    TaskOutcome::new(outcome.summary, outcome.output).with_metadata(metadata),
                )
            }
            Err(err) if err.code == ErrorCode::BackendAborted || abort.is_cancelled() => {
                info!(task_id = %task_id, error = %err, "task cancelled during execution");
                registry.mark_cancelled(&task_id, "Cancelled")
            }
            Err(err) => {
                warn!(task_id = %task_id, code = %err.code, stage = %err.stage, message = %err.message, "task failed");
                registry.mark_failed(&task_id, err.code, err.message)
            }
        }
    };
    settle(&task_id, settled);

    completion.complete();
    current(registry, &task_id).await
}

/// Run one follow-up on a task whose interaction is already marked running.
/// `cancel` stops this call; `abort` is the task's own token, fired when
/// the backend fails.
pub(crate) async fn run_interaction(
    registry: &SharedRegistry,
    backend: Arc<dyn ExecutionBackend>,
    request: SendRequest,
    cancel: CancellationToken,
    abort: CancellationToken,
    deadlines: Deadlines,
) -> Result<Option<TaskSnapshot>, RuntimeError> {
    let task_id = request.task_id.clone();
    info!(task_id = %task_id, follow_ups = request.follow_up_prompts.len(), "interaction started");

    let (events, drain) = spawn_drain(registry, &task_id);
    let ctx = ExecutionContext {
        cancel: cancel.clone(),
        events,
        deadline: deadlines.backend,
    };
    let result = call_backend(backend.execute_send(request, ctx), deadlines).await;
    if drain.await.is_err() {
        warn!(task_id = %task_id, "event drain task panicked");
    }

    let mut guard = registry.lock().await;
    match result {
        Ok(outcome) => {
            let metadata = outcome.metadata();
            let completed = guard
                .mark_interaction_complete(&task_id, outcome.summary, outcome.output)
                .and_then(|snapshot| {
                    guard.record_metadata(&task_id, metadata)?;
                    Ok(snapshot)
                });
            if let Err(e) = completed {
                // Cancelled while the follow-up ran.
                debug!(task_id = %task_id, error = %e, "interaction result discarded");
            }
        }
        Err(err) => {
            if cancel.is_cancelled() || err.code == ErrorCode::BackendAborted {
                settle(&task_id, guard.mark_cancelled(&task_id, "Cancelled"));
            } else {
                warn!(task_id = %task_id, code = %err.code, message = %err.message, "interaction failed");
                settle(&task_id, guard.mark_failed(&task_id, err.code, err.message.clone()));
            }
            abort.cancel();
            drop(guard);
            return Err(err);
        }
    }
    drop(guard);
    Ok(current(registry, &task_id).await)
}
