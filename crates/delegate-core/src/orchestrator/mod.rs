//! Orchestrator operations: start, status, wait, send, cancel.
//!
//! Every operation returns an [`OperationResult`]; validation, policy and
//! backend failures become failed results rather than errors.
//!
//! ```text
//! start  -> resolve subagent -> gate -> permission -> create_task
//!        -> bind abort + completion handles -> lifecycle -> result
//! batch  -> prepare each item (rejections keep their slot)
//!        -> BatchScheduler -> lifecycle per accepted item -> items
//! wait   -> loop { lookup; race(poll sleep, completion handles, cancel) }
//! ```

mod lifecycle;
pub mod params;
pub mod render;
pub mod result;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::select_all;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use delegate_store::TaskInvocation;

use crate::backend::{BackendRegistry, SendRequest, StartRequest};
use crate::catalog::{SubagentCatalog, SubagentDescriptor};
use crate::config::EngineConfig;
use crate::error::{ErrorCode, OperationError};
use crate::policy::{FeatureGate, PermissionPolicy, PermissionRules, StaticFeatureGate, check_policy};
use crate::progress::{
    ProgressCoordinator, ProgressFlush, ProgressSink, SurfaceRegistry, UpdateThrottle, build_update,
};
use crate::registry::{
    CompletionHandle, NewTask, SharedRegistry, TaskRuntimeLookup, TaskSnapshot, completion_pair,
};
use crate::scheduler::BatchScheduler;

use lifecycle::{Deadlines, PreparedTask};
pub use params::{
    CancelParams, Operation, SendParams, StartParams, StartPlan, StatusParams, TaskSpec, WaitParams,
};
pub use render::{render_compact, render_debug};
pub use result::{BatchStatus, OperationResult, OperationStatus, ResultItem, WaitStatus};

// ---------------------------------------------------------------------------
// Call context
// ---------------------------------------------------------------------------

/// Per-call inputs that are not part of the operation payload.
#[derive(Clone, Default)]
pub struct CallContext {
    /// Fires when the caller gives up. Parent of every task token created by
    /// the call.
    pub cancel: CancellationToken,
    /// Display surface; operations on the same surface share one progress
    /// coordinator.
    pub surface: Option<String>,
    pub sink: Option<Arc<dyn ProgressSink>>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_surface(mut self, surface: impl Into<String>) -> Self {
        self.surface = Some(surface.into());
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("surface", &self.surface)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    registry: SharedRegistry,
    backends: Arc<BackendRegistry>,
    catalog: Arc<dyn SubagentCatalog>,
    gate: Arc<dyn FeatureGate>,
    permissions: Arc<dyn PermissionPolicy>,
    surfaces: Arc<SurfaceRegistry>,
    scheduler: BatchScheduler,
    config: EngineConfig,
    cwd: Option<PathBuf>,
}

impl Orchestrator {
    /// Gate and permission rules come from `config.policy` until replaced.
    pub fn new(
        registry: SharedRegistry,
        backends: BackendRegistry,
        catalog: Arc<dyn SubagentCatalog>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            backends: Arc::new(backends),
            catalog,
            gate: Arc::new(StaticFeatureGate(config.policy.enabled)),
            permissions: Arc::new(PermissionRules::from_config(&config.policy)),
            surfaces: Arc::new(SurfaceRegistry::new()),
            scheduler: BatchScheduler::new(config.max_concurrency),
            config,
            cwd: None,
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn FeatureGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionPolicy>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_surfaces(mut self, surfaces: Arc<SurfaceRegistry>) -> Self {
        self.surfaces = surfaces;
        self
    }

    /// Working directory handed to backends.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn surfaces(&self) -> &Arc<SurfaceRegistry> {
        &self.surfaces
    }

    fn backend_id(&self) -> &str {
        self.config
            .backend
            .as_deref()
            .unwrap_or(BackendRegistry::DEFAULT_BACKEND)
    }

    fn budget(&self) -> usize {
        self.config.output_char_budget
    }

    fn failure(&self, op: &str, err: &OperationError) -> OperationResult {
        OperationResult::failure(op, err, self.backend_id())
    }

    /// Run a parsed operation.
    pub async fn execute(&self, op: Operation, call: &CallContext) -> OperationResult {
        match op {
            Operation::Start(params) => self.start(params, call).await,
            Operation::Status(params) => self.status(params).await,
            Operation::Wait(params) => self.wait(params, call).await,
            Operation::Send(params) => self.send(params, call).await,
            Operation::Cancel(params) => self.cancel(params).await,
        }
    }

    /// Parse and run a raw `{"op": ...}` payload.
    pub async fn execute_value(&self, value: Value, call: &CallContext) -> OperationResult {
        let op_name = value
            .get("op")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        match Operation::from_value(value) {
            Ok(op) => self.execute(op, call).await,
            Err(err) => self.failure(&op_name, &err),
        }
    }

    // -----------------------------------------------------------------------
    // start
    // -----------------------------------------------------------------------

    pub async fn start(&self, params: StartParams, call: &CallContext) -> OperationResult {
        match params.plan() {
            Ok(StartPlan::Single(spec)) => self.start_single(spec, call).await,
            Ok(StartPlan::Batch { tasks, parallel }) => self.start_batch(tasks, parallel, call).await,
            Err(err) => self.failure("start", &err),
        }
    }

    fn resolve_subagent(&self, name: &str) -> Result<SubagentDescriptor, OperationError> {
        let Some(descriptor) = self.catalog.resolve(name) else {
            let available: Vec<String> = self
                .catalog
                .list()
                .into_iter()
                .filter(|d| !d.internal)
                .map(|d| d.name)
                .collect();
            return Err(OperationError::new(
                ErrorCode::UnknownSubagent,
                format!("unknown subagent type {name:?}; available: {}", available.join(", ")),
            ));
        };
        if descriptor.internal && !self.config.policy.allow_internal {
            return Err(OperationError::new(
                ErrorCode::SubagentHidden,
                format!("subagent {name:?} is internal and cannot be started directly"),
            ));
        }
        Ok(descriptor)
    }

    /// Everything up to and including task creation.
    async fn prepare(
        &self,
        spec: TaskSpec,
        batch: Option<(&str, usize)>,
        call: &CallContext,
    ) -> Result<PreparedTask, OperationError> {
        let descriptor = self.resolve_subagent(&spec.subagent_type)?;
        check_policy(self.gate.as_ref(), self.permissions.as_ref(), &descriptor.name)?;
        let backend = self.backends.resolve(self.config.backend.as_deref()).ok_or_else(|| {
            OperationError::new(
                ErrorCode::BackendFailed,
                format!("backend {:?} is not registered", self.backend_id()),
            )
        })?;

        let task_id = format!("task-{}", Uuid::new_v4().simple());
        let abort = call.cancel.child_token();
        let (completion, handle) = completion_pair();
        {
            let mut registry = self.registry.lock().await;
            registry.create_task(NewTask {
                id: task_id.clone(),
                subagent_type: descriptor.name.clone(),
                description: spec.description.clone(),
                prompt: spec.prompt.clone(),
                backend: backend.id().to_string(),
                invocation: TaskInvocation {
                    cwd: self.cwd.as_ref().map(|p| p.display().to_string()),
                    batch_id: batch.map(|(id, _)| id.to_string()),
                    batch_index: batch.map(|(_, index)| index),
                },
            })?;
            registry.set_abort_handle(&task_id, abort.clone())?;
            registry.set_completion_handle(&task_id, handle)?;
        }

        let deadlines = Deadlines {
            backend: self.config.timeout_for(&descriptor.name, descriptor.slow),
            grace: self.config.subprocess.grace_period(),
        };
        Ok(PreparedTask {
            request: StartRequest {
                task_id,
                subagent: descriptor,
                description: spec.description,
                prompt: spec.prompt,
                cwd: self.cwd.clone(),
            },
            backend,
            abort,
            completion,
            deadlines,
        })
    }

    /// Start progress reporting for `ids`.
    fn attach_progress(&self, call: &CallContext, ids: Vec<String>) -> Option<CallProgress> {
        let sink = call.sink.clone()?;
        if ids.is_empty() {
            return None;
        }
        Some(match &call.surface {
            Some(surface) => CallProgress::Shared(self.surfaces.attach(
                surface,
                &self.registry,
                ids,
                sink,
                &self.config.progress,
            )),
            None => CallProgress::Owned(ProgressCoordinator::spawn(
                Arc::clone(&self.registry),
                ids,
                sink,
                self.config.progress.clone(),
            )),
        })
    }

    async fn start_single(&self, spec: TaskSpec, call: &CallContext) -> OperationResult {
        let prepared = match self.prepare(spec, None, call).await {
            Ok(prepared) => prepared,
            Err(err) => {
                info!(code = %err.code, message = %err.message, "start rejected");
                return self.failure("start", &err);
            }
        };
        let task_id = prepared.request.task_id.clone();
        let progress = self.attach_progress(call, vec![task_id.clone()]);

        let snapshot = lifecycle::run_task(&self.registry, prepared).await;
        if let Some(progress) = progress {
            progress.finish(self.config.progress.flush_grace()).await;
        }

        match snapshot {
            Some(snapshot) => OperationResult::from_snapshot("start", &snapshot, self.budget()),
            None => self.failure(
                "start",
                &OperationError::new(
                    ErrorCode::TaskNotFound,
                    format!("task {task_id} disappeared before its result was read"),
                ),
            ),
        }
    }

    async fn start_batch(
        &self,
        tasks: Vec<TaskSpec>,
        parallel: bool,
        call: &CallContext,
    ) -> OperationResult {
        if tasks.len() > self.config.max_batch_size {
            return self.failure(
                "start",
                &OperationError::invalid_params(format!(
                    "batch of {} tasks exceeds the limit of {}",
                    tasks.len(),
                    self.config.max_batch_size
                )),
            );
        }

        let total = tasks.len();
        let batch_id = format!("batch-{}", Uuid::new_v4().simple());
        self.registry.lock().await.begin_batch(&batch_id);

        let mut items: Vec<Option<ResultItem>> = vec![None; total];
        let mut accepted: Vec<(usize, PreparedTask)> = Vec::new();
        for (index, spec) in tasks.into_iter().enumerate() {
            let prepared = match params::validate_spec(&spec) {
                Ok(()) => self.prepare(spec, Some((&batch_id, index)), call).await,
                Err(err) => Err(err),
            };
            match prepared {
                Ok(task) => accepted.push((index, task)),
                Err(err) => {
                    debug!(batch_id = %batch_id, index, code = %err.code, "batch item rejected");
                    items[index] = Some(ResultItem::rejected(&err).at(index));
                }
            }
        }
        let accepted_count = accepted.len();
        info!(batch_id = %batch_id, total, accepted = accepted_count, parallel, "batch starting");

        let ids: Vec<String> = accepted
            .iter()
            .map(|(_, task)| task.request.task_id.clone())
            .collect();
        let progress = self.attach_progress(call, ids);

        let registry = &self.registry;
        let outcomes = self
            .scheduler
            .run(
                accepted,
                parallel,
                &call.cancel,
                |_, (index, task)| async move {
                    let task_id = task.request.task_id.clone();
                    (index, task_id, Ok::<_, PreparedTask>(lifecycle::run_task(registry, task).await))
                },
                |_, (index, task)| (index, task.request.task_id.clone(), Err(task)),
            )
            .await;

        for (index, task_id, outcome) in outcomes {
            let snapshot: Option<TaskSnapshot> = match outcome {
                Ok(snapshot) => snapshot,
                Err(skipped) => {
                    let mut guard = registry.lock().await;
                    let cancelled = guard.mark_cancelled(&task_id, "Cancelled: batch aborted before start");
                    drop(guard);
                    skipped.completion.complete();
                    cancelled.ok()
                }
            };
            items[index] = Some(match snapshot {
                Some(snapshot) => ResultItem::from_snapshot(&snapshot, self.budget()).at(index),
                None => {
                    let lookup = registry.lock().await.get_task(&task_id);
                    lookup_item(lookup, self.budget()).at(index)
                }
            });
        }

        if let Some(progress) = progress {
            progress.finish(self.config.progress.flush_grace()).await;
        }
        self.registry.lock().await.end_batch(&batch_id);

        let items: Vec<ResultItem> = items.into_iter().flatten().collect();
        let rejected = total - accepted_count;
        let succeeded = items.iter().filter(|i| i.succeeded()).count();
        let batch_status = if accepted_count == 0 {
            BatchStatus::Rejected
        } else if rejected > 0 {
            BatchStatus::Partial
        } else if items.iter().all(ResultItem::is_terminal) {
            BatchStatus::Completed
        } else {
            BatchStatus::Accepted
        };
        let status = if rejected == 0 && succeeded == total {
            OperationStatus::Succeeded
        } else {
            OperationStatus::Failed
        };
        info!(batch_id = %batch_id, succeeded, rejected, "batch finished");

        let mut result = OperationResult::with_items(
            "start",
            status,
            format!("{succeeded}/{total} succeeded, {rejected} rejected"),
            self.backend_id(),
            items,
        );
        result.batch_status = Some(batch_status);
        result
    }

    // -----------------------------------------------------------------------
    // status / wait
    // -----------------------------------------------------------------------

    pub async fn status(&self, params: StatusParams) -> OperationResult {
        if params.ids.is_empty() {
            return self.failure("status", &OperationError::invalid_params("ids must not be empty"));
        }
        let lookups = self.registry.lock().await.get_tasks(&params.ids);
        let found = lookups.iter().filter(|l| l.found()).count();
        let items: Vec<ResultItem> = lookups
            .into_iter()
            .map(|lookup| lookup_item(lookup, self.budget()))
            .collect();
        let status = if found == items.len() {
            OperationStatus::Succeeded
        } else {
            OperationStatus::Failed
        };
        OperationResult::with_items(
            "status",
            status,
            format!("{found}/{} found", items.len()),
            self.backend_id(),
            items,
        )
    }

    pub async fn wait(&self, params: WaitParams, call: &CallContext) -> OperationResult {
        if params.ids.is_empty() {
            return self.failure("wait", &OperationError::invalid_params("ids must not be empty"));
        }
        let timeout = self.config.wait_timeout(params.timeout_ms);
        let deadline = Instant::now() + timeout;
        let poll = self.config.wait_poll_interval();
        let mut throttle = UpdateThrottle::new(self.config.progress.interval());
        // Handles that already resolved; awaiting them again would spin.
        let mut exhausted: HashSet<String> = HashSet::new();

        let (wait_status, lookups) = loop {
            let (lookups, handles) = {
                let mut registry = self.registry.lock().await;
                let lookups = registry.get_tasks(&params.ids);
                let handles: Vec<(String, CompletionHandle)> = lookups
                    .iter()
                    .filter(|l| l.found() && !l.is_resolved())
                    .filter_map(|l| l.snapshot())
                    .filter(|s| !exhausted.contains(s.id()))
                    .filter_map(|s| {
                        registry
                            .completion_handle(s.id())
                            .map(|h| (s.id().to_string(), h))
                    })
                    .collect();
                (lookups, handles)
            };

            if let Some(sink) = &call.sink {
                let snapshots: Vec<TaskSnapshot> =
                    lookups.iter().filter_map(|l| l.snapshot().cloned()).collect();
                let update = build_update(&snapshots, &self.config.progress);
                if let Some(update) = throttle.offer(update, std::time::Instant::now()) {
                    sink.send(&update);
                }
            }

            if lookups.iter().all(TaskRuntimeLookup::is_resolved) {
                break (WaitStatus::Completed, lookups);
            }
            if call.cancel.is_cancelled() {
                break (WaitStatus::Aborted, lookups);
            }
            let now = Instant::now();
            if now >= deadline {
                break (WaitStatus::Timeout, lookups);
            }

            let nap = poll.min(deadline - now);
            let (names, futures): (Vec<String>, Vec<CompletionHandle>) = handles.into_iter().unzip();
            let any_done = async move {
                if futures.is_empty() {
                    std::future::pending::<usize>().await
                } else {
                    select_all(futures).await.1
                }
            };
            tokio::select! {
                _ = call.cancel.cancelled() => {}
                _ = tokio::time::sleep(nap) => {}
                index = any_done => {
                    if let Some(name) = names.get(index) {
                        exhausted.insert(name.clone());
                    }
                }
            }
        };

        if let (Some(sink), Some(update)) = (&call.sink, throttle.flush()) {
            sink.send(&update);
        }

        let total = lookups.len();
        let resolved = lookups.iter().filter(|l| l.is_resolved()).count();
        let items: Vec<ResultItem> = lookups
            .into_iter()
            .map(|lookup| lookup_item(lookup, self.budget()))
            .collect();
        let all_succeeded = items.iter().all(ResultItem::succeeded);
        let (status, summary) = match wait_status {
            WaitStatus::Completed if all_succeeded => (
                OperationStatus::Succeeded,
                format!("all {total} tasks succeeded"),
            ),
            WaitStatus::Completed => {
                let succeeded = items.iter().filter(|i| i.succeeded()).count();
                (
                    OperationStatus::Failed,
                    format!("{succeeded}/{total} tasks succeeded"),
                )
            }
            WaitStatus::Timeout => (
                OperationStatus::Failed,
                format!(
                    "timed out after {}ms with {resolved}/{total} tasks finished",
                    timeout.as_millis()
                ),
            ),
            WaitStatus::Aborted => (
                OperationStatus::Cancelled,
                format!("wait aborted with {resolved}/{total} tasks finished"),
            ),
        };
        debug!(?wait_status, resolved, total, "wait finished");

        let mut result =
            OperationResult::with_items("wait", status, summary, self.backend_id(), items);
        result.wait_status = Some(wait_status);
        result
    }

    // -----------------------------------------------------------------------
    // send / cancel
    // -----------------------------------------------------------------------

    pub async fn send(&self, params: SendParams, call: &CallContext) -> OperationResult {
        if params.prompt.trim().is_empty() {
            return self.failure("send", &OperationError::invalid_params("prompt must not be empty"));
        }

        let snapshot = match self.registry.lock().await.get_task(&params.id) {
            TaskRuntimeLookup::Found(snapshot) => snapshot,
            TaskRuntimeLookup::Missing { code, message, .. } => {
                return self.failure("send", &OperationError::new(code, message));
            }
        };
        let descriptor = match self.catalog.resolve(&snapshot.record.subagent_type) {
            Some(descriptor) => descriptor,
            None => {
                return self.failure(
                    "send",
                    &OperationError::new(
                        ErrorCode::UnknownSubagent,
                        format!("subagent {:?} is no longer available", snapshot.record.subagent_type),
                    ),
                );
            }
        };
        let Some(backend) = self.backends.get(&snapshot.backend) else {
            return self.failure(
                "send",
                &OperationError::new(
                    ErrorCode::BackendFailed,
                    format!("backend {:?} is not registered", snapshot.backend),
                ),
            );
        };

        let (opened, abort) = {
            let mut registry = self.registry.lock().await;
            let opened = registry.mark_interaction_running(&params.id, &params.prompt, "Following up");
            let abort = match registry.abort_handle(&params.id) {
                Some(token) => token,
                None => {
                    let token = call.cancel.child_token();
                    if opened.is_ok() {
                        registry.set_abort_handle(&params.id, token.clone()).ok();
                    }
                    token
                }
            };
            (opened, abort)
        };
        let opened = match opened {
            Ok(snapshot) => snapshot,
            Err(err) => return self.failure("send", &OperationError::from(err)),
        };

        // The call stops when either the task or this caller is cancelled.
        let interaction = abort.child_token();
        let link = {
            let caller = call.cancel.clone();
            let interaction = interaction.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = caller.cancelled() => interaction.cancel(),
                    _ = interaction.cancelled() => {}
                }
            })
        };

        let request = SendRequest {
            task_id: params.id.clone(),
            subagent: descriptor,
            description: opened.record.description.clone(),
            initial_prompt: opened.record.prompt.clone(),
            follow_up_prompts: opened.follow_up_prompts.clone(),
            cwd: self.cwd.clone(),
        };
        let deadlines = Deadlines {
            backend: self
                .config
                .timeout_for(&request.subagent.name, request.subagent.slow),
            grace: self.config.subprocess.grace_period(),
        };
        let outcome =
            lifecycle::run_interaction(&self.registry, backend, request, interaction, abort, deadlines)
                .await;
        link.abort();

        let current = match outcome {
            Ok(Some(snapshot)) => Some(snapshot),
            Ok(None) | Err(_) => self.registry.lock().await.get_task(&params.id).into_snapshot(),
        };
        match current {
            Some(snapshot) => OperationResult::from_snapshot("send", &snapshot, self.budget()),
            None => self.failure(
                "send",
                &OperationError::new(ErrorCode::TaskNotFound, format!("task {} not found", params.id)),
            ),
        }
    }

    pub async fn cancel(&self, params: CancelParams) -> OperationResult {
        let mut registry = self.registry.lock().await;
        let snapshot = match registry.get_task(&params.id) {
            TaskRuntimeLookup::Found(snapshot) => snapshot,
            TaskRuntimeLookup::Missing { code, message, .. } => {
                drop(registry);
                return self.failure("cancel", &OperationError::new(code, message));
            }
        };
        let previous = snapshot.state();

        let (snapshot, applied) = if previous.is_terminal() {
            (snapshot, false)
        } else {
            match registry.mark_cancelled(&params.id, "Cancelled by request") {
                Ok(snapshot) => {
                    if let Some(token) = registry.abort_handle(&params.id) {
                        token.cancel();
                    }
                    info!(task_id = %params.id, previous = %previous, "task cancelled");
                    (snapshot, true)
                }
                Err(err) => {
                    drop(registry);
                    return self.failure("cancel", &OperationError::from(err));
                }
            }
        };
        drop(registry);

        let mut result = OperationResult::from_snapshot("cancel", &snapshot, self.budget());
        result.status = OperationStatus::Succeeded;
        result.cancel_applied = Some(applied);
        result.previous_status = Some(previous);
        if !applied {
            result.summary = format!("task already {previous}; nothing to cancel");
        }
        result
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("backends", &self.backends)
            .field("config", &self.config)
            .field("cwd", &self.cwd)
            .finish()
    }
}

/// Progress for one call: a coordinator it owns, or its share of the
/// surface's coordinator.
enum CallProgress {
    Owned(ProgressCoordinator),
    Shared(ProgressFlush),
}

impl CallProgress {
    /// Returns once the call's final state has reached the sink.
    async fn finish(self, grace: std::time::Duration) {
        match self {
            Self::Owned(coordinator) => coordinator.shutdown().await,
            Self::Shared(flush) => {
                if !flush.wait(grace).await {
                    debug!(grace_ms = grace.as_millis() as u64, "final progress update not confirmed in time");
                }
            }
        }
    }
}

fn lookup_item(lookup: TaskRuntimeLookup, budget: usize) -> ResultItem {
    match lookup {
        TaskRuntimeLookup::Found(snapshot) => ResultItem::from_snapshot(&snapshot, budget),
        TaskRuntimeLookup::Missing { id, code, message } => ResultItem::missing(&id, code, message),
    }
}
