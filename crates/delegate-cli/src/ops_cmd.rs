//! One-shot commands that map onto a single orchestrator operation.

use std::io::{IsTerminal, Read};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use delegate_core::catalog::{SubagentCatalog, SubagentDescriptor};
use delegate_core::orchestrator::{
    CancelParams, SendParams, StartParams, StatusParams, TaskSpec, WaitParams, render_compact,
    render_debug,
};
use delegate_core::progress::{FnSink, ProgressUpdate};
use delegate_core::{CallContext, OperationResult, Orchestrator};

use crate::signal;

/// How results are printed to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputMode {
    pub json: bool,
    pub debug: bool,
}

/// Print `result` and report whether the operation succeeded.
pub fn print_result(result: &OperationResult, mode: OutputMode) -> Result<bool> {
    if mode.json {
        let text = serde_json::to_string_pretty(result).context("failed to serialize result")?;
        println!("{text}");
    } else if mode.debug {
        println!("{}", render_debug(result));
    } else {
        println!("{}", render_compact(result));
    }
    Ok(result.is_success())
}

/// A call context tied to Ctrl-C, with progress on stderr when it is a
/// terminal.
fn interactive_call(mode: OutputMode) -> CallContext {
    let cancel = CancellationToken::new();
    signal::install_ctrl_c(cancel.clone());

    let mut call = CallContext::new().with_cancel(cancel).with_surface("cli");
    if !mode.json && std::io::stderr().is_terminal() {
        call = call.with_sink(Arc::new(FnSink(|update: &ProgressUpdate| {
            eprintln!("  {}", update.status_line);
        })));
    }
    call
}

/// `-` or an absent value reads from stdin.
pub fn read_prompt(arg: Option<String>) -> Result<String> {
    match arg {
        Some(prompt) if prompt != "-" => Ok(prompt),
        _ => {
            let mut prompt = String::new();
            std::io::stdin()
                .read_to_string(&mut prompt)
                .context("failed to read prompt from stdin")?;
            Ok(prompt)
        }
    }
}

/// Parse a JSON array of `{subagent_type, description, prompt}` objects.
pub fn read_batch(path: &Path) -> Result<Vec<TaskSpec>> {
    let text = if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read batch from stdin")?;
        text
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read batch file {}", path.display()))?
    };
    serde_json::from_str(&text).with_context(|| {
        format!(
            "batch in {} must be a JSON array of {{subagent_type, description, prompt}}",
            path.display()
        )
    })
}

// -----------------------------------------------------------------------
// Operations
// -----------------------------------------------------------------------

pub async fn run_start(orch: &Orchestrator, spec: TaskSpec, mode: OutputMode) -> Result<bool> {
    let call = interactive_call(mode);
    let result = orch.start(StartParams::single(spec), &call).await;
    print_result(&result, mode)
}

pub async fn run_batch(
    orch: &Orchestrator,
    tasks: Vec<TaskSpec>,
    parallel: bool,
    mode: OutputMode,
) -> Result<bool> {
    let call = interactive_call(mode);
    let result = orch.start(StartParams::batch(tasks, parallel), &call).await;
    print_result(&result, mode)
}

pub async fn run_status(orch: &Orchestrator, ids: Vec<String>, mode: OutputMode) -> Result<bool> {
    let result = orch.status(StatusParams { ids }).await;
    print_result(&result, mode)
}

pub async fn run_wait(
    orch: &Orchestrator,
    ids: Vec<String>,
    timeout_ms: Option<u64>,
    mode: OutputMode,
) -> Result<bool> {
    let call = interactive_call(mode);
    let result = orch.wait(WaitParams { ids, timeout_ms }, &call).await;
    print_result(&result, mode)
}

pub async fn run_send(
    orch: &Orchestrator,
    id: String,
    prompt: String,
    mode: OutputMode,
) -> Result<bool> {
    let call = interactive_call(mode);
    let result = orch.send(SendParams { id, prompt }, &call).await;
    print_result(&result, mode)
}

pub async fn run_cancel(orch: &Orchestrator, id: String, mode: OutputMode) -> Result<bool> {
    let result = orch.cancel(CancelParams { id }).await;
    print_result(&result, mode)
}

// -----------------------------------------------------------------------
// Catalog and maintenance
// -----------------------------------------------------------------------

/// Subagents callers may target; internal ones only with `all`.
pub fn visible_subagents(catalog: &dyn SubagentCatalog, all: bool) -> Vec<SubagentDescriptor> {
    catalog
        .list()
        .into_iter()
        .filter(|d| all || !d.internal)
        .collect()
}

pub fn run_subagents(catalog: &dyn SubagentCatalog, all: bool, mode: OutputMode) -> Result<()> {
    let subagents = visible_subagents(catalog, all);
    if mode.json {
        let text =
            serde_json::to_string_pretty(&subagents).context("failed to serialize subagents")?;
        println!("{text}");
        return Ok(());
    }

    let width = subagents.iter().map(|d| d.name.len()).max().unwrap_or(0);
    for descriptor in &subagents {
        let mut tags = Vec::new();
        if descriptor.slow {
            tags.push("slow");
        }
        if descriptor.internal {
            tags.push("internal");
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", tags.join(", "))
        };
        println!(
            "{:<width$}  {}{tags}",
            descriptor.name, descriptor.description
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct RecoverReport {
    recovered: Vec<String>,
}

/// Settle tasks left queued or running by a process that is gone.
pub async fn run_recover(orch: &Orchestrator, mode: OutputMode) -> Result<()> {
    let recovered = orch.registry().lock().await.recover_orphans();
    if mode.json {
        let text = serde_json::to_string_pretty(&RecoverReport { recovered })
            .context("failed to serialize recovery report")?;
        println!("{text}");
    } else if recovered.is_empty() {
        println!("No orphaned tasks.");
    } else {
        println!("Recovered {} orphaned task(s):", recovered.len());
        for id in &recovered {
            println!("  - {id}");
        }
    }
    Ok(())
}
