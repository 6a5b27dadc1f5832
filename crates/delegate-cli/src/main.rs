mod config;
mod engine;
mod ops_cmd;
mod session_cmd;
mod signal;
#[cfg(test)]
mod test_util;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};

use delegate_core::orchestrator::TaskSpec;

use config::{CliOverrides, DelegateConfig};
use ops_cmd::OutputMode;

#[derive(Parser)]
#[command(name = "delegate", about = "Delegate tasks to named subagents")]
struct Cli {
    /// Task registry file (overrides DELEGATE_REGISTRY_PATH env var)
    #[arg(long, global = true)]
    registry_path: Option<PathBuf>,

    /// Config file (default: ~/.config/delegate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Execution backend id (overrides DELEGATE_BACKEND env var)
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Print every result field and log at debug level
    #[arg(long, global = true)]
    debug: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// List the subagents tasks can be routed to
    Subagents {
        /// Include internal subagents
        #[arg(long)]
        all: bool,
    },
    /// Start one task and wait for it to finish
    Start {
        /// Subagent to route the task to
        subagent_type: String,
        /// Short description shown in progress and status
        #[arg(long, short)]
        description: String,
        /// Prompt text; omit or pass `-` to read stdin
        #[arg(long, short)]
        prompt: Option<String>,
    },
    /// Start a batch of tasks from a JSON array
    Batch {
        /// File holding `[{subagent_type, description, prompt}, ...]`; `-` reads stdin
        file: PathBuf,
        /// Run items concurrently (bounded by max_concurrency)
        #[arg(long)]
        parallel: bool,
    },
    /// Show the current state of tasks
    Status {
        /// Task IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Wait until tasks finish or the timeout elapses
    Wait {
        /// Task IDs
        #[arg(required = true)]
        ids: Vec<String>,
        /// Wait timeout in milliseconds (clamped to max_wait_timeout_ms)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Send a follow-up prompt to a running task
    Send {
        /// Task ID
        id: String,
        /// Prompt text; omit or pass `-` to read stdin
        #[arg(long, short)]
        prompt: Option<String>,
    },
    /// Cancel a task
    Cancel {
        /// Task ID
        id: String,
    },
    /// Serve NDJSON requests on stdin until EOF
    Session,
    /// Settle tasks left queued or running by a process that exited
    Recover,
    /// Print shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

fn cmd_init(config_override: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = config_override.unwrap_or_else(config::config_path);

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile::default();
    config::save_config(&path, &cfg)?;

    println!("Config written to {}", path.display());
    println!("  engine.max_concurrency = {}", cfg.engine.max_concurrency);
    println!("  engine.default_timeout_ms = {}", cfg.engine.default_timeout_ms);
    println!();
    println!("Next: run `delegate subagents` to see where tasks can be routed.");

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mode = OutputMode {
        json: cli.json,
        debug: cli.debug,
    };
    let overrides = CliOverrides {
        config: cli.config.clone(),
        registry_path: cli.registry_path.clone(),
        backend: cli.backend.clone(),
    };

    let ok = match cli.command {
        Commands::Init { force } => {
            cmd_init(cli.config, force)?;
            true
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "delegate", &mut std::io::stdout());
            true
        }
        Commands::Subagents { all } => {
            let resolved = DelegateConfig::resolve(&overrides)?;
            ops_cmd::run_subagents(&resolved.catalog, all, mode)?;
            true
        }
        Commands::Start {
            subagent_type,
            description,
            prompt,
        } => {
            let resolved = DelegateConfig::resolve(&overrides)?;
            let orch = engine::build_orchestrator(&resolved)?;
            let prompt = ops_cmd::read_prompt(prompt)?;
            let spec = TaskSpec::new(subagent_type, description, prompt);
            ops_cmd::run_start(&orch, spec, mode).await?
        }
        Commands::Batch { file, parallel } => {
            let resolved = DelegateConfig::resolve(&overrides)?;
            let orch = engine::build_orchestrator(&resolved)?;
            let tasks = ops_cmd::read_batch(&file)?;
            ops_cmd::run_batch(&orch, tasks, parallel, mode).await?
        }
        Commands::Status { ids } => {
            let resolved = DelegateConfig::resolve(&overrides)?;
            let orch = engine::build_orchestrator(&resolved)?;
            ops_cmd::run_status(&orch, ids, mode).await?
        }
        Commands::Wait { ids, timeout_ms } => {
            let resolved = DelegateConfig::resolve(&overrides)?;
            let orch = engine::build_orchestrator(&resolved)?;
            ops_cmd::run_wait(&orch, ids, timeout_ms, mode).await?
        }
        Commands::Send { id, prompt } => {
            let resolved = DelegateConfig::resolve(&overrides)?;
            let orch = engine::build_orchestrator(&resolved)?;
            let prompt = ops_cmd::read_prompt(prompt)?;
            ops_cmd::run_send(&orch, id, prompt, mode).await?
        }
        Commands::Cancel { id } => {
            let resolved = DelegateConfig::resolve(&overrides)?;
            let orch = engine::build_orchestrator(&resolved)?;
            ops_cmd::run_cancel(&orch, id, mode).await?
        }
        Commands::Session => {
            let resolved = DelegateConfig::resolve(&overrides)?;
            let orch = engine::build_orchestrator(&resolved)?;
            session_cmd::run_session(Arc::new(orch)).await?;
            true
        }
        Commands::Recover => {
            let resolved = DelegateConfig::resolve(&overrides)?;
            let orch = engine::build_orchestrator(&resolved)?;
            ops_cmd::run_recover(&orch, mode).await?;
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "delegate",
            "status",
            "task-1",
            "task-2",
            "--json",
            "--registry-path",
            "/tmp/tasks.json",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.registry_path, Some(PathBuf::from("/tmp/tasks.json")));
        match cli.command {
            Commands::Status { ids } => assert_eq!(ids, vec!["task-1", "task-2"]),
            _ => panic!("expected status"),
        }
    }

    #[test]
    fn status_requires_ids() {
        assert!(Cli::try_parse_from(["delegate", "status"]).is_err());
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        cmd_init(Some(path.clone()), false).unwrap();
        assert!(path.exists());

        let err = cmd_init(Some(path.clone()), false).unwrap_err();
        assert!(err.to_string().contains("already exists"), "{err}");
        cmd_init(Some(path.clone()), true).unwrap();

        let loaded = config::load_config(&path).unwrap().unwrap();
        assert_eq!(loaded.engine, delegate_core::config::EngineConfig::default());
    }
}
