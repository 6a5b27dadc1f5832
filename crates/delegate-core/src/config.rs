//! Resolved engine configuration.
//!
//! Loading and merging happen in the binary; the engine only consumes an
//! [`EngineConfig`]. Every field has a default so a partial `[engine]` table
//! in the config file deserializes cleanly.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which execution path a subprocess-hosted subagent should take.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    #[default]
    Subprocess,
    Streaming,
}

impl RuntimeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subprocess => "subprocess",
            Self::Streaming => "streaming",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subprocess" => Ok(Self::Subprocess),
            "streaming" => Ok(Self::Streaming),
            other => Err(format!("invalid runtime: {other:?} (expected subprocess or streaming)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Upper bound on concurrently running batch items.
    pub max_concurrency: usize,
    pub max_batch_size: usize,
    pub default_timeout_ms: u64,
    /// Deadline for subagents listed in `slow_subagents` or marked slow.
    pub slow_timeout_ms: u64,
    pub slow_subagents: Vec<String>,
    /// Terminal tasks older than this are expired from the registry.
    pub retention_ms: u64,
    pub output_char_budget: usize,
    pub wait_poll_interval_ms: u64,
    pub default_wait_timeout_ms: u64,
    pub max_wait_timeout_ms: u64,
    /// Backend id; `None` resolves to `simulate`.
    pub backend: Option<String>,
    pub runtime: RuntimeKind,
    /// Retry a failed streaming run on the plain subprocess path.
    pub streaming_fallback: bool,
    pub subprocess: SubprocessConfig,
    pub progress: ProgressConfig,
    pub policy: PolicyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_batch_size: 16,
            default_timeout_ms: 600_000,
            slow_timeout_ms: 1_800_000,
            slow_subagents: Vec::new(),
            retention_ms: 86_400_000,
            output_char_budget: 20_000,
            wait_poll_interval_ms: 250,
            default_wait_timeout_ms: 30_000,
            max_wait_timeout_ms: 600_000,
            backend: None,
            runtime: RuntimeKind::Subprocess,
            streaming_fallback: false,
            subprocess: SubprocessConfig::default(),
            progress: ProgressConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Backend deadline for a subagent.
    pub fn timeout_for(&self, subagent_type: &str, marked_slow: bool) -> Duration {
        if marked_slow || self.slow_subagents.iter().any(|s| s == subagent_type) {
            Duration::from_millis(self.slow_timeout_ms)
        } else {
            Duration::from_millis(self.default_timeout_ms)
        }
    }

    /// Effective `wait` timeout: the requested value or the default, never
    /// above `max_wait_timeout_ms`.
    pub fn wait_timeout(&self, requested_ms: Option<u64>) -> Duration {
        let ms = requested_ms
            .unwrap_or(self.default_wait_timeout_ms)
            .min(self.max_wait_timeout_ms);
        Duration::from_millis(ms)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms.max(1))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }
}

/// How the subprocess backend launches its CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubprocessConfig {
    pub binary: String,
    /// Arguments placed before the tool allowlist flags.
    pub args: Vec<String>,
    /// Time between SIGTERM and SIGKILL.
    pub grace_period_ms: u64,
    /// Binary used by the streaming runner.
    pub streaming_binary: String,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            args: vec!["-p".to_string()],
            grace_period_ms: 5_000,
            streaming_binary: "claude".to_string(),
        }
    }
}

impl SubprocessConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProgressConfig {
    /// Sampling and throttle interval.
    pub interval_ms: u64,
    /// Rows kept in each update.
    pub max_rows: usize,
    /// Per-row text limit in characters.
    pub text_limit: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            interval_ms: 250,
            max_rows: 6,
            text_limit: 80,
        }
    }
}

impl ProgressConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    /// How long a call waits for its final update to reach a shared sink.
    pub fn flush_grace(&self) -> Duration {
        self.interval().saturating_mul(4).max(Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Master switch for delegation.
    pub enabled: bool,
    /// Allow callers to target internal subagents.
    pub allow_internal: bool,
    /// Subagents that may not be started.
    pub deny: Vec<String>,
    /// Legacy "ask" entries. Treated exactly like `deny`.
    pub ask: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_internal: false,
            deny: Vec::new(),
            ask: Vec::new(),
        }
    }
}
