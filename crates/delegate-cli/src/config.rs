//! Configuration file management for delegate.
//!
//! Provides a TOML-based config file at `~/.config/delegate/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use delegate_core::catalog::{StaticCatalog, SubagentDescriptor};
use delegate_core::config::{EngineConfig, RuntimeKind};
use delegate_store::StoreConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Extra subagents; an entry named like a built-in replaces it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subagents: Vec<SubagentDescriptor>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrySection {
    /// Snapshot file location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the delegate config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/delegate` or `~/.config/delegate`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("delegate");
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("delegate")
}

/// Return the path to the delegate config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse a config file. A missing file is `Ok(None)`.
pub fn load_config(path: &Path) -> Result<Option<ConfigFile>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read config file at {}", path.display()));
        }
    };
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub registry_path: Option<PathBuf>,
    pub backend: Option<String>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct DelegateConfig {
    /// The file that was consulted, whether or not it existed.
    pub config_path: PathBuf,
    pub registry_path: PathBuf,
    pub engine: EngineConfig,
    pub catalog: StaticCatalog,
}

const BACKEND_ENV: &str = "DELEGATE_BACKEND";
const RUNTIME_ENV: &str = "DELEGATE_RUNTIME";
const FALLBACK_ENV: &str = "DELEGATE_STREAMING_FALLBACK";
const MAX_CONCURRENCY_ENV: &str = "DELEGATE_MAX_CONCURRENCY";

impl DelegateConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Registry path: `--registry-path` > `DELEGATE_REGISTRY_PATH` > `[registry].path` > XDG state default
    /// - Backend: `--backend` > `DELEGATE_BACKEND` > `[engine].backend` > `simulate`
    /// - Runtime, streaming fallback and concurrency: env > `[engine]` > default
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        let config_path = cli.config.clone().unwrap_or_else(config_path);
        let file = match load_config(&config_path)? {
            Some(file) => file,
            None if cli.config.is_some() => {
                bail!("config file {} does not exist", config_path.display());
            }
            None => ConfigFile::default(),
        };

        let registry_path = if let Some(path) = &cli.registry_path {
            path.clone()
        } else if let Some(path) = env_value(StoreConfig::PATH_ENV) {
            PathBuf::from(path)
        } else if let Some(path) = file.registry.path.clone() {
            path
        } else {
            StoreConfig::default_path()
        };

        let mut engine = file.engine;
        if let Some(backend) = cli.backend.clone().or_else(|| env_value(BACKEND_ENV)) {
            engine.backend = Some(backend);
        }
        if let Some(runtime) = env_value(RUNTIME_ENV) {
            engine.runtime = runtime
                .parse::<RuntimeKind>()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("invalid {RUNTIME_ENV}"))?;
        }
        if let Some(flag) = env_value(FALLBACK_ENV) {
            engine.streaming_fallback = parse_flag(&flag)
                .with_context(|| format!("invalid {FALLBACK_ENV}: {flag:?}"))?;
        }
        if let Some(n) = env_value(MAX_CONCURRENCY_ENV) {
            engine.max_concurrency = n
                .parse()
                .with_context(|| format!("invalid {MAX_CONCURRENCY_ENV}: {n:?}"))?;
        }

        let mut catalog = StaticCatalog::builtin().context("built-in subagent catalog is invalid")?;
        catalog.extend(file.subagents);

        Ok(Self {
            config_path,
            registry_path,
            engine,
            catalog,
        })
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use delegate_core::catalog::SubagentCatalog;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    fn clear_env() {
        for name in [
            StoreConfig::PATH_ENV,
            BACKEND_ENV,
            RUNTIME_ENV,
            FALLBACK_ENV,
            MAX_CONCURRENCY_ENV,
        ] {
            unsafe { std::env::remove_var(name) };
        }
    }

    fn write(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let mut original = ConfigFile::default();
        original.engine.max_concurrency = 7;
        original.registry.path = Some(PathBuf::from("/tmp/tasks.json"));
        save_config(&path, &original).unwrap();

        let loaded = load_config(&path).unwrap().expect("file exists");
        assert_eq!(loaded.engine, original.engine);
        assert_eq!(loaded.registry.path, original.registry.path);
    }

    #[test]
    fn missing_file_loads_as_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(load_config(&tmp.path().join("absent.toml")).unwrap().is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write(tmp.path(), "[engine]\nmax_concurency = 3\n");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse"), "{err:#}");
    }

    #[test]
    fn file_values_apply_when_nothing_overrides() {
        let _lock = lock_env();
        clear_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            r#"
[registry]
path = "/var/tmp/delegate.json"

[engine]
backend = "subprocess"
max_concurrency = 2

[[subagents]]
name = "translator"
description = "Translates comments."
system_prompt = "Translate."
"#,
        );

        let config = DelegateConfig::resolve(&CliOverrides {
            config: Some(path),
            ..CliOverrides::default()
        })
        .unwrap();
        assert_eq!(config.registry_path, PathBuf::from("/var/tmp/delegate.json"));
        assert_eq!(config.engine.backend.as_deref(), Some("subprocess"));
        assert_eq!(config.engine.max_concurrency, 2);
        assert!(config.catalog.resolve("translator").is_some());
        assert!(config.catalog.resolve("finder").is_some());
    }

    #[test]
    fn env_overrides_file_and_cli_overrides_env() {
        let _lock = lock_env();
        clear_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            "[registry]\npath = \"/file.json\"\n[engine]\nbackend = \"subprocess\"\n",
        );

        unsafe { std::env::set_var(StoreConfig::PATH_ENV, "/env.json") };
        unsafe { std::env::set_var(BACKEND_ENV, "streaming") };
        unsafe { std::env::set_var(FALLBACK_ENV, "true") };

        let from_env = DelegateConfig::resolve(&CliOverrides {
            config: Some(path.clone()),
            ..CliOverrides::default()
        })
        .unwrap();
        assert_eq!(from_env.registry_path, PathBuf::from("/env.json"));
        assert_eq!(from_env.engine.backend.as_deref(), Some("streaming"));
        assert!(from_env.engine.streaming_fallback);

        let from_cli = DelegateConfig::resolve(&CliOverrides {
            config: Some(path),
            registry_path: Some(PathBuf::from("/cli.json")),
            backend: Some("simulate".to_string()),
        })
        .unwrap();
        assert_eq!(from_cli.registry_path, PathBuf::from("/cli.json"));
        assert_eq!(from_cli.engine.backend.as_deref(), Some("simulate"));

        clear_env();
    }

    #[test]
    fn invalid_env_values_are_errors() {
        let _lock = lock_env();
        clear_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write(tmp.path(), "");

        unsafe { std::env::set_var(FALLBACK_ENV, "sometimes") };
        let result = DelegateConfig::resolve(&CliOverrides {
            config: Some(path),
            ..CliOverrides::default()
        });
        clear_env();

        let msg = format!("{:#}", result.unwrap_err());
        assert!(msg.contains(FALLBACK_ENV), "unexpected error: {msg}");
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let _lock = lock_env();
        clear_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let result = DelegateConfig::resolve(&CliOverrides {
            config: Some(tmp.path().join("nope.toml")),
            ..CliOverrides::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("delegate/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
