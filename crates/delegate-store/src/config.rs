use std::env;
use std::path::PathBuf;

/// Where the registry snapshot lives.
///
/// Reads from the `DELEGATE_REGISTRY_PATH` environment variable, falling back
/// to `$XDG_STATE_HOME/delegate/tasks.json` (or
/// `~/.local/state/delegate/tasks.json`) when unset.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Absolute path of the snapshot file.
    pub path: PathBuf,
}

impl StoreConfig {
    /// Environment variable that overrides the snapshot location.
    pub const PATH_ENV: &str = "DELEGATE_REGISTRY_PATH";

    /// File name used inside the state directory.
    pub const FILE_NAME: &str = "tasks.json";

    /// Build a config from the environment.
    ///
    /// Priority: `DELEGATE_REGISTRY_PATH`, then the XDG state default.
    pub fn from_env() -> Self {
        let path = env::var(Self::PATH_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_path);
        Self { path }
    }

    /// Build a config from an explicit path (useful for tests and CLI flags).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The default snapshot location.
    pub fn default_path() -> PathBuf {
        let state_dir = env::var("XDG_STATE_HOME")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("state")))
            .unwrap_or_else(|| PathBuf::from("."));
        state_dir.join("delegate").join(Self::FILE_NAME)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
