use herd_core::{HerdError, HerdResult, LoggingConfig, RetryPolicy};
use herd_models::CommunicatorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::task_manager::DEFAULT_MAX_CONCURRENT;

/// Top-level runtime configuration, normally read from `herd.toml`.
///
/// Every section and field is optional; `HerdConfig::default()` is a working
/// configuration with no registry file and no tools directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HerdConfig {
    /// `[logging]`
    #[serde(default)]
    pub logging: LoggingConfig,
    /// `[router]`
    #[serde(default)]
    pub router: RouterConfig,
    /// `[tasks]`
    #[serde(default)]
    pub tasks: TasksConfig,
    /// `[registry]`
    #[serde(default)]
    pub registry: RegistryConfig,
    /// `[discovery]`
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// `[communicator]`
    #[serde(default)]
    pub communicator: CommunicatorConfig,
}

impl HerdConfig {
    /// Read and parse the TOML file at `path`.
    pub fn load(path: &Path) -> HerdResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HerdError::Config(format!("Failed to read config file '{}': {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    /// Parse TOML text. Missing sections take their defaults.
    pub fn parse(text: &str) -> HerdResult<Self> {
        toml::from_str(text).map_err(|e| HerdError::Config(format!("invalid config: {e}")))
    }
}

/// `[router]`: backoff between tool attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Delay before the first retry, doubled on each further retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound on the retry delay. Unbounded when unset.
    #[serde(default)]
    pub backoff_max_ms: Option<u64>,
    /// Preload the built-in belter/drummer capabilities into the smart router.
    #[serde(default)]
    pub standard_capabilities: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: None,
            standard_capabilities: false,
        }
    }
}

impl RouterConfig {
    /// Backoff policy for the tool router.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff_base_ms: self.backoff_base_ms,
            backoff_max_ms: self.backoff_max_ms,
            ..RetryPolicy::default()
        }
    }
}

/// `[tasks]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Task bodies allowed to run at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Finished tasks older than this are dropped by `Herd::cleanup_tasks`.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            retention_hours: default_retention_hours(),
        }
    }
}

/// `[registry]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Models file (`.yaml`, `.yml` or `.toml`). Built-in defaults are used
    /// when unset or missing.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// `[discovery]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Directory scanned for tool manifests.
    #[serde(default)]
    pub tools_dir: Option<PathBuf>,
    /// Directory names skipped while scanning.
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,
    /// Catalog modules loaded directly, without a manifest.
    #[serde(default)]
    pub modules: Vec<String>,
    /// Expose every registry model as a tool.
    #[serde(default = "default_true")]
    pub register_models: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            tools_dir: None,
            excluded_dirs: default_excluded_dirs(),
            modules: Vec::new(),
            register_models: true,
        }
    }
}

fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}
fn default_retention_hours() -> u64 {
    24
}
fn default_excluded_dirs() -> Vec<String> {
    vec!["tests".to_string(), "target".to_string()]
}
fn default_true() -> bool {
    true
}
