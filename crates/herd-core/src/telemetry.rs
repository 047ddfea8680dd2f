use crate::error::{HerdError, HerdResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

fn default_filter() -> String {
    "info".to_string()
}

/// Logging settings, read from the `[logging]` section of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Fallback filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit newline-delimited JSON instead of human-readable lines.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over [`LoggingConfig::filter`]. Fails if a
/// global subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> HerdResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| HerdError::Config(format!("invalid log filter '{}': {e}", config.filter)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.with_target(false).try_init()
    };
    result.map_err(|e| HerdError::Config(format!("tracing already initialised: {e}")))
}
