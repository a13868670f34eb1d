//! Daemon configuration loading.
//!
//! A JSON file supplies defaults; command-line flags override individual
//! fields. Every field is optional in the file.

use scribe_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Everything the daemon needs to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// ASR gateway WebSocket URL
    #[serde(default = "default_asr_url")]
    pub asr_url: String,

    /// Address editors connect to
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Base URL of the notes REST service
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Initial ASR reconnect delay in milliseconds
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    /// Upper bound on the ASR reconnect delay in milliseconds
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Per-request timeout for the notes service in milliseconds
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,

    /// Reconciliation policy
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_asr_url() -> String {
    "ws://127.0.0.1:8765/ws".to_string()
}

fn default_listen() -> String {
    "127.0.0.1:8766".to_string()
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_reconnect_initial_ms() -> u64 {
    3000
}

fn default_reconnect_max_ms() -> u64 {
    60_000
}

fn default_backend_timeout_ms() -> u64 {
    10_000
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            asr_url: default_asr_url(),
            listen: default_listen(),
            backend_url: default_backend_url(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            backend_timeout_ms: default_backend_timeout_ms(),
            engine: EngineConfig::default(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub asr_url: Option<String>,
    pub listen: Option<String>,
    pub backend_url: Option<String>,
}

impl DaemonConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            tracing::info!("No config file given, using defaults");
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn apply(mut self, overrides: Overrides) -> Self {
        if let Some(url) = overrides.asr_url {
            self.asr_url = url;
        }
        if let Some(listen) = overrides.listen {
            self.listen = listen;
        }
        if let Some(url) = overrides.backend_url {
            self.backend_url = url;
        }
        self
    }

    pub fn backend_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn reconnect(&self) -> crate::asr::ReconnectConfig {
        crate::asr::ReconnectConfig {
            initial_delay: std::time::Duration::from_millis(self.reconnect_initial_ms),
            max_delay: std::time::Duration::from_millis(self.reconnect_max_ms),
            ..Default::default()
        }
    }
}
