//! Console client configuration.
//!
//! `reactor.host` / `reactor.port` name the server to connect to.
//!
//! ```toml
//! retry = 5
//! retry_interval_ms = 500
//!
//! [reactor]
//! host = "chat.example.com"
//! port = 10000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sockman_core::{ConfigError, ReactorConfig};
use sockman_websocket::DEFAULT_MAX_PAYLOAD;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub reactor: ReactorConfig,

    /// Connection attempts before giving up.
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Pause between connection attempts, in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    #[serde(default = "default_max_payload")]
    pub max_payload: u64,
}

fn default_retry() -> u32 {
    3
}
fn default_retry_interval_ms() -> u64 {
    1000
}
fn default_max_payload() -> u64 {
    DEFAULT_MAX_PAYLOAD
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reactor: ReactorConfig::default(),
            retry: default_retry(),
            retry_interval_ms: default_retry_interval_ms(),
            max_payload: default_max_payload(),
        }
    }
}

impl ClientConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is malformed.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads a config file, returning the defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] for unreadable files, [`ConfigError::Parse`] for
    /// malformed TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
