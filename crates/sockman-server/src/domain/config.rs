//! Chat server configuration.
//!
//! ```toml
//! advertised_host = "chat.example.com"
//! max_payload = 65536
//!
//! [reactor]
//! host = "0.0.0.0"
//! port = 10000
//! max_connections = 100
//! ```
//!
//! Missing keys fall back to their defaults; a missing file means all
//! defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sockman_core::{ConfigError, ReactorConfig};
use sockman_websocket::DEFAULT_MAX_PAYLOAD;

/// All runtime settings of the chat server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Listen address, connection ceiling and tick timing.
    #[serde(default)]
    pub reactor: ReactorConfig,

    /// Host named in `WebSocket-Origin` / `WebSocket-Location`.  Defaults to
    /// the listen host.
    #[serde(default)]
    pub advertised_host: Option<String>,

    /// Largest accepted message, in bytes.
    #[serde(default = "default_max_payload")]
    pub max_payload: u64,
}

fn default_max_payload() -> u64 {
    DEFAULT_MAX_PAYLOAD
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            reactor: ReactorConfig::default(),
            advertised_host: None,
            max_payload: default_max_payload(),
        }
    }
}

impl ServerConfig {
    pub fn advertised_host(&self) -> &str {
        self.advertised_host.as_deref().unwrap_or(&self.reactor.host)
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
