//! Reactor configuration and its TOML loader.
//!
//! [`ReactorConfig`] carries the process-level controls the reactor needs:
//! where to listen (or connect), how long one tick may wait, the keepalive
//! interval, the connection ceiling and the raw receive size.
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 10000
//! max_connections = 100
//! alive_interval_secs = 60
//! ```
//!
//! Every field has a serde default, so a partial (or empty) file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Runtime settings of one reactor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReactorConfig {
    /// Host to listen on (server) or connect to (client).
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on (server) or connect to (client).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound of one raw `recv()` and of one socket read.
    #[serde(default = "default_receive_buffer_size")]
    pub receive_buffer_size: usize,
    /// Most bytes read ahead into one connection's inbound buffer.  Reading
    /// pauses at this mark and resumes once the units have consumed data.
    #[serde(default = "default_max_inbound_bytes")]
    pub max_inbound_bytes: usize,
    /// Concurrent client connections accepted before new ones are dropped.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Longest time one tick waits for readiness, in microseconds.
    #[serde(default = "default_cycle_interval_us")]
    pub cycle_interval_us: u64,
    /// Keepalive interval in seconds; `0` disables keepalive and timeouts.
    #[serde(default = "default_alive_interval_secs")]
    pub alive_interval_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    10000
}
fn default_receive_buffer_size() -> usize {
    1024
}
fn default_max_inbound_bytes() -> usize {
    64 * 1024
}
fn default_max_connections() -> usize {
    10
}
fn default_cycle_interval_us() -> u64 {
    10
}
fn default_alive_interval_secs() -> u64 {
    3600
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            receive_buffer_size: default_receive_buffer_size(),
            max_inbound_bytes: default_max_inbound_bytes(),
            max_connections: default_max_connections(),
            cycle_interval_us: default_cycle_interval_us(),
            alive_interval_secs: default_alive_interval_secs(),
        }
    }
}

impl ReactorConfig {
    /// The tick wait as a [`Duration`].
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_micros(self.cycle_interval_us)
    }

    /// Parses a config from TOML text.
    ///
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
    /// Returns [`ConfigError::Io`] for file-system errors other than "not
    /// found", and [`ConfigError::Parse`] if the TOML is malformed.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_listens_on_loopback_port_10000() {
        // Arrange / Act
        let cfg = ReactorConfig::default();

        // Assert
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 10000);
    }

    #[test]
    fn test_default_limits() {
        let cfg = ReactorConfig::default();
        assert_eq!(cfg.receive_buffer_size, 1024);
        assert_eq!(cfg.max_inbound_bytes, 65_536);
        assert_eq!(cfg.max_connections, 10);
    }

    #[test]
    fn test_default_intervals() {
        let cfg = ReactorConfig::default();
        assert_eq!(cfg.cycle_interval(), Duration::from_micros(10));
        assert_eq!(cfg.alive_interval_secs, 3600);
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let cfg = ReactorConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, ReactorConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides_only_given_fields() {
        // Arrange
        let text = "port = 9000\nmax_connections = 2\n";

        // Act
        let cfg = ReactorConfig::from_toml_str(text).unwrap();

        // Assert
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.max_connections, 2);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.alive_interval_secs, 3600);
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let result = ReactorConfig::from_toml_str("port = \"not a number\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let path = std::env::temp_dir().join("sockman-core-no-such-config.toml");
        let cfg = ReactorConfig::load(&path).unwrap();
        assert_eq!(cfg, ReactorConfig::default());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let mut cfg = ReactorConfig::default();
        cfg.host = "0.0.0.0".to_string();
        cfg.cycle_interval_us = 500;
        let text = toml::to_string_pretty(&cfg).expect("serialize");
        let restored = ReactorConfig::from_toml_str(&text).unwrap();
        assert_eq!(cfg, restored);
    }
}
