//! Configuration Types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default copy buffer size per direction
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub relay: RelaySettings,
    pub logging: LoggingConfig,
}

/// Relay configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Fixed `host:port` every session is forwarded to
    pub remote_addr: String,
    /// Directory for the local socket file, system temp dir when unset
    pub socket_dir: Option<PathBuf>,
    pub buffer_size: usize,
    /// How long the binary waits for the relay to report `Stopped`
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            remote_addr: String::new(),
            socket_dir: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl RelaySettings {
    /// Directory the local socket file is created in
    pub fn socket_dir(&self) -> PathBuf {
        self.socket_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
