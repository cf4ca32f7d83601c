//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{Context, bail};
use std::path::{Path, PathBuf};

/// Environment variable names read by [`ConfigManager::load_from_env`]
pub const ENV_REMOTE_ADDR: &str = "CONN_PROXY_REMOTE_ADDR";
pub const ENV_SOCKET_DIR: &str = "CONN_PROXY_SOCKET_DIR";
pub const ENV_BUFFER_SIZE: &str = "CONN_PROXY_BUFFER_SIZE";
pub const ENV_SHUTDOWN_GRACE: &str = "CONN_PROXY_SHUTDOWN_GRACE";
pub const ENV_LOG_LEVEL: &str = "CONN_PROXY_LOG_LEVEL";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            tracing::info!("Configuration loaded successfully");
            Ok(config)
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            Ok(Config::default())
        }
    }

    /// Load configuration from environment variables on top of defaults
    pub fn load_from_env() -> Result<Config> {
        Self::load_from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`load_from_env`](Self::load_from_env) with an explicit lookup
    pub fn load_from_vars<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(remote) = lookup(ENV_REMOTE_ADDR) {
            config.relay.remote_addr = remote;
        }

        if let Some(dir) = lookup(ENV_SOCKET_DIR) {
            config.relay.socket_dir = Some(PathBuf::from(dir));
        }

        if let Some(buffer_size) = lookup(ENV_BUFFER_SIZE) {
            config.relay.buffer_size = buffer_size.parse::<usize>()
                .with_context(|| format!("Invalid {}: {}", ENV_BUFFER_SIZE, buffer_size))?;
        }

        if let Some(grace) = lookup(ENV_SHUTDOWN_GRACE) {
            config.relay.shutdown_grace = humantime::parse_duration(&grace)
                .with_context(|| format!("Invalid {}: {}", ENV_SHUTDOWN_GRACE, grace))?;
        }

        if let Some(log_level) = lookup(ENV_LOG_LEVEL) {
            config.logging.level = log_level;
        }

        Ok(config)
    }
}

impl Config {
    /// Validate the configuration. The relay itself only resolves the
    /// remote address at start; this is the up-front check for the binary.
    pub fn validate(&self) -> Result<()> {
        self.validate_relay_config()
            .with_context(|| "Relay configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    fn validate_relay_config(&self) -> Result<()> {
        let remote = self.relay.remote_addr.trim();
        if remote.is_empty() {
            bail!("remote_addr must be set");
        }

        match remote.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                if port.parse::<u16>().map_or(true, |p| p == 0) {
                    bail!("remote_addr has invalid port: {}", remote);
                }
            }
            _ => bail!("remote_addr must be host:port, got {}", remote),
        }

        if self.relay.buffer_size < 1024 {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if self.relay.buffer_size > 1048576 {
            bail!("buffer_size cannot exceed 1MB");
        }

        if let Some(dir) = &self.relay.socket_dir {
            if !dir.is_dir() {
                bail!("socket_dir does not exist: {}", dir.display());
            }
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!("logging.level must be one of: {}", VALID_LOG_LEVELS.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        remote: Option<&str>,
        socket_dir: Option<&Path>,
        buffer_size: Option<usize>,
        log_level: Option<&str>,
    ) {
        if let Some(remote) = remote {
            self.relay.remote_addr = remote.to_string();
            tracing::info!("CLI override: remote address set to {}", remote);
        }

        if let Some(dir) = socket_dir {
            self.relay.socket_dir = Some(dir.to_path_buf());
            tracing::info!("CLI override: socket dir set to {}", dir.display());
        }

        if let Some(buffer_size) = buffer_size {
            self.relay.buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }

        if let Some(level) = log_level {
            self.logging.level = level.to_string();
        }
    }
}
