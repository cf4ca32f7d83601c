//! conn-proxy - Connection Interception Proxy
//!
//! Listens on a generated unix socket and relays every connection to a
//! fixed remote TCP address until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::{
    layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

use conn_proxy::{config::ConfigManager, shutdown, Relay, RelayState};

/// CLI arguments for conn-proxy
#[derive(Parser, Debug)]
#[command(name = "conn-proxy")]
#[command(about = "Relay a local unix socket to a remote TCP endpoint")]
#[command(version)]
#[command(long_about = "
conn-proxy - Connection Interception Proxy

Listens on <random>-conn-proxy.sock in the socket directory and forwards
every accepted connection to the remote address.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  CONN_PROXY_REMOTE_ADDR     - Remote address (e.g., 127.0.0.1:6379)
  CONN_PROXY_SOCKET_DIR      - Directory for the socket file
  CONN_PROXY_BUFFER_SIZE     - Copy buffer size in bytes
  CONN_PROXY_SHUTDOWN_GRACE  - Wait for the relay to stop (e.g., 1s)
  CONN_PROXY_LOG_LEVEL       - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Remote host:port to forward to (overrides config file)
    #[arg(short, long, help = "Remote address (e.g., 127.0.0.1:6379)")]
    pub remote: Option<String>,

    /// Configuration file path
    #[arg(short, long, default_value = "conn-proxy.toml", help = "Path to configuration file")]
    pub config: PathBuf,

    /// Socket directory (overrides config file)
    #[arg(short, long, help = "Directory for the unix socket file")]
    pub socket_dir: Option<PathBuf>,

    /// Buffer size in bytes
    #[arg(long, help = "Copy buffer size in bytes")]
    pub buffer_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Initialize tracing before anything logs; the config file may lower
    // or raise the level afterwards
    let filter_handle = init_tracing(args.log_level.as_deref().unwrap_or("info"), args.verbose)?;

    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(
        args.remote.as_deref(),
        args.socket_dir.as_deref(),
        args.buffer_size,
        args.log_level.as_deref(),
    );

    apply_log_level(&filter_handle, &config.logging.level, args.verbose)?;

    info!("Starting conn-proxy v{}", env!("CARGO_PKG_VERSION"));

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Remote address: {}", config.relay.remote_addr);
        info!("  Socket dir: {}", config.relay.socket_dir().display());
        info!("  Buffer size: {} bytes", config.relay.buffer_size);
        return Ok(());
    }

    let relay = Relay::from_config(&config);
    relay.start();

    let state = relay
        .wait_for_state(|s| s != RelayState::Created)
        .await;
    if state != RelayState::Listening {
        anyhow::bail!("Relay failed to start (state: {})", state);
    }

    // The socket path is the one thing a caller needs from stdout
    println!("{}", relay.local_endpoint().display());
    info!(
        "Relaying {} -> {}",
        relay.local_endpoint().display(),
        relay.remote_addr()
    );

    tokio::select! {
        result = shutdown::wait_for_os_signal() => {
            result.context("Error setting up signal handlers")?;
        }
        state = relay.wait_for_state(RelayState::is_terminal) => {
            warn!("Relay stopped on its own (state: {})", state);
        }
    }

    relay.stop();

    let grace = config.relay.shutdown_grace;
    if tokio::time::timeout(grace, relay.wait_for_state(RelayState::is_terminal))
        .await
        .is_err()
    {
        warn!("Relay did not report stopped within {:?}", grace);
    }

    info!("Shutdown complete");
    Ok(())
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Initialize tracing/logging. `RUST_LOG` wins over every other setting.
fn init_tracing(level: &str, verbose: bool) -> Result<FilterHandle> {
    let (subscriber, handle) = build_subscriber(level, verbose);
    subscriber.init();
    Ok(handle)
}

fn build_subscriber(
    level: &str,
    verbose: bool,
) -> (impl tracing::Subscriber + Send + Sync + 'static, FilterHandle) {
    let log_level = if verbose { "debug" } else { level };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));
    let (filter_layer, handle) = reload::Layer::new(env_filter);

    let subscriber = tracing_subscriber::registry()
        .with(filter_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_level(true),
        );

    (subscriber, handle)
}

/// Switch to the level from the merged configuration
fn apply_log_level(handle: &FilterHandle, level: &str, verbose: bool) -> Result<()> {
    if verbose || std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return Ok(());
    }

    handle
        .reload(EnvFilter::new(level))
        .context("Failed to apply configured log level")
}
