//! Relay Engine
//!
//! Owns the local endpoint, the accept loop, and the stop signal shared by
//! every session. Sessions are spawned per accepted connection with no upper
//! bound; that is fine for a test fixture but means a flood of local clients
//! can exhaust file descriptors.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use anyhow::{anyhow, Context};
use tokio::net::lookup_host;

use super::listener::{generate_sock_file, LocalListener};
use super::session::Session;
use super::state::{RelayState, StateCell};
use crate::config::{Config, DEFAULT_BUFFER_SIZE};
use crate::logging::{RelayLogger, TracingLogger};
use crate::shutdown::StopSignal;
use crate::Result;

/// Forwards every connection on a local unix socket to one remote TCP
/// address. Clones share the same relay.
#[derive(Clone)]
pub struct Relay {
    local_endpoint: PathBuf,
    remote_addr: String,
    buffer_size: usize,
    stop: StopSignal,
    state: Arc<StateCell>,
    started: Arc<AtomicBool>,
    next_session_id: Arc<AtomicU64>,
    logger: Arc<dyn RelayLogger>,
}

impl Relay {
    /// Create a relay for `remote_addr` with its socket in the system temp
    /// directory. The address is only resolved by [`start`](Self::start).
    pub fn new(remote_addr: impl Into<String>) -> Self {
        Self::with_socket_dir(remote_addr, &std::env::temp_dir())
    }

    /// Create a relay whose socket file lives in `dir`
    pub fn with_socket_dir(remote_addr: impl Into<String>, dir: &Path) -> Self {
        Self {
            local_endpoint: generate_sock_file(dir),
            remote_addr: remote_addr.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            stop: StopSignal::new(),
            state: Arc::new(StateCell::new()),
            started: Arc::new(AtomicBool::new(false)),
            next_session_id: Arc::new(AtomicU64::new(1)),
            logger: Arc::new(TracingLogger),
        }
    }

    /// Create a relay from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::with_socket_dir(config.relay.remote_addr.clone(), &config.relay.socket_dir())
            .with_buffer_size(config.relay.buffer_size)
    }

    /// Replace the logger
    pub fn with_logger<L>(mut self, logger: L) -> Self
    where
        L: RelayLogger + 'static,
    {
        self.logger = Arc::new(logger);
        self
    }

    /// Copy buffer size per direction
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Socket path clients connect to. Valid before the relay is started,
    /// but connecting only works once the state is `Listening`.
    pub fn local_endpoint(&self) -> &Path {
        &self.local_endpoint
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn state(&self) -> RelayState {
        self.state.get()
    }

    /// Wait until the relay reaches a state matching `pred`
    pub async fn wait_for_state<F>(&self, pred: F) -> RelayState
    where
        F: FnMut(RelayState) -> bool,
    {
        self.state.wait_for(pred).await
    }

    /// Begin listening in the background. Must be called from within a
    /// tokio runtime. Only the first call has any effect.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            self.logger.error("Start ignored", &"relay already started");
            return;
        }

        let relay = self.clone();
        tokio::spawn(async move {
            relay.run().await;
        });
    }

    /// Stop accepting and tear down every open session. Safe to call any
    /// number of times.
    pub fn stop(&self) {
        if !self.stop.trigger() {
            return;
        }

        self.logger.info("Intercepting and stopping connection");
        self.state.update(|state| match state {
            RelayState::Created => RelayState::Stopped,
            RelayState::Listening => RelayState::ShuttingDown,
            other => other,
        });
    }

    async fn run(self) {
        if self.stop.is_triggered() {
            self.logger.info("Relay stopped before listening");
            return;
        }

        let remote = match resolve_remote(&self.remote_addr).await {
            Ok(addr) => addr,
            Err(e) => {
                self.logger.error("Resolve remote address error", &format!("{:#}", e));
                self.state.transition(RelayState::Created, RelayState::Failed);
                return;
            }
        };

        self.logger.info("Waiting for new connection");

        let listener = match LocalListener::bind(&self.local_endpoint) {
            Ok(listener) => listener,
            Err(e) => {
                self.logger.error("Listen unix socket error", &format!("{:#}", e));
                self.state.transition(RelayState::Created, RelayState::Failed);
                return;
            }
        };

        if !self.state.transition(RelayState::Created, RelayState::Listening) {
            // Stopped while setting up; dropping the listener unlinks the socket
            self.logger.info("Relay stopped before listening");
            return;
        }

        self.accept_loop(&listener, remote).await;
        self.close_listener(listener);
    }

    /// Tear down after the accept loop exits, whether from Stop or an
    /// accept error. Open sessions are left to finish on their own.
    fn close_listener(&self, listener: LocalListener) {
        self.state.transition(RelayState::Listening, RelayState::ShuttingDown);
        drop(listener);
        self.state.transition(RelayState::ShuttingDown, RelayState::Stopped);
        self.logger.info("Proxy shutting down");
    }

    async fn accept_loop(&self, listener: &LocalListener, remote: SocketAddr) {
        loop {
            tokio::select! {
                biased;

                _ = self.stop.stopped() => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                        self.logger.info(&format!("New connection: session {} from {:?}", session_id, peer));

                        let session = Session::new(
                            session_id,
                            remote,
                            self.local_endpoint.clone(),
                            self.buffer_size,
                            self.stop.clone(),
                            Arc::clone(&self.logger),
                        );
                        tokio::spawn(session.run(stream));
                    }
                    Err(e) => {
                        self.logger.error("Accept unix connection error", &e);
                        break;
                    }
                },
            }
        }
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("local_endpoint", &self.local_endpoint)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}

/// Resolve `host:port` to the first address it yields
async fn resolve_remote(remote_addr: &str) -> Result<SocketAddr> {
    let mut addrs = lookup_host(remote_addr)
        .await
        .with_context(|| format!("Failed to resolve remote address {:?}", remote_addr))?;

    addrs
        .next()
        .ok_or_else(|| anyhow!("Remote address {:?} resolved to nothing", remote_addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{CapturingLogger, LogLevel};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_resolve_remote() {
        let addr = resolve_remote("127.0.0.1:8080").await.unwrap();
        assert_eq!(addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());

        assert!(resolve_remote("").await.is_err());
        assert!(resolve_remote("no-port").await.is_err());
    }

    #[tokio::test]
    async fn test_endpoint_available_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let relay = Relay::with_socket_dir("127.0.0.1:1", dir.path());

        assert!(relay.local_endpoint().starts_with(dir.path()));
        assert!(!relay.local_endpoint().exists());
        assert_eq!(relay.state(), RelayState::Created);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let logger = CapturingLogger::new();
        let relay = Relay::new("127.0.0.1:1").with_logger(logger.clone());

        relay.stop();
        relay.stop();
        assert_eq!(relay.state(), RelayState::Stopped);
        assert_eq!(logger.count("Intercepting and stopping connection"), 1);

        relay.start();
        let state = timeout(Duration::from_secs(1), relay.wait_for_state(RelayState::is_terminal))
            .await
            .unwrap();
        assert_eq!(state, RelayState::Stopped);
    }

    #[tokio::test]
    async fn test_listener_teardown_without_stop() {
        let dir = tempfile::tempdir().unwrap();
        let logger = CapturingLogger::new();
        let relay = Relay::with_socket_dir("127.0.0.1:1", dir.path()).with_logger(logger.clone());

        // Accept loop broke out on an error: listening, no stop requested
        let listener = LocalListener::bind(relay.local_endpoint()).unwrap();
        assert!(relay.state.transition(RelayState::Created, RelayState::Listening));

        relay.close_listener(listener);

        assert_eq!(relay.state(), RelayState::Stopped);
        assert!(!relay.local_endpoint().exists());
        assert!(logger.contains(LogLevel::Info, "Proxy shutting down"));
        // Sessions are not told to stop
        assert!(!relay.stop.is_triggered());
    }

    #[tokio::test]
    async fn test_second_start_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let logger = CapturingLogger::new();
        let relay = Relay::with_socket_dir("127.0.0.1:1", dir.path()).with_logger(logger.clone());

        relay.start();
        relay.start();

        timeout(Duration::from_secs(1), relay.wait_for_state(|s| s == RelayState::Listening))
            .await
            .unwrap();
        assert!(logger.contains(LogLevel::Error, "already started"));

        relay.stop();
        timeout(Duration::from_secs(1), relay.wait_for_state(RelayState::is_terminal))
            .await
            .unwrap();
    }
}
