//! Relay Session

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::mpsc;
use tracing::debug;

use super::pipe::{pipe, CopyEnd, CopyOutcome, Direction};
use crate::logging::RelayLogger;
use crate::shutdown::StopSignal;

/// Byte counters for one session, shared with its copy tasks
#[derive(Debug)]
pub struct SessionStats {
    pub session_id: u64,
    pub local_endpoint: PathBuf,
    pub remote_addr: SocketAddr,
    pub start_time: Instant,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

impl SessionStats {
    pub fn new(session_id: u64, local_endpoint: PathBuf, remote_addr: SocketAddr) -> Self {
        Self {
            session_id,
            local_endpoint,
            remote_addr,
            start_time: Instant::now(),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        }
    }

    /// Bytes copied local -> remote
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Bytes copied remote -> local
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_up() + self.bytes_down()
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn add_bytes(&self, direction: Direction, bytes: u64) {
        let counter = match direction {
            Direction::Upstream => &self.bytes_up,
            Direction::Downstream => &self.bytes_down,
        };
        counter.fetch_add(bytes, Ordering::Relaxed);
    }

    /// One-line summary used in the completion log
    pub fn summary(&self) -> String {
        format!(
            "session {} ({} -> {}) | Up: {} bytes | Down: {} bytes | Duration: {:?}",
            self.session_id,
            self.local_endpoint.display(),
            self.remote_addr,
            self.bytes_up(),
            self.bytes_down(),
            self.duration()
        )
    }
}

/// Why a session tore itself down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// One of the copy tasks finished
    Completed,
    /// The relay was stopped
    Stopped,
}

/// One accepted local connection and the remote connection dialed for it
pub(crate) struct Session {
    session_id: u64,
    remote_addr: SocketAddr,
    local_endpoint: PathBuf,
    buffer_size: usize,
    stop: StopSignal,
    logger: Arc<dyn RelayLogger>,
}

impl Session {
    pub(crate) fn new(
        session_id: u64,
        remote_addr: SocketAddr,
        local_endpoint: PathBuf,
        buffer_size: usize,
        stop: StopSignal,
        logger: Arc<dyn RelayLogger>,
    ) -> Self {
        Self {
            session_id,
            remote_addr,
            local_endpoint,
            buffer_size,
            stop,
            logger,
        }
    }

    /// Dial the remote and relay until either side finishes or the relay
    /// stops. A failed or interrupted dial just closes the local side.
    pub(crate) async fn run(self, local: UnixStream) {
        let dialed = tokio::select! {
            dialed = TcpStream::connect(self.remote_addr) => dialed,
            _ = self.stop.stopped() => {
                self.logger.info(&format!("Stopping connection (session {}, while dialing)", self.session_id));
                return;
            }
        };

        let remote = match dialed {
            Ok(stream) => stream,
            Err(e) => {
                self.logger.error(
                    &format!("Remote connection failed for session {}", self.session_id),
                    &e,
                );
                return;
            }
        };

        self.logger.info(&format!(
            "Opened:: Remote: {} Local: {}",
            self.remote_addr,
            self.local_endpoint.display()
        ));

        let stats = Arc::new(SessionStats::new(
            self.session_id,
            self.local_endpoint.clone(),
            self.remote_addr,
        ));

        let (local_rd, local_wr) = local.into_split();
        let (remote_rd, remote_wr) = remote.into_split();
        let (done_tx, mut done_rx) = mpsc::channel(2);

        let upstream = tokio::spawn(pipe(
            Direction::Upstream,
            local_rd,
            remote_wr,
            self.buffer_size,
            Arc::clone(&stats),
            done_tx.clone(),
        ));
        let downstream = tokio::spawn(pipe(
            Direction::Downstream,
            remote_rd,
            local_wr,
            self.buffer_size,
            Arc::clone(&stats),
            done_tx,
        ));

        let reason = tokio::select! {
            outcome = done_rx.recv() => {
                self.logger.info(&format!("Closing connection (session {})", self.session_id));
                if let Some(outcome) = outcome {
                    self.log_outcome(&outcome);
                }
                CloseReason::Completed
            }
            _ = self.stop.stopped() => {
                self.logger.info(&format!("Stopping connection (session {})", self.session_id));
                CloseReason::Stopped
            }
        };

        // Aborting drops the socket halves, which closes both connections
        // and cancels any read still in flight
        upstream.abort();
        downstream.abort();
        let _ = upstream.await;
        let _ = downstream.await;

        while let Ok(outcome) = done_rx.try_recv() {
            self.log_outcome(&outcome);
        }

        let closed_by = match reason {
            CloseReason::Completed => "peer",
            CloseReason::Stopped => "stop",
        };
        self.logger.info(&format!("Connection complete: {} | Closed by: {}", stats.summary(), closed_by));
    }

    fn log_outcome(&self, outcome: &CopyOutcome) {
        match &outcome.end {
            CopyEnd::Eof => debug!(
                session_id = self.session_id,
                direction = %outcome.direction,
                bytes = outcome.bytes,
                "Copy reached end of stream"
            ),
            CopyEnd::Failed(e) => debug!(
                session_id = self.session_id,
                direction = %outcome.direction,
                bytes = outcome.bytes,
                error = %e,
                "Copy ended with I/O error"
            ),
        }
    }
}
