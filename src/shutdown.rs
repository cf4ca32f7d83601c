//! Stop Signal Handling
//!
//! This module provides the relay-wide stop primitive and the OS signal
//! listener used by the binary. Stopping is idempotent: the first trigger
//! wins and every later trigger is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::Result;

/// Idempotent stop signal shared by the accept loop and every session
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

struct StopInner {
    /// Set once, never cleared
    triggered: AtomicBool,
    /// Wakes tasks currently waiting in `stopped()`
    stop_tx: broadcast::Sender<()>,
}

impl StopSignal {
    /// Create a new, untriggered stop signal
    pub fn new() -> Self {
        let (stop_tx, _) = broadcast::channel(1);

        Self {
            inner: Arc::new(StopInner {
                triggered: AtomicBool::new(false),
                stop_tx,
            }),
        }
    }

    /// Trigger the signal. Returns `true` only for the call that actually
    /// flipped it.
    pub fn trigger(&self) -> bool {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            debug!("Stop signal already triggered, ignoring");
            return false;
        }

        // No receivers just means nobody is waiting right now
        let _ = self.inner.stop_tx.send(());
        true
    }

    /// Non-blocking check
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once the signal has been triggered, including when that
    /// happened before this call.
    pub async fn stopped(&self) {
        // Subscribe before reading the flag so a trigger in between is not lost
        let mut stop_rx = self.inner.stop_tx.subscribe();
        if self.is_triggered() {
            return;
        }
        let _ = stop_rx.recv().await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

/// Wait for SIGTERM, SIGINT or Ctrl+C
pub async fn wait_for_os_signal() -> Result<()> {
    info!("Starting shutdown signal listener");

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, stopping relay");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, stopping relay");
            }
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping relay");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, stopping relay");
    }

    Ok(())
}
