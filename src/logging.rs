//! Relay Logging
//!
//! The relay never writes to the console directly. It reports through a
//! [`RelayLogger`], which defaults to `tracing` and can be swapped for a
//! [`CapturingLogger`] when a test wants to assert on what happened.

use std::fmt::Display;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// Prefix carried by every relay log line
pub const LOG_PREFIX: &str = "[Connection Proxy]";

/// Sink for relay lifecycle messages
pub trait RelayLogger: Send + Sync {
    /// Informational lifecycle message
    fn info(&self, msg: &str);

    /// Failure with its cause
    fn error(&self, msg: &str, err: &dyn Display);
}

/// Default logger, forwards to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl RelayLogger for TracingLogger {
    fn info(&self, msg: &str) {
        info!(prefix = LOG_PREFIX, "{}", msg);
    }

    fn error(&self, msg: &str, err: &dyn Display) {
        error!(prefix = LOG_PREFIX, "{}: {}", msg, err);
    }
}

/// Severity of a captured entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

/// One captured log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// In-memory logger for tests. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct CapturingLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl CapturingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    /// True if any entry at `level` contains `needle`
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.lock()
            .iter()
            .any(|entry| entry.level == level && entry.message.contains(needle))
    }

    /// Number of entries containing `needle`, any level
    pub fn count(&self, needle: &str) -> usize {
        self.lock()
            .iter()
            .filter(|entry| entry.message.contains(needle))
            .count()
    }

    fn push(&self, level: LogLevel, message: String) {
        self.lock().push(LogEntry { level, message });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogEntry>> {
        // A panicking test thread must not hide the log from the others
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RelayLogger for CapturingLogger {
    fn info(&self, msg: &str) {
        self.push(LogLevel::Info, msg.to_string());
    }

    fn error(&self, msg: &str, err: &dyn Display) {
        self.push(LogLevel::Error, format!("{}: {}", msg, err));
    }
}
