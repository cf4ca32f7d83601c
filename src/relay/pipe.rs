//! Directional copy task

use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::session::SessionStats;

/// Which way a copy task moves bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local client to remote endpoint
    Upstream,
    /// Remote endpoint to local client
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => f.write_str("local->remote"),
            Direction::Downstream => f.write_str("remote->local"),
        }
    }
}

/// How a copy task ended
#[derive(Debug)]
pub enum CopyEnd {
    /// Source reached end-of-stream
    Eof,
    /// Read or write failed
    Failed(io::Error),
}

/// Sent to the owning session exactly once per copy task
#[derive(Debug)]
pub struct CopyOutcome {
    pub direction: Direction,
    pub bytes: u64,
    pub end: CopyEnd,
}

impl CopyOutcome {
    pub fn is_eof(&self) -> bool {
        matches!(self.end, CopyEnd::Eof)
    }
}

/// Copy `src` into `dst` until end-of-stream or an error, then report to
/// `done`. Errors end the copy like EOF does; they only show up in the
/// outcome.
pub async fn pipe<R, W>(
    direction: Direction,
    mut src: R,
    mut dst: W,
    buffer_size: usize,
    stats: Arc<SessionStats>,
    done: mpsc::Sender<CopyOutcome>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut bytes = 0u64;

    let end = loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => break CopyEnd::Eof,
            Ok(n) => n,
            Err(e) => break CopyEnd::Failed(e),
        };

        if let Err(e) = dst.write_all(&buf[..n]).await {
            break CopyEnd::Failed(e);
        }

        bytes += n as u64;
        stats.add_bytes(direction, n as u64);
    };

    if matches!(end, CopyEnd::Eof) {
        let _ = dst.flush().await;
    }

    // The session may already be gone
    let _ = done.send(CopyOutcome { direction, bytes, end }).await;
}
