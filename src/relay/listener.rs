//! Local unix socket endpoint

use anyhow::Context;
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::net::unix::SocketAddr;
use tokio::net::{UnixListener, UnixStream};

use crate::Result;

/// Suffix of every generated socket file name
pub const SOCKET_SUFFIX: &str = "-conn-proxy.sock";

/// Build a fresh `<random>-conn-proxy.sock` path under `dir`
pub fn generate_sock_file(dir: &Path) -> PathBuf {
    let prefix: i64 = rand::thread_rng().gen_range(0..=i64::MAX);
    dir.join(format!("{}{}", prefix, SOCKET_SUFFIX))
}

/// Unix listener that removes its socket file when dropped
#[derive(Debug)]
pub(crate) struct LocalListener {
    listener: UnixListener,
    path: PathBuf,
}

impl LocalListener {
    pub(crate) fn bind(path: &Path) -> Result<Self> {
        let listener = UnixListener::bind(path)
            .with_context(|| format!("Failed to bind unix socket {}", path.display()))?;

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub(crate) async fn accept(&self) -> std::io::Result<(UnixStream, SocketAddr)> {
        self.listener.accept().await
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_paths_are_unique_and_named() {
        let dir = std::env::temp_dir();
        let a = generate_sock_file(&dir);
        let b = generate_sock_file(&dir);

        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(dir.as_path()));

        let name = a.file_name().unwrap().to_str().unwrap();
        let prefix = name.strip_suffix(SOCKET_SUFFIX).unwrap();
        assert!(prefix.parse::<i64>().unwrap() >= 0);
    }

    #[tokio::test]
    async fn test_socket_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = generate_sock_file(dir.path());

        let listener = LocalListener::bind(&path).unwrap();
        assert!(path.exists());

        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_bind_fails_on_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = generate_sock_file(&dir.path().join("missing"));
        assert!(LocalListener::bind(&path).is_err());
    }
}
