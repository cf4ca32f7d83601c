//! Shared fixtures for relay integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;
use conn_proxy::logging::CapturingLogger;
use conn_proxy::{Relay, RelayState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

/// TCP server that echoes every connection until the peer closes
pub async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

/// TCP server that hands every accepted stream to the test
pub async fn spawn_capture_server() -> (SocketAddr, mpsc::UnboundedReceiver<TcpStream>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if tx.send(stream).is_err() {
                break;
            }
        }
    });

    (addr, rx)
}

/// An address nothing is listening on
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Start a relay in `dir` and wait until it is listening
pub async fn start_relay(remote: SocketAddr, dir: &std::path::Path) -> (Relay, CapturingLogger) {
    let logger = CapturingLogger::new();
    let relay = Relay::with_socket_dir(remote.to_string(), dir).with_logger(logger.clone());
    relay.start();

    let state = timeout(WAIT, relay.wait_for_state(|s| s != RelayState::Created))
        .await
        .expect("relay never left Created");
    assert_eq!(state, RelayState::Listening, "logs: {:?}", logger.entries());

    (relay, logger)
}

/// Poll the captured log until `needle` shows up `count` times
pub async fn wait_for_log(logger: &CapturingLogger, needle: &str, count: usize) {
    let deadline = Instant::now() + WAIT;
    while logger.count(needle) < count {
        if Instant::now() > deadline {
            panic!("timed out waiting for {:?}; logs: {:?}", needle, logger.entries());
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Read until EOF or error, returning how many bytes arrived first
pub async fn read_until_closed<S: tokio::io::AsyncRead + Unpin>(stream: &mut S) -> usize {
    let mut total = 0;
    let mut buf = [0u8; 1024];
    loop {
        match timeout(WAIT, stream.read(&mut buf)).await.expect("peer was never closed") {
            Ok(0) | Err(_) => return total,
            Ok(n) => total += n,
        }
    }
}

/// TCP listener whose accept backlog is full, so a new connect hangs in
/// the handshake. Returns the address and the connections holding the
/// backlog, which must stay alive for the stall to last.
pub async fn spawn_stalled_server() -> (SocketAddr, tokio::net::TcpListener, Vec<TcpStream>) {
    let socket = tokio::net::TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let addr = listener.local_addr().unwrap();

    let mut fillers = Vec::new();
    for _ in 0..16 {
        match timeout(Duration::from_millis(200), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => fillers.push(stream),
            Ok(Err(e)) => panic!("filler connect failed: {}", e),
            Err(_) => return (addr, listener, fillers),
        }
    }

    panic!("backlog never filled after {} connections", fillers.len());
}
