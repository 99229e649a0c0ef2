//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use netrelay::config::Config;
use netrelay::net::{Acceptor, Connection, PeerAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Writer that keeps everything written to it for later inspection.
#[derive(Clone, Default)]
pub struct CaptureWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CaptureWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().unwrap().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl AsyncWrite for CaptureWriter {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Acceptor fed by in-memory duplex connections.
pub struct MockAcceptor {
    rx: mpsc::UnboundedReceiver<Connection>,
}

/// Handle used by a test to open connections against a [`MockAcceptor`].
#[derive(Clone)]
pub struct MockPeers {
    tx: mpsc::UnboundedSender<Connection>,
}

pub fn mock_acceptor() -> (MockAcceptor, MockPeers) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MockAcceptor { rx }, MockPeers { tx })
}

impl MockPeers {
    /// Queue a connection that appears to come from `peer`; returns the client end.
    pub fn connect(&self, peer: &str) -> DuplexStream {
        let (client, server) = tokio::io::duplex(4096);
        let addr: SocketAddr = peer.parse().unwrap();
        self.tx
            .send(Connection::new(server, PeerAddr::Inet(addr)))
            .unwrap();
        client
    }
}

#[async_trait]
impl Acceptor for MockAcceptor {
    async fn accept(&mut self) -> io::Result<Connection> {
        match self.rx.recv().await {
            Some(conn) => Ok(conn),
            // no more peers will arrive; behave like an idle listener
            None => std::future::pending().await,
        }
    }
}

/// Config with the given mutation applied on top of defaults.
pub fn config_with(f: impl FnOnce(&mut Config)) -> Arc<Config> {
    let mut config = Config::default();
    f(&mut config);
    Arc::new(config)
}

/// A loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Read until EOF with a deadline.
pub async fn read_all(stream: &mut (impl AsyncRead + Unpin)) -> Vec<u8> {
    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
        .await
        .expect("read timed out")
        .unwrap();
    buf
}

/// Read exactly `len` bytes with a deadline.
pub async fn read_exact(stream: &mut (impl AsyncRead + Unpin), len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .unwrap();
    buf
}

/// Poll `cond` until it holds or five seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
