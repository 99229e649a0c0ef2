//! Established connections and their identifiers.
//!
//! # Responsibilities
//! - Wrap any byte stream (TCP, Unix, or a collaborator's TLS/proxy stream)
//!   behind one owned type
//! - Record the peer address used for access control and logging
//! - Hand out listener-scoped connection IDs

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};

/// Any bidirectional byte stream a connection can carry.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed stream stored inside a [`Connection`].
pub type BoxedStream = Box<dyn Stream>;

/// Unique identifier for an accepted connection within one listener run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Monotonic ID source owned by a single listener.
///
/// IDs start at 1 and are never reused. Relaxed ordering is enough since only
/// uniqueness and acceptance order (single accept loop) matter.
#[derive(Debug)]
pub struct ConnectionIdAllocator {
    next: AtomicU64,
}

impl ConnectionIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Address of the remote end of a connection or datagram.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerAddr {
    Inet(SocketAddr),
    /// Unix domain peer; unnamed sockets carry no path.
    Unix(Option<PathBuf>),
    /// Anything a collaborator dialer reports (vsock, proxied targets).
    Other(String),
}

impl PeerAddr {
    pub fn from_unix(addr: &tokio::net::unix::SocketAddr) -> Self {
        PeerAddr::Unix(addr.as_pathname().map(PathBuf::from))
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Inet(addr) => write!(f, "{addr}"),
            PeerAddr::Unix(Some(path)) => write!(f, "{}", path.display()),
            PeerAddr::Unix(None) => f.write_str("@unnamed"),
            PeerAddr::Other(addr) => f.write_str(addr),
        }
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        PeerAddr::Inet(addr)
    }
}

/// An established stream session.
///
/// Owned by whoever accepted or dialed it until split into halves for relaying.
pub struct Connection {
    stream: BoxedStream,
    peer: PeerAddr,
}

impl Connection {
    pub fn new(stream: impl Stream, peer: PeerAddr) -> Self {
        Self {
            stream: Box::new(stream),
            peer,
        }
    }

    pub fn peer(&self) -> &PeerAddr {
        &self.peer
    }

    /// Split into independently owned read and write halves.
    pub fn into_split(self) -> (ReadHalf<BoxedStream>, WriteHalf<BoxedStream>) {
        tokio::io::split(self.stream)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("peer", &self.peer).finish()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn connection_ids_are_monotonic() {
        let ids = ConnectionIdAllocator::new();
        let first = ids.next_id();
        let second = ids.next_id();
        assert_eq!(first.as_u64(), 1);
        assert_eq!(second.as_u64(), 2);
        assert!(first < second);
        assert_eq!(first.to_string(), "conn-1");
    }

    #[test]
    fn peer_addr_display() {
        let inet = PeerAddr::from("10.0.0.5:4000".parse::<SocketAddr>().unwrap());
        assert_eq!(inet.to_string(), "10.0.0.5:4000");
        assert_eq!(PeerAddr::Unix(None).to_string(), "@unnamed");
        assert_eq!(
            PeerAddr::Unix(Some(PathBuf::from("/tmp/sock"))).to_string(),
            "/tmp/sock"
        );
    }

    #[tokio::test]
    async fn connection_delegates_io() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut conn = Connection::new(local, PeerAddr::Other("duplex".into()));

        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        remote.write_all(b"pong").await.unwrap();
        let (mut reader, _writer) = conn.into_split();
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }
}
