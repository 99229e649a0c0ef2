//! Stream listeners.
//!
//! # Responsibilities
//! - Bind TCP or Unix stream listeners for a resolved network/address
//! - Accept incoming connections as [`Connection`]s
//! - Expose accepting through the [`Acceptor`] trait so the listener hub can be
//!   driven by any source of connections

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::net::{TcpListener, UnixListener};

use crate::error::{RelayError, RelayResult};
use crate::net::connection::{Connection, PeerAddr};
use crate::net::transport::{self, Network};

/// Source of accepted stream connections.
#[async_trait]
pub trait Acceptor: Send {
    /// Wait for the next connection.
    async fn accept(&mut self) -> io::Result<Connection>;
}

/// A bound stream listener.
#[derive(Debug)]
pub enum StreamListener {
    Tcp(TcpListener),
    Unix { inner: UnixListener, path: PathBuf },
}

impl StreamListener {
    /// Bind to `address` on a stream `network`.
    ///
    /// TCP addresses are resolved with the network's family filter and the first
    /// candidate that binds wins. Unix listeners bind the filesystem path as-is.
    pub async fn bind(network: Network, address: &str) -> RelayResult<Self> {
        match network {
            Network::Tcp | Network::Tcp4 | Network::Tcp6 => {
                let mut last_err = None;
                for candidate in transport::resolve(network, address).await? {
                    match TcpListener::bind(candidate).await {
                        Ok(listener) => {
                            tracing::info!(
                                network = %network,
                                address = %candidate,
                                "Listener bound"
                            );
                            return Ok(StreamListener::Tcp(listener));
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(RelayError::Bind {
                    address: address.to_string(),
                    source: last_err.unwrap_or_else(|| {
                        io::Error::new(io::ErrorKind::AddrNotAvailable, "no candidate address")
                    }),
                })
            }
            Network::Unix => {
                let inner = UnixListener::bind(address).map_err(|source| RelayError::Bind {
                    address: address.to_string(),
                    source,
                })?;
                tracing::info!(network = %network, path = %address, "Listener bound");
                Ok(StreamListener::Unix {
                    inner,
                    path: PathBuf::from(address),
                })
            }
            other => Err(RelayError::Unsupported(format!(
                "no stream listener for {other}"
            ))),
        }
    }

    /// Local address in printable form.
    pub fn local_addr(&self) -> io::Result<String> {
        match self {
            StreamListener::Tcp(listener) => Ok(listener.local_addr()?.to_string()),
            StreamListener::Unix { path, .. } => Ok(path.display().to_string()),
        }
    }
}

#[async_trait]
impl Acceptor for StreamListener {
    async fn accept(&mut self) -> io::Result<Connection> {
        match self {
            StreamListener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                tracing::debug!(peer_addr = %addr, "Connection accepted");
                Ok(Connection::new(stream, PeerAddr::Inet(addr)))
            }
            StreamListener::Unix { inner, .. } => {
                let (stream, addr) = inner.accept().await?;
                let peer = PeerAddr::from_unix(&addr);
                tracing::debug!(peer_addr = %peer, "Connection accepted");
                Ok(Connection::new(stream, peer))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn tcp_listener_accepts_with_peer_address() {
        let mut listener = StreamListener::bind(Network::Tcp4, "127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"hi").await.unwrap();
            stream.local_addr().unwrap()
        });

        let mut conn = listener.accept().await.unwrap();
        let mut buf = [0u8; 2];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        let client_addr = client.await.unwrap();
        assert_eq!(conn.peer(), &PeerAddr::Inet(client_addr));
    }

    #[tokio::test]
    async fn unix_listener_binds_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");
        let path_str = path.to_str().unwrap();

        let mut listener = StreamListener::bind(Network::Unix, path_str).await.unwrap();
        assert_eq!(listener.local_addr().unwrap(), path_str);

        let connect_path = path.clone();
        tokio::spawn(async move {
            let _ = tokio::net::UnixStream::connect(connect_path).await;
        });
        let conn = listener.accept().await.unwrap();
        assert_eq!(conn.peer(), &PeerAddr::Unix(None));
    }

    #[tokio::test]
    async fn datagram_network_has_no_stream_listener() {
        let err = StreamListener::bind(Network::Udp4, "127.0.0.1:0")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Unsupported(_)));
    }
}
