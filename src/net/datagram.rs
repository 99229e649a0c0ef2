//! Datagram endpoints: UDP and Unix datagram sockets behind one type.

use std::io;
use std::path::Path;

use tokio::net::{UdpSocket, UnixDatagram};

use crate::error::{RelayError, RelayResult};
use crate::net::connection::PeerAddr;
use crate::net::transport::{self, Network};

/// A bound (and in connect mode, connected) datagram socket.
#[derive(Debug)]
pub enum DatagramSocket {
    Udp(UdpSocket),
    Unix(UnixDatagram),
}

impl DatagramSocket {
    /// Bind a datagram socket for listen mode.
    pub async fn bind(network: Network, address: &str) -> RelayResult<Self> {
        match network {
            Network::Udp | Network::Udp4 | Network::Udp6 => {
                let mut last_err = None;
                for candidate in transport::resolve(network, address).await? {
                    match UdpSocket::bind(candidate).await {
                        Ok(socket) => {
                            tracing::info!(network = %network, address = %candidate, "Datagram socket bound");
                            return Ok(DatagramSocket::Udp(socket));
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
            Network::Unixgram => {
                let socket = UnixDatagram::bind(address).map_err(|source| RelayError::Bind {
                    address: address.to_string(),
                    source,
                })?;
                tracing::info!(network = %network, path = %address, "Datagram socket bound");
                Ok(DatagramSocket::Unix(socket))
            }
            other => Err(RelayError::Unsupported(format!(
                "no datagram endpoint for {other}"
            ))),
        }
    }

    pub fn is_udp(&self) -> bool {
        matches!(self, DatagramSocket::Udp(_))
    }

    /// Receive one datagram and its sender.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, PeerAddr)> {
        match self {
            DatagramSocket::Udp(socket) => {
                let (n, addr) = socket.recv_from(buf).await?;
                Ok((n, PeerAddr::Inet(addr)))
            }
            DatagramSocket::Unix(socket) => {
                let (n, addr) = socket.recv_from(buf).await?;
                Ok((n, PeerAddr::from_unix(&addr)))
            }
        }
    }

    /// Send to the connected peer.
    pub async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            DatagramSocket::Udp(socket) => socket.send(buf).await,
            DatagramSocket::Unix(socket) => socket.send(buf).await,
        }
    }

    /// Send to an explicit peer.
    pub async fn send_to(&self, buf: &[u8], peer: &PeerAddr) -> io::Result<usize> {
        match (self, peer) {
            (DatagramSocket::Udp(socket), PeerAddr::Inet(addr)) => socket.send_to(buf, addr).await,
            (DatagramSocket::Unix(socket), PeerAddr::Unix(Some(path))) => {
                socket.send_to(buf, path).await
            }
            (_, peer) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot address datagram peer {peer}"),
            )),
        }
    }

    /// Local address in printable form.
    pub fn local_addr(&self) -> io::Result<String> {
        match self {
            DatagramSocket::Udp(socket) => Ok(socket.local_addr()?.to_string()),
            DatagramSocket::Unix(socket) => Ok(socket
                .local_addr()?
                .as_pathname()
                .map(Path::display)
                .map(|p| p.to_string())
                .unwrap_or_else(|| "@unnamed".to_string())),
        }
    }
}
