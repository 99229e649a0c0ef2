//! Outbound dialing.
//!
//! # Responsibilities
//! - Define the [`Dialer`] seam that proxy and TLS collaborators plug into
//! - Dial TCP and Unix streams directly, binding a source address when configured
//! - Create connected datagram sockets for UDP and Unix datagram targets
//! - Bound every attempt by the configured wait time

use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpSocket, UdpSocket, UnixDatagram, UnixStream};

use crate::error::{RelayError, RelayResult};
use crate::net::connection::{Connection, PeerAddr};
use crate::net::datagram::DatagramSocket;
use crate::net::transport::{self, Network};

/// Stream dialing capability, substitutable by proxy or TLS collaborators.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, network: Network, address: &str) -> RelayResult<Connection>;
}

/// Options shared by every direct dial attempt.
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    /// Source host (or Unix path) to bind before connecting.
    pub source_host: Option<String>,
    /// Source port to bind before connecting.
    pub source_port: Option<u16>,
    /// Per-attempt connect timeout.
    pub wait: Option<Duration>,
}

impl DialOptions {
    fn has_source(&self) -> bool {
        self.source_host.is_some() || self.source_port.is_some()
    }
}

/// Dials sockets with the OS primitives.
#[derive(Debug, Clone, Default)]
pub struct DirectDialer {
    options: DialOptions,
}

impl DirectDialer {
    pub fn new(options: DialOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DialOptions {
        &self.options
    }

    async fn with_wait<T, F>(&self, address: &str, fut: F) -> RelayResult<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        match self.options.wait {
            Some(timeout) => match tokio::time::timeout(timeout, fut).await {
                Ok(res) => res.map_err(RelayError::Io),
                Err(_) => Err(RelayError::Timeout {
                    address: address.to_string(),
                    timeout,
                }),
            },
            None => fut.await.map_err(RelayError::Io),
        }
    }

    /// Resolve the configured source address for an inet network.
    ///
    /// Resolution failure is a hard error; it is never retried.
    async fn source_addrs(&self, network: Network) -> RelayResult<Option<Vec<SocketAddr>>> {
        if !self.options.has_source() {
            return Ok(None);
        }
        let host = self.options.source_host.as_deref().unwrap_or("");
        let port = self.options.source_port.unwrap_or(0);
        let source = transport::join_host_port(host, port);
        Ok(Some(transport::resolve(network, &source).await?))
    }

    fn pick_source(
        sources: &Option<Vec<SocketAddr>>,
        target: &SocketAddr,
    ) -> io::Result<Option<SocketAddr>> {
        match sources {
            None => Ok(None),
            Some(list) => list
                .iter()
                .find(|s| s.is_ipv4() == target.is_ipv4())
                .copied()
                .map(Some)
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::AddrNotAvailable,
                        "no source address matches the destination's address family",
                    )
                }),
        }
    }

    async fn dial_tcp(&self, network: Network, address: &str) -> RelayResult<Connection> {
        let targets = transport::resolve(network, address).await?;
        let sources = self.source_addrs(network).await?;

        let mut last_err = None;
        for target in targets {
            let attempt = async {
                let socket = if target.is_ipv4() {
                    TcpSocket::new_v4()?
                } else {
                    TcpSocket::new_v6()?
                };
                if let Some(source) = Self::pick_source(&sources, &target)? {
                    socket.bind(source)?;
                }
                socket.connect(target).await
            };

            match self.with_wait(address, attempt).await {
                Ok(stream) => {
                    tracing::info!(
                        local_addr = ?stream.local_addr().ok(),
                        peer_addr = %target,
                        "Connected"
                    );
                    return Ok(Connection::new(stream, PeerAddr::Inet(target)));
                }
                Err(e) => {
                    tracing::debug!(peer_addr = %target, error = %e, "Connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(dial_error(network, address, last_err))
    }

    async fn dial_unix(&self, address: &str) -> RelayResult<Connection> {
        let attempt = async {
            match &self.options.source_host {
                Some(source) => {
                    let (source, target) = (source.clone(), address.to_string());
                    // socket2 connects synchronously
                    let stream = tokio::task::spawn_blocking(move || {
                        connect_unix_from(&source, &target)
                    })
                    .await
                    .map_err(io::Error::other)??;
                    UnixStream::from_std(stream)
                }
                None => UnixStream::connect(address).await,
            }
        };
        let stream = self
            .with_wait(address, attempt)
            .await
            .map_err(|e| dial_error(Network::Unix, address, Some(e)))?;

        tracing::info!(path = %address, "Connected");
        Ok(Connection::new(stream, PeerAddr::Unix(Some(address.into()))))
    }

    /// Create a datagram socket connected to `address`.
    pub async fn dial_datagram(&self, network: Network, address: &str) -> RelayResult<DatagramSocket> {
        match network {
            Network::Udp | Network::Udp4 | Network::Udp6 => {
                let targets = transport::resolve(network, address).await?;
                let sources = self.source_addrs(network).await?;
                let mut last_err = None;

                for target in targets {
                    let attempt = async {
                        let local = match Self::pick_source(&sources, &target)? {
                            Some(source) => source,
                            None if target.is_ipv4() => {
                                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
                            }
                            None => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
                        };
                        let socket = UdpSocket::bind(local).await?;
                        socket.connect(target).await?;
                        Ok::<_, io::Error>(socket)
                    };

                    match self.with_wait(address, attempt).await {
                        Ok(socket) => {
                            tracing::info!(peer_addr = %target, "Datagram socket connected");
                            return Ok(DatagramSocket::Udp(socket));
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(dial_error(network, address, last_err))
            }
            Network::Unixgram => {
                let attempt = || -> io::Result<UnixDatagram> {
                    let socket = match &self.options.source_host {
                        Some(source) => UnixDatagram::bind(source)?,
                        None => UnixDatagram::unbound()?,
                    };
                    socket.connect(address)?;
                    Ok(socket)
                };
                let socket = attempt().map_err(|source| RelayError::Dial {
                    network,
                    address: address.to_string(),
                    source,
                })?;
                tracing::info!(path = %address, "Datagram socket connected");
                Ok(DatagramSocket::Unix(socket))
            }
            other => Err(RelayError::Unsupported(format!(
                "no datagram dialer for {other}"
            ))),
        }
    }
}

fn connect_unix_from(source: &str, target: &str) -> io::Result<std::os::unix::net::UnixStream> {
    let socket = socket2::Socket::new(socket2::Domain::UNIX, socket2::Type::STREAM, None)?;
    socket.bind(&socket2::SockAddr::unix(source)?)?;
    socket.connect(&socket2::SockAddr::unix(target)?)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

fn dial_error(network: Network, address: &str, last: Option<RelayError>) -> RelayError {
    match last {
        Some(RelayError::Io(source)) => RelayError::Dial {
            network,
            address: address.to_string(),
            source,
        },
        Some(other) => other,
        None => RelayError::Dial {
            network,
            address: address.to_string(),
            source: io::Error::new(io::ErrorKind::AddrNotAvailable, "no candidate address"),
        },
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, network: Network, address: &str) -> RelayResult<Connection> {
        match network {
            Network::Tcp | Network::Tcp4 | Network::Tcp6 => self.dial_tcp(network, address).await,
            Network::Unix => self.dial_unix(address).await,
            Network::Vsock => {
                let (cid, port) = transport::split_vsock_addr(address)?;
                Err(RelayError::Unsupported(format!(
                    "vsock dialing (cid {cid}, port {port}) has no built-in primitive"
                )))
            }
            other => Err(RelayError::Unsupported(format!(
                "no stream dialer for {other}"
            ))),
        }
    }
}
