//! Transport naming, address parsing and family-filtered resolution.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};

/// A concrete network request, possibly qualified by IP family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
    Unix,
    Unixgram,
    Vsock,
    Sctp,
}

/// IP family restriction carried by a qualified network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Any,
    V4,
    V6,
}

impl Network {
    /// The IPv4 and IPv6 variants to race, for unqualified `tcp` and `udp` only.
    pub fn dual_stack(self) -> Option<(Network, Network)> {
        match self {
            Network::Tcp => Some((Network::Tcp4, Network::Tcp6)),
            Network::Udp => Some((Network::Udp4, Network::Udp6)),
            _ => None,
        }
    }

    pub fn is_datagram(self) -> bool {
        matches!(
            self,
            Network::Udp | Network::Udp4 | Network::Udp6 | Network::Unixgram
        )
    }

    /// True for the TCP family (the transports subject to access control on accept).
    pub fn is_tcp(self) -> bool {
        matches!(self, Network::Tcp | Network::Tcp4 | Network::Tcp6)
    }

    pub fn is_udp(self) -> bool {
        matches!(self, Network::Udp | Network::Udp4 | Network::Udp6)
    }

    pub fn is_inet(self) -> bool {
        self.is_tcp() || self.is_udp()
    }

    pub fn family(self) -> Family {
        match self {
            Network::Tcp4 | Network::Udp4 => Family::V4,
            Network::Tcp6 | Network::Udp6 => Family::V6,
            _ => Family::Any,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Udp => "udp",
            Network::Udp4 => "udp4",
            Network::Udp6 => "udp6",
            Network::Unix => "unix",
            Network::Unixgram => "unixgram",
            Network::Vsock => "vsock",
            Network::Sctp => "sctp",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "tcp" => Network::Tcp,
            "tcp4" => Network::Tcp4,
            "tcp6" => Network::Tcp6,
            "udp" => Network::Udp,
            "udp4" => Network::Udp4,
            "udp6" => Network::Udp6,
            "unix" => Network::Unix,
            "unixgram" => Network::Unixgram,
            "vsock" => Network::Vsock,
            "sctp" => Network::Sctp,
            other => return Err(RelayError::Unsupported(format!("network {other:?}"))),
        })
    }
}

/// Socket type selected in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketType {
    #[default]
    Tcp,
    Udp,
    Unix,
    Unixgram,
    Vsock,
    Sctp,
}

/// IP version restriction selected in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IpType {
    #[default]
    V4v6,
    V4,
    V6,
}

impl SocketType {
    /// Map the socket type and IP restriction to the network requested from the engine.
    pub fn network(self, ip_type: IpType) -> Network {
        match (self, ip_type) {
            (SocketType::Tcp, IpType::V4v6) => Network::Tcp,
            (SocketType::Tcp, IpType::V4) => Network::Tcp4,
            (SocketType::Tcp, IpType::V6) => Network::Tcp6,
            (SocketType::Udp, IpType::V4v6) => Network::Udp,
            (SocketType::Udp, IpType::V4) => Network::Udp4,
            (SocketType::Udp, IpType::V6) => Network::Udp6,
            (SocketType::Unix, _) => Network::Unix,
            (SocketType::Unixgram, _) => Network::Unixgram,
            (SocketType::Vsock, _) => Network::Vsock,
            (SocketType::Sctp, _) => Network::Sctp,
        }
    }
}

/// Split `host:port`, stripping the brackets of an IPv6 literal.
pub fn split_host_port(address: &str) -> io::Result<(&str, &str)> {
    let invalid = || {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("address {address:?}: missing port"),
        )
    };

    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let port = tail.strip_prefix(':').ok_or_else(invalid)?;
        return Ok((host, port));
    }

    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.contains(':') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("address {address:?}: too many colons"),
        ));
    }
    Ok((host, port))
}

/// Join a host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Split a `cid:port` VSOCK address.
pub fn split_vsock_addr(address: &str) -> io::Result<(u32, u32)> {
    let (cid, port) = address.split_once(':').ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("vsock address {address:?}: expected cid:port"),
        )
    })?;
    let parse = |field: &str, what: &str| {
        field.parse::<u32>().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("vsock address {address:?}: invalid {what}: {e}"),
            )
        })
    };
    Ok((parse(cid, "cid")?, parse(port, "port")?))
}

fn unspecified(family: Family) -> IpAddr {
    match family {
        Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    }
}

fn family_matches(family: Family, addr: &SocketAddr) -> bool {
    match family {
        Family::Any => true,
        Family::V4 => addr.is_ipv4(),
        Family::V6 => addr.is_ipv6(),
    }
}

/// Resolve `host:port` for an inet network, keeping only addresses of its family.
///
/// An empty host resolves to the unspecified address, which is what a listener wants
/// for `:port`.
pub async fn resolve(network: Network, address: &str) -> RelayResult<Vec<SocketAddr>> {
    let resolve_err = |source: io::Error| RelayError::Resolve {
        network,
        address: address.to_string(),
        source,
    };

    let (host, port) = split_host_port(address).map_err(resolve_err)?;
    let port: u16 = port.parse().map_err(|e| {
        resolve_err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid port: {e}"),
        ))
    })?;

    let family = network.family();
    if host.is_empty() {
        return Ok(vec![SocketAddr::new(unspecified(family), port)]);
    }

    let candidates: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(resolve_err)?
        .filter(|addr| family_matches(family, addr))
        .collect();

    if candidates.is_empty() {
        return Err(resolve_err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no {network} address for host {host:?}"),
        )));
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dual_stack_only_for_unqualified_inet() {
        assert_eq!(Network::Tcp.dual_stack(), Some((Network::Tcp4, Network::Tcp6)));
        assert_eq!(Network::Udp.dual_stack(), Some((Network::Udp4, Network::Udp6)));
        for network in [
            Network::Tcp4,
            Network::Tcp6,
            Network::Udp4,
            Network::Udp6,
            Network::Unix,
            Network::Unixgram,
            Network::Vsock,
            Network::Sctp,
        ] {
            assert_eq!(network.dual_stack(), None, "{network}");
        }
    }

    #[test]
    fn network_names_round_trip() {
        for name in ["tcp", "tcp6", "udp4", "unixgram", "vsock", "sctp"] {
            let network: Network = name.parse().unwrap();
            assert_eq!(network.to_string(), name);
        }
        assert!("quic".parse::<Network>().is_err());
    }

    #[test]
    fn socket_type_maps_ip_restriction() {
        assert_eq!(SocketType::Tcp.network(IpType::V4v6), Network::Tcp);
        assert_eq!(SocketType::Udp.network(IpType::V6), Network::Udp6);
        assert_eq!(SocketType::Unix.network(IpType::V4), Network::Unix);
    }

    #[test]
    fn host_port_helpers() {
        assert_eq!(split_host_port("127.0.0.1:80").unwrap(), ("127.0.0.1", "80"));
        assert_eq!(split_host_port("[::1]:80").unwrap(), ("::1", "80"));
        assert_eq!(split_host_port(":8080").unwrap(), ("", "8080"));
        assert!(split_host_port("localhost").is_err());
        assert!(split_host_port("::1:80").is_err());

        assert_eq!(join_host_port("::1", 8080), "[::1]:8080");
        assert_eq!(join_host_port("example.com", 22), "example.com:22");
    }

    #[test]
    fn vsock_addresses() {
        assert_eq!(split_vsock_addr("3:1024").unwrap(), (3, 1024));
        assert!(split_vsock_addr("3").is_err());
        assert!(split_vsock_addr("host:1024").is_err());
    }

    #[tokio::test]
    async fn resolve_filters_by_family() {
        let v4 = resolve(Network::Tcp4, "127.0.0.1:9000").await.unwrap();
        assert_eq!(v4, vec!["127.0.0.1:9000".parse().unwrap()]);

        let err = resolve(Network::Tcp6, "127.0.0.1:9000").await.unwrap_err();
        assert!(matches!(err, RelayError::Resolve { .. }));

        let any = resolve(Network::Udp6, ":53").await.unwrap();
        assert_eq!(any, vec!["[::]:53".parse().unwrap()]);
    }
}
