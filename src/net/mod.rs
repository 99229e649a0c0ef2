//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Config (socket type + IP type)
//!     → transport.rs (Network, address parsing, family-filtered resolution)
//!     → dialer.rs (connect mode: TCP/Unix streams, UDP/unixgram sockets)
//!     → listener.rs (listen mode: TCP/Unix stream listeners)
//!     → datagram.rs (UDP/unixgram endpoints for both modes)
//!     → connection.rs (owned stream + peer address, split for relaying)
//! ```
//!
//! # Design Decisions
//! - Every stream transport is erased to one `Connection` type
//! - Dialing and accepting sit behind traits so proxy/TLS collaborators and
//!   in-memory test doubles can stand in for sockets
//! - Families are resolved per attempt; racing IPv4 against IPv6 is left to
//!   the client and server layers

pub mod connection;
pub mod datagram;
pub mod dialer;
pub mod listener;
pub mod transport;

pub use connection::{Connection, ConnectionId, ConnectionIdAllocator, PeerAddr};
pub use datagram::DatagramSocket;
pub use dialer::{DialOptions, Dialer, DirectDialer};
pub use listener::{Acceptor, StreamListener};
pub use transport::{IpType, Network, SocketType};
