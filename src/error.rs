//! Crate-wide error type for connect, listen and datagram relaying.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::net::Network;

/// Errors surfaced by `connect`, `listen` and `transfer`.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration rejected before any socket operation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Name resolution failed or produced no usable address.
    #[error("failed to resolve {address} for {network}: {source}")]
    Resolve {
        network: Network,
        address: String,
        #[source]
        source: io::Error,
    },

    /// Binding a local socket failed.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// A single dial attempt failed.
    #[error("failed to connect to {address} over {network}: {source}")]
    Dial {
        network: Network,
        address: String,
        #[source]
        source: io::Error,
    },

    /// A dial attempt exceeded the configured wait time.
    #[error("connection to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    /// Both the IPv4 and the IPv6 attempt of a dual-stack request failed.
    #[error("{network}: ipv4 attempt: {v4}; ipv6 attempt: {v6}")]
    DualStack {
        network: Network,
        v4: Box<RelayError>,
        v6: Box<RelayError>,
    },

    /// The transport has no built-in primitive, or a required collaborator is missing.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Launching or waiting on the exec command failed.
    #[error("command execution failed: {0}")]
    Exec(#[source] io::Error),

    /// Relay I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RelayError {
    /// Both underlying attempts of a joined dual-stack error.
    pub fn attempts(&self) -> Option<(&RelayError, &RelayError)> {
        match self {
            RelayError::DualStack { v4, v6, .. } => Some((v4, v6)),
            _ => None,
        }
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
