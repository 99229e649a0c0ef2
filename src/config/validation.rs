//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Reject mutually exclusive options before any socket is touched
//! - Reject connect-mode-only options in listen mode
//! - Validate value ranges (ports, scan ranges, connection bounds)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: Config → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::IpAddr;

use thiserror::Error;

use crate::config::schema::Config;
use crate::net::transport::SocketType;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("proxy and TLS cannot be used together")]
    ProxyWithTls,

    #[error("send-only and receive-only are mutually exclusive")]
    SendAndReceiveOnly,

    #[error("invalid port scan range {start}-{end}")]
    InvalidScanRange { start: u16, end: u16 },

    #[error("{0} cannot be used in listen mode")]
    NotInListenMode(&'static str),

    #[error("max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("exec cannot be combined with zero-I/O mode")]
    ExecWithZeroIo,

    #[error("exec command is empty")]
    EmptyExecCommand,

    #[error("a {0} is required")]
    MissingTarget(&'static str),

    #[error("host {0:?} is not a numeric address and name lookups are disabled")]
    HostNotNumeric(String),

    #[error("proxy address is empty")]
    EmptyProxyAddress,
}

/// Check a configuration for semantic problems, collecting every one found.
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(proxy) = &config.proxy {
        if config.tls.enabled {
            errors.push(ValidationError::ProxyWithTls);
        }
        if proxy.address.is_empty() {
            errors.push(ValidationError::EmptyProxyAddress);
        }
    }

    if config.misc.send_only && config.misc.receive_only {
        errors.push(ValidationError::SendAndReceiveOnly);
    }

    if let Some(scan) = &config.connect.scan {
        if !scan.is_valid() {
            errors.push(ValidationError::InvalidScanRange {
                start: scan.start,
                end: scan.end,
            });
        }
    }

    if config.is_listen() {
        let connect_only = [
            (config.connect.zero_io, "zero-I/O mode"),
            (config.misc.no_dns, "no_dns"),
            (config.connect.source_host.is_some(), "source host"),
            (config.connect.source_port.is_some(), "source port"),
            (config.connect.scan.is_some(), "port scanning"),
        ];
        errors.extend(
            connect_only
                .into_iter()
                .filter(|(set, _)| *set)
                .map(|(_, name)| ValidationError::NotInListenMode(name)),
        );

        if config.listen.max_connections == 0 {
            errors.push(ValidationError::ZeroMaxConnections);
        }
    }

    if let Some(exec) = &config.exec {
        if config.connect.zero_io {
            errors.push(ValidationError::ExecWithZeroIo);
        }
        if exec.command.trim().is_empty() {
            errors.push(ValidationError::EmptyExecCommand);
        }
    }

    match config.protocol.socket_type {
        SocketType::Unix | SocketType::Unixgram => {
            if config.host.is_empty() {
                errors.push(ValidationError::MissingTarget("socket path"));
            }
        }
        _ => {
            if !config.is_listen() && config.host.is_empty() {
                errors.push(ValidationError::MissingTarget("host"));
            }
            if !config.is_listen()
                && config.misc.no_dns
                && config.protocol.socket_type != SocketType::Vsock
                && !config.host.is_empty()
                && config.host.parse::<IpAddr>().is_err()
            {
                errors.push(ValidationError::HostNotNumeric(config.host.clone()));
            }
            if config.port == 0 && config.connect.scan.is_none() {
                errors.push(ValidationError::MissingTarget("port"));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
