//! Configuration schema definitions.
//!
//! This module defines the complete run configuration for the relay.
//! All types derive Serde traits for deserialization from TOML files; the CLI
//! overlays its flags on the same structure.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::PortRange;
use crate::net::transport::{self, IpType, Network, SocketType};

/// Root configuration for one run.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connect to a remote peer or listen for peers.
    pub mode: ConnectionMode,

    /// Remote host (connect), bind host (listen), socket path (unix), or CID (vsock).
    pub host: String,

    /// Remote or local port. Unused for Unix sockets.
    pub port: u16,

    /// Transport selection.
    pub protocol: ProtocolConfig,

    /// Connect-mode options.
    pub connect: ConnectConfig,

    /// Listen-mode options.
    pub listen: ListenConfig,

    /// Timeouts and pacing.
    pub timing: TimingConfig,

    /// Allow/deny lists.
    pub access: AccessConfig,

    /// SOCKS proxy to dial through.
    pub proxy: Option<ProxyConfig>,

    /// TLS settings.
    pub tls: TlsConfig,

    /// Command wired to the connection instead of stdin/stdout.
    pub exec: Option<ExecConfig>,

    /// Output tee and hex dump.
    pub output: OutputConfig,

    /// Stream behavior switches.
    pub misc: MiscConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

impl Config {
    /// The network requested for this run.
    pub fn network(&self) -> Network {
        self.protocol.socket_type.network(self.protocol.ip_type)
    }

    /// The address for a given port, in the form the network expects.
    pub fn address_for_port(&self, port: u16) -> String {
        match self.protocol.socket_type {
            SocketType::Unix | SocketType::Unixgram => self.host.clone(),
            SocketType::Vsock => format!("{}:{}", self.host, port),
            _ => transport::join_host_port(&self.host, port),
        }
    }

    /// The address for the configured port.
    pub fn address(&self) -> String {
        self.address_for_port(self.port)
    }

    pub fn is_listen(&self) -> bool {
        self.mode == ConnectionMode::Listen
    }
}

/// Client or server role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    #[default]
    Connect,
    Listen,
}

/// Transport selection.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub socket_type: SocketType,
    pub ip_type: IpType,
}

/// Connect-mode options.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// Local host (or Unix path) to bind before connecting.
    pub source_host: Option<String>,

    /// Local port to bind before connecting.
    pub source_port: Option<u16>,

    /// Only check reachability; relay nothing.
    pub zero_io: bool,

    /// Probe this port range instead of relaying.
    pub scan: Option<PortRange>,
}

/// Listen-mode options.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Maximum concurrently relayed connections.
    pub max_connections: usize,

    /// Keep accepting after the first connection.
    pub keep_open: bool,

    /// Relay each peer's lines to all other peers.
    pub broker: bool,

    /// Broker mode with `user<N>: ` line prefixes.
    pub chat: bool,

    /// What to do after denying a peer.
    pub deny_policy: DenyPolicy,
}

impl ListenConfig {
    /// Chat implies broker.
    pub fn broker_enabled(&self) -> bool {
        self.broker || self.chat
    }

    /// Whether the multi-client accept loop is used.
    pub fn accepts_many(&self) -> bool {
        self.keep_open || self.broker_enabled()
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            keep_open: false,
            broker: false,
            chat: false,
            deny_policy: DenyPolicy::default(),
        }
    }
}

/// Accept-loop behavior after an access-denied peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DenyPolicy {
    /// Close the peer and stop accepting.
    #[default]
    Stop,
    /// Close the peer and keep accepting.
    Skip,
}

/// Timeouts and pacing, in milliseconds. Zero disables.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Per-attempt connect timeout.
    pub wait_ms: u64,

    /// Read inactivity timeout once connected.
    pub idle_timeout_ms: u64,

    /// Pause after each line sent from stdin.
    pub delay_ms: u64,
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl TimingConfig {
    pub fn wait(&self) -> Option<Duration> {
        non_zero_ms(self.wait_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.idle_timeout_ms)
    }

    pub fn delay(&self) -> Option<Duration> {
        non_zero_ms(self.delay_ms)
    }
}

/// Allow/deny lists of host identifiers.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessConfig {
    pub allow: Vec<String>,
    pub allow_file: Option<PathBuf>,
    pub deny: Vec<String>,
    pub deny_file: Option<PathBuf>,
}

/// SOCKS proxy settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy address (`host:port`).
    pub address: String,

    /// Optional `user:password` credentials.
    pub auth: Option<String>,
}

/// TLS settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,

    /// Path to certificate file (PEM).
    pub cert_path: Option<PathBuf>,

    /// Path to private key file (PEM).
    pub key_path: Option<PathBuf>,

    /// Server name to verify in connect mode.
    pub server_name: Option<String>,
}

/// Command to run with the connection as its stdin/stdout.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecConfig {
    pub command: String,

    /// Run through `sh -c` instead of splitting on whitespace.
    pub shell: bool,
}

/// Extra destinations for received bytes.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Copy of everything written to stdout.
    pub file: Option<PathBuf>,

    /// Hex dump of everything written to stdout.
    pub hex_dump: Option<PathBuf>,

    /// Append to the files instead of truncating them.
    pub append: bool,
}

/// Stream behavior switches.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MiscConfig {
    /// Line ending written in place of `\n` when sending stdin.
    pub eol: String,

    /// Do not half-close the connection when stdin ends.
    pub no_shutdown: bool,

    /// Skip reverse lookups for access control.
    pub no_dns: bool,

    /// Only send; never copy the connection to output.
    pub send_only: bool,

    /// Only receive; never read stdin.
    pub receive_only: bool,
}

impl Default for MiscConfig {
    fn default() -> Self {
        Self {
            eol: "\n".to_string(),
            no_shutdown: false,
            no_dns: false,
            send_only: false,
            receive_only: false,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
        }
    }
}
