//! Command-line interface.
//!
//! Flags are overlaid on an optional TOML file, then the merged configuration
//! is validated as a whole.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use crate::client::PortRange;
use crate::config::loader::{parse_config, ConfigError};
use crate::config::schema::{
    Config, ConnectionMode, DenyPolicy, ExecConfig, ProxyConfig,
};
use crate::config::validation::{validate_config, ValidationError};
use crate::net::transport::{IpType, SocketType};

#[derive(Debug, Parser)]
#[command(name = "netrelay")]
#[command(version, about = "Relay bytes between stdin/stdout and TCP, UDP, Unix, VSOCK or SCTP sockets", long_about = None)]
pub struct Cli {
    /// Host and port to connect to; in listen mode, [host] port to bind.
    /// For Unix sockets, the socket path.
    #[arg(value_name = "TARGET", num_args = 0..=2)]
    pub target: Vec<String>,

    /// Base configuration file (TOML).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Listen for incoming connections.
    #[arg(short = 'l', long)]
    pub listen: bool,

    /// Accept multiple connections in listen mode.
    #[arg(short = 'k', long)]
    pub keep_open: bool,

    /// Maximum concurrent connections in listen mode.
    #[arg(short = 'm', long, value_name = "N")]
    pub max_conns: Option<usize>,

    /// Relay each client's lines to all other clients.
    #[arg(long)]
    pub broker: bool,

    /// Broker mode with `user<N>: ` prefixes.
    #[arg(long)]
    pub chat: bool,

    /// Keep accepting after a denied peer instead of stopping.
    #[arg(long, value_enum, value_name = "POLICY")]
    pub deny_policy: Option<DenyPolicyArg>,

    /// Use UDP (with -U, Unix datagram sockets).
    #[arg(short = 'u', long, conflicts_with_all = ["vsock", "sctp"])]
    pub udp: bool,

    /// Use Unix domain sockets.
    #[arg(short = 'U', long, conflicts_with_all = ["vsock", "sctp"])]
    pub unixsock: bool,

    /// Use VSOCK.
    #[arg(long, conflicts_with = "sctp")]
    pub vsock: bool,

    /// Use SCTP.
    #[arg(long)]
    pub sctp: bool,

    /// IPv4 only.
    #[arg(short = '4', conflicts_with = "ipv6")]
    pub ipv4: bool,

    /// IPv6 only.
    #[arg(short = '6')]
    pub ipv6: bool,

    /// Source address (or Unix path) to bind before connecting.
    #[arg(short = 's', long, value_name = "ADDR")]
    pub source: Option<String>,

    /// Source port to bind before connecting.
    #[arg(short = 'p', long, value_name = "PORT")]
    pub source_port: Option<u16>,

    /// Only check that the target is reachable.
    #[arg(short = 'z', long)]
    pub zero_io: bool,

    /// Probe every port in START-END instead of relaying.
    #[arg(long, value_name = "START-END")]
    pub scan: Option<PortRange>,

    /// Connect timeout in milliseconds.
    #[arg(short = 'w', long, value_name = "MS")]
    pub wait: Option<u64>,

    /// Idle read timeout in milliseconds.
    #[arg(short = 'i', long, value_name = "MS")]
    pub idle_timeout: Option<u64>,

    /// Delay between lines sent, in milliseconds.
    #[arg(short = 'd', long, value_name = "MS")]
    pub delay: Option<u64>,

    /// Allow only these hosts.
    #[arg(long, value_name = "HOST", value_delimiter = ',')]
    pub allow: Vec<String>,

    /// Allow hosts listed in a file.
    #[arg(long, value_name = "PATH")]
    pub allowfile: Option<PathBuf>,

    /// Deny these hosts.
    #[arg(long, value_name = "HOST", value_delimiter = ',')]
    pub deny: Vec<String>,

    /// Deny hosts listed in a file.
    #[arg(long, value_name = "PATH")]
    pub denyfile: Option<PathBuf>,

    /// Do not resolve host names.
    #[arg(short = 'n', long)]
    pub nodns: bool,

    /// Only send data, ignoring received data.
    #[arg(long, conflicts_with = "recv_only")]
    pub send_only: bool,

    /// Only receive data, never read stdin.
    #[arg(long)]
    pub recv_only: bool,

    /// Do not half-close the connection when stdin ends.
    #[arg(long)]
    pub no_shutdown: bool,

    /// Send CRLF line endings.
    #[arg(short = 'C', long)]
    pub crlf: bool,

    /// Run a command with the connection as its stdin/stdout.
    #[arg(short = 'e', long, value_name = "CMD", conflicts_with = "sh_exec")]
    pub exec: Option<String>,

    /// Run a command through `sh -c` with the connection as its stdin/stdout.
    #[arg(short = 'c', long, value_name = "CMD")]
    pub sh_exec: Option<String>,

    /// Write received data to a file as well.
    #[arg(short = 'o', long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Write a hex dump of received data to a file.
    #[arg(short = 'x', long, value_name = "PATH")]
    pub hex_dump: Option<PathBuf>,

    /// Append to output files instead of truncating.
    #[arg(long)]
    pub append_output: bool,

    /// Connect through a SOCKS proxy at HOST:PORT.
    #[arg(long, value_name = "HOST:PORT")]
    pub proxy: Option<String>,

    /// Proxy credentials (user:password).
    #[arg(long, value_name = "CREDS", requires = "proxy")]
    pub proxy_auth: Option<String>,

    /// Use TLS.
    #[arg(long)]
    pub ssl: bool,

    /// Verbosity (-v info, -vv debug).
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DenyPolicyArg {
    Stop,
    Skip,
}

impl From<DenyPolicyArg> for DenyPolicy {
    fn from(arg: DenyPolicyArg) -> Self {
        match arg {
            DenyPolicyArg::Stop => DenyPolicy::Stop,
            DenyPolicyArg::Skip => DenyPolicy::Skip,
        }
    }
}

impl Cli {
    /// Log filter directive implied by `-v` flags, if any were given.
    pub fn log_level(&self) -> Option<&'static str> {
        match self.verbose {
            0 => None,
            1 => Some("info"),
            _ => Some("debug"),
        }
    }

    /// Merge flags over the optional base file and validate the result.
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => parse_config(path)?,
            None => Config::default(),
        };
        self.apply(&mut config)
            .map_err(|e| ConfigError::Validation(vec![e]))?;
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }

    fn apply(self, config: &mut Config) -> Result<(), ValidationError> {
        if self.listen {
            config.mode = ConnectionMode::Listen;
        }

        if self.udp {
            config.protocol.socket_type = SocketType::Udp;
        } else if self.unixsock {
            config.protocol.socket_type = SocketType::Unix;
        } else if self.vsock {
            config.protocol.socket_type = SocketType::Vsock;
        } else if self.sctp {
            config.protocol.socket_type = SocketType::Sctp;
        }
        if self.ipv4 {
            config.protocol.ip_type = IpType::V4;
        } else if self.ipv6 {
            config.protocol.ip_type = IpType::V6;
        }
        if self.unixsock && self.udp {
            config.protocol.socket_type = SocketType::Unixgram;
        }

        self.apply_target(config)?;

        config.listen.keep_open |= self.keep_open;
        config.listen.broker |= self.broker;
        config.listen.chat |= self.chat;
        if let Some(max) = self.max_conns {
            config.listen.max_connections = max;
        }
        if let Some(policy) = self.deny_policy {
            config.listen.deny_policy = policy.into();
        }

        if self.source.is_some() {
            config.connect.source_host = self.source;
        }
        if self.source_port.is_some() {
            config.connect.source_port = self.source_port;
        }
        config.connect.zero_io |= self.zero_io;
        if self.scan.is_some() {
            config.connect.scan = self.scan;
        }

        if let Some(ms) = self.wait {
            config.timing.wait_ms = ms;
        }
        if let Some(ms) = self.idle_timeout {
            config.timing.idle_timeout_ms = ms;
        }
        if let Some(ms) = self.delay {
            config.timing.delay_ms = ms;
        }

        config.access.allow.extend(self.allow);
        config.access.deny.extend(self.deny);
        if self.allowfile.is_some() {
            config.access.allow_file = self.allowfile;
        }
        if self.denyfile.is_some() {
            config.access.deny_file = self.denyfile;
        }

        config.misc.no_dns |= self.nodns;
        config.misc.send_only |= self.send_only;
        config.misc.receive_only |= self.recv_only;
        config.misc.no_shutdown |= self.no_shutdown;
        if self.crlf {
            config.misc.eol = "\r\n".to_string();
        }

        if let Some(command) = self.exec {
            config.exec = Some(ExecConfig {
                command,
                shell: false,
            });
        } else if let Some(command) = self.sh_exec {
            config.exec = Some(ExecConfig {
                command,
                shell: true,
            });
        }

        if self.output.is_some() {
            config.output.file = self.output;
        }
        if self.hex_dump.is_some() {
            config.output.hex_dump = self.hex_dump;
        }
        config.output.append |= self.append_output;

        if let Some(address) = self.proxy {
            config.proxy = Some(ProxyConfig {
                address,
                auth: self.proxy_auth,
            });
        }
        config.tls.enabled |= self.ssl;

        Ok(())
    }

    fn apply_target(&self, config: &mut Config) -> Result<(), ValidationError> {
        let parse_port = |p: &str| {
            p.parse::<u16>()
                .map_err(|_| ValidationError::MissingTarget("valid port"))
        };

        match (config.protocol.socket_type, self.target.as_slice()) {
            (_, []) => {}
            (SocketType::Unix | SocketType::Unixgram, [path]) => config.host = path.clone(),
            (SocketType::Unix | SocketType::Unixgram, [_, _]) => {
                return Err(ValidationError::MissingTarget("single socket path"))
            }
            (_, [port]) if config.mode == ConnectionMode::Listen => {
                config.port = parse_port(port)?;
            }
            (_, [host]) => config.host = host.clone(),
            (_, [host, port]) => {
                config.host = host.clone();
                config.port = parse_port(port)?;
            }
            (_, _) => return Err(ValidationError::MissingTarget("host and port")),
        }
        Ok(())
    }
}
