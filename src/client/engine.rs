//! Connect-mode orchestration.
//!
//! # Responsibilities
//! - Race IPv4 against IPv6 for unqualified networks
//! - Pick the dialer (direct, proxy, TLS) for stream networks
//! - Relay stdin and output over the established connection, run the exec
//!   command on it, or just probe it (zero-I/O, port scan)

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use crate::client::scan::PortRange;
use crate::config::loader::ConfigError;
use crate::config::schema::Config;
use crate::config::validation::ValidationError;
use crate::datagram::{BridgeMode, BridgeOptions, DatagramBridge};
use crate::error::{RelayError, RelayResult};
use crate::net::transport::{join_host_port, split_host_port};
use crate::net::{Connection, DatagramSocket, DialOptions, Dialer, DirectDialer, Network};
use crate::relay::{copy_lines, copy_to_output, copy_to_writer, run_command, BoxedReader, RunOnce, SharedOutput};
use crate::security::{AccessControl, NoResolve};

/// Run `attempt` once for a qualified network. For `tcp`/`udp`, try the IPv4
/// variant first and the IPv6 variant only if that fails; when both fail the
/// error carries both causes.
pub async fn race_dual_stack<T, F, Fut>(network: Network, address: &str, mut attempt: F) -> RelayResult<T>
where
    F: FnMut(Network, String) -> Fut,
    Fut: Future<Output = RelayResult<T>>,
{
    let Some((v4, v6)) = network.dual_stack() else {
        return attempt(network, address.to_string()).await;
    };

    match attempt(v4, address.to_string()).await {
        Ok(value) => Ok(value),
        Err(v4_err) => {
            tracing::debug!(network = %v4, address, error = %v4_err, "IPv4 attempt failed, trying IPv6");
            attempt(v6, address.to_string())
                .await
                .map_err(|v6_err| RelayError::DualStack {
                    network,
                    v4: Box::new(v4_err),
                    v6: Box::new(v6_err),
                })
        }
    }
}

/// Result of the establishment phase.
#[derive(Debug)]
pub enum Established {
    Stream(Connection),
    Datagram(DatagramSocket),
}

/// Client role.
pub struct ConnectionEngine {
    config: Arc<Config>,
    direct: Arc<DirectDialer>,
    proxy_dialer: Option<Arc<dyn Dialer>>,
    tls_dialer: Option<Arc<dyn Dialer>>,
    stdin: RunOnce<BoxedReader>,
}

impl ConnectionEngine {
    pub fn new(config: Arc<Config>, stdin: BoxedReader) -> Self {
        let connect = &config.connect;
        let direct = DirectDialer::new(DialOptions {
            source_host: connect.source_host.clone(),
            source_port: connect.source_port,
            wait: config.timing.wait(),
        });
        Self {
            config,
            direct: Arc::new(direct),
            proxy_dialer: None,
            tls_dialer: None,
            stdin: RunOnce::new(stdin),
        }
    }

    /// Dialer used when `proxy` is configured.
    pub fn with_proxy_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.proxy_dialer = Some(dialer);
        self
    }

    /// Dialer used when `tls.enabled` is set.
    pub fn with_tls_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.tls_dialer = Some(dialer);
        self
    }

    fn select_dialer(&self) -> RelayResult<Arc<dyn Dialer>> {
        let proxy = self.config.proxy.is_some();
        let tls = self.config.tls.enabled;
        match (proxy, tls) {
            (true, true) => Err(ConfigError::Validation(vec![ValidationError::ProxyWithTls]).into()),
            (true, false) => self.proxy_dialer.clone().ok_or_else(|| {
                RelayError::Unsupported("proxy dialing needs a proxy dialer".to_string())
            }),
            (false, true) => self.tls_dialer.clone().ok_or_else(|| {
                RelayError::Unsupported("TLS dialing needs a TLS dialer".to_string())
            }),
            (false, false) => {
                let direct: Arc<dyn Dialer> = self.direct.clone();
                Ok(direct)
            }
        }
    }

    fn take_stdin(&self) -> BoxedReader {
        self.stdin
            .take()
            .unwrap_or_else(|| Box::new(tokio::io::empty()))
    }

    /// Connect to `address` and relay, or sweep the configured port range.
    pub async fn connect(&self, output: SharedOutput, network: Network, address: &str) -> RelayResult<()> {
        if let Some(range) = self.config.connect.scan {
            return self.scan_ports(network, address, range).await;
        }

        let established = race_dual_stack(network, address, |network, address| async move {
            self.establish(network, &address).await
        })
        .await?;

        match established {
            Established::Stream(conn) => self.relay_stream(output, conn).await,
            Established::Datagram(socket) => self.relay_datagram(output, socket).await,
        }
    }

    /// Dial `address` on a single qualified network.
    pub async fn establish(&self, network: Network, address: &str) -> RelayResult<Established> {
        if network.is_datagram() {
            let socket = self.direct.dial_datagram(network, address).await?;
            return Ok(Established::Datagram(socket));
        }
        let conn = self.select_dialer()?.dial(network, address).await?;
        tracing::debug!(network = %network, peer_addr = %conn.peer(), "Connection established");
        Ok(Established::Stream(conn))
    }

    /// Probe every port of `range` on the host of `address`, ascending.
    ///
    /// Open and closed ports are logged; the sweep itself does not fail on a
    /// closed port.
    pub async fn scan_ports(&self, network: Network, address: &str, range: PortRange) -> RelayResult<()> {
        let host = match split_host_port(address) {
            Ok((host, _)) => host.to_string(),
            Err(_) => address.to_string(),
        };

        for port in range.ports() {
            let target = join_host_port(&host, port);
            let probe = race_dual_stack(network, &target, |network, address| async move {
                self.establish(network, &address).await
            })
            .await;
            match probe {
                Ok(_) => tracing::info!(port, address = %target, "Port open"),
                Err(e) => tracing::info!(port, address = %target, error = %e, "Port closed"),
            }
        }
        Ok(())
    }

    async fn relay_stream(&self, output: SharedOutput, conn: Connection) -> RelayResult<()> {
        if self.config.connect.zero_io {
            tracing::info!(peer_addr = %conn.peer(), "Connection succeeded");
            return Ok(());
        }
        if let Some(exec) = &self.config.exec {
            run_command(exec, conn).await?;
            return Ok(());
        }

        let misc = &self.config.misc;
        let timing = &self.config.timing;
        let stdin = (!misc.receive_only).then(|| self.take_stdin());
        let (mut reader, mut writer) = conn.into_split();

        let send = tokio::spawn({
            let eol = misc.eol.clone();
            let delay = timing.delay();
            let no_shutdown = misc.no_shutdown;
            async move {
                if let Some(stdin) = stdin {
                    copy_lines(stdin, &mut writer, &eol, delay).await?;
                }
                if !no_shutdown {
                    writer.shutdown().await?;
                }
                Ok::<(), io::Error>(())
            }
        });

        let received = async {
            if misc.send_only {
                copy_to_writer(&mut reader, &mut tokio::io::sink(), timing.idle_timeout()).await?;
            } else {
                copy_to_output(&mut reader, &output, timing.idle_timeout()).await?;
            }
            output.shutdown().await
        }
        .await;

        let sent = match send.await {
            Ok(res) => res,
            Err(e) => Err(io::Error::other(e)),
        };
        sent?;
        received?;
        Ok(())
    }

    async fn relay_datagram(&self, output: SharedOutput, socket: DatagramSocket) -> RelayResult<()> {
        if self.config.connect.zero_io {
            tracing::info!(address = ?socket.local_addr().ok(), "Datagram socket ready");
            return Ok(());
        }
        let bridge = DatagramBridge::new(
            Arc::new(AccessControl::permissive()),
            Arc::new(NoResolve),
            BridgeOptions::from_config(&self.config),
        );
        bridge
            .transfer(output, socket, BridgeMode::Connect, self.take_stdin())
            .await
    }
}
