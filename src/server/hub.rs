//! Listen-mode orchestration.
//!
//! # Responsibilities
//! - Bind the listen endpoint, racing IPv4 against IPv6 for unqualified networks
//! - Dispatch to the single-connection relay, the multi-client accept loop, or
//!   the datagram bridge
//! - Apply access control to TCP peers before they get an ID
//! - Bound concurrent relays and drive broker/chat fan-out
//!
//! # Design Decisions
//! - Concurrency is bounded by a semaphore permit held by each relay task
//! - Stdin goes to the first eligible connection through a `RunOnce` gate; that
//!   connection's writer stays out of the registry
//! - The accept loop waits for every relay task before returning

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::client::race_dual_stack;
use crate::config::loader::ConfigError;
use crate::config::schema::{Config, DenyPolicy};
use crate::config::validation::ValidationError;
use crate::datagram::{BridgeMode, BridgeOptions, DatagramBridge};
use crate::error::RelayResult;
use crate::lifecycle::ShutdownSignal;
use crate::net::{
    Acceptor, Connection, ConnectionId, ConnectionIdAllocator, DatagramSocket, Network, PeerAddr,
    StreamListener,
};
use crate::relay::{
    copy_lines, copy_to_output, copy_to_writer, read_chunk, run_command, BoxedReader, BoxedWriter,
    InputChunks, RunOnce, SharedOutput,
};
use crate::resilience::FailureBackoff;
use crate::security::{AccessControl, ReverseResolver};
use crate::server::registry::ConnectionRegistry;

const ACCEPT_BACKOFF_BASE_MS: u64 = 5;
const ACCEPT_BACKOFF_MAX_MS: u64 = 1000;

/// Longest line a broker peer may send.
pub const MAX_LINE: usize = 64 * 1024;

/// A bound listen endpoint: repeated accepts, or one datagram socket.
#[derive(Debug)]
pub enum ListenEndpoint {
    Stream(StreamListener),
    Datagram(DatagramSocket),
}

impl ListenEndpoint {
    pub async fn bind(network: Network, address: &str) -> RelayResult<Self> {
        if network.is_datagram() {
            Ok(ListenEndpoint::Datagram(DatagramSocket::bind(network, address).await?))
        } else {
            Ok(ListenEndpoint::Stream(StreamListener::bind(network, address).await?))
        }
    }

    pub fn local_addr(&self) -> io::Result<String> {
        match self {
            ListenEndpoint::Stream(listener) => listener.local_addr(),
            ListenEndpoint::Datagram(socket) => socket.local_addr(),
        }
    }
}

/// Settings every relay task of one accept loop shares.
struct RelayContext {
    registry: Arc<ConnectionRegistry>,
    output: SharedOutput,
    broker: bool,
    chat: bool,
    send_only: bool,
    no_shutdown: bool,
    idle_timeout: Option<Duration>,
    eol: String,
    delay: Option<Duration>,
}

/// Server role: accepts peers and relays between them, stdin and output.
pub struct ListenerHub {
    config: Arc<Config>,
    access: Arc<AccessControl>,
    resolver: Arc<dyn ReverseResolver>,
    stdin: Arc<RunOnce<BoxedReader>>,
    shutdown: ShutdownSignal,
}

impl ListenerHub {
    pub fn new(
        config: Arc<Config>,
        access: Arc<AccessControl>,
        resolver: Arc<dyn ReverseResolver>,
        stdin: BoxedReader,
    ) -> Self {
        Self {
            config,
            access,
            resolver,
            stdin: Arc::new(RunOnce::new(stdin)),
            shutdown: ShutdownSignal::never(),
        }
    }

    /// Stop accepting when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn take_stdin(&self) -> BoxedReader {
        self.stdin
            .take()
            .unwrap_or_else(|| Box::new(tokio::io::empty()))
    }

    fn check_config(&self) -> Result<(), ConfigError> {
        let connect = &self.config.connect;
        let rejected: Vec<ValidationError> = [
            (connect.zero_io, "zero-I/O mode"),
            (self.config.misc.no_dns, "no_dns"),
            (connect.source_host.is_some(), "source host"),
            (connect.source_port.is_some(), "source port"),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| ValidationError::NotInListenMode(name))
        .collect();

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(rejected))
        }
    }

    /// Listen on `address`, trying IPv4 then IPv6 for unqualified networks.
    pub async fn listen_mode(&self, output: SharedOutput, network: Network, address: &str) -> RelayResult<()> {
        self.check_config()?;
        let endpoint = race_dual_stack(network, address, |network, address| async move {
            ListenEndpoint::bind(network, &address).await
        })
        .await?;
        self.listen_for_connections(output, endpoint).await
    }

    /// Listen on a single network without dual-stack racing.
    pub async fn listen(&self, output: SharedOutput, network: Network, address: &str) -> RelayResult<()> {
        self.check_config()?;
        let endpoint = ListenEndpoint::bind(network, address).await?;
        self.listen_for_connections(output, endpoint).await
    }

    /// Run the relay appropriate for the endpoint and listen options.
    pub async fn listen_for_connections(&self, output: SharedOutput, endpoint: ListenEndpoint) -> RelayResult<()> {
        tracing::info!(address = ?endpoint.local_addr().ok(), "Listening");
        match endpoint {
            ListenEndpoint::Datagram(socket) => {
                let bridge = DatagramBridge::new(
                    self.access.clone(),
                    self.resolver.clone(),
                    BridgeOptions::from_config(&self.config),
                );
                bridge
                    .transfer(output, socket, BridgeMode::Listen, self.take_stdin())
                    .await
            }
            ListenEndpoint::Stream(mut listener) => {
                if self.config.listen.accepts_many() {
                    self.accept_forever(output, &mut listener, None).await
                } else {
                    self.accept_single(output, &mut listener).await
                }
            }
        }
    }

    /// Accept the next peer that passes access control. Denied peers are
    /// closed and skipped.
    async fn accept_allowed<A: Acceptor + ?Sized>(&self, listener: &mut A) -> RelayResult<Connection> {
        loop {
            let conn = listener.accept().await?;
            if self.admit(conn.peer().clone()).await {
                return Ok(conn);
            }
        }
    }

    async fn admit(&self, peer: PeerAddr) -> bool {
        match peer {
            PeerAddr::Inet(_) => self.access.check(&peer, self.resolver.as_ref()).await,
            _ => true,
        }
    }

    /// Relay exactly one connection with stdin and output, then return.
    ///
    /// Output is shut down once the peer finishes sending. A stdin-side error
    /// takes precedence over a receive-side error.
    pub async fn accept_single<A: Acceptor + ?Sized>(&self, output: SharedOutput, listener: &mut A) -> RelayResult<()> {
        let conn = self.accept_allowed(listener).await?;
        tracing::info!(peer_addr = %conn.peer(), "Connection accepted");

        if let Some(exec) = &self.config.exec {
            run_command(exec, conn).await?;
            return Ok(());
        }

        let misc = &self.config.misc;
        let timing = &self.config.timing;
        let stdin = if misc.receive_only { None } else { self.stdin.take() };
        let (mut reader, mut writer) = conn.into_split();

        let send = async {
            if let Some(stdin) = stdin {
                copy_lines(stdin, &mut writer, &misc.eol, timing.delay()).await?;
            }
            if !misc.no_shutdown {
                writer.shutdown().await?;
            }
            Ok::<(), io::Error>(())
        };

        let receive = async {
            if misc.send_only {
                copy_to_writer(&mut reader, &mut tokio::io::sink(), timing.idle_timeout()).await?;
            } else {
                copy_to_output(&mut reader, &output, timing.idle_timeout()).await?;
            }
            output.shutdown().await
        };

        let (sent, received) = tokio::join!(send, receive);
        sent?;
        received?;
        Ok(())
    }

    /// Multi-client accept loop.
    ///
    /// Runs until `accept_limit` connections have been admitted (unbounded when
    /// `None`), a peer is denied under [`DenyPolicy::Stop`], or shutdown fires;
    /// then waits for every relay task. Output is never shut down here since
    /// later peers could still write to it.
    pub async fn accept_forever<A: Acceptor + ?Sized>(
        &self,
        output: SharedOutput,
        listener: &mut A,
        accept_limit: Option<usize>,
    ) -> RelayResult<()> {
        let listen = &self.config.listen;
        let registry = Arc::new(ConnectionRegistry::new());
        let ids = ConnectionIdAllocator::new();
        let permits = Arc::new(Semaphore::new(listen.max_connections.max(1)));
        let ctx = Arc::new(RelayContext {
            registry: registry.clone(),
            output,
            broker: listen.broker_enabled(),
            chat: listen.chat,
            send_only: self.config.misc.send_only,
            no_shutdown: self.config.misc.no_shutdown,
            idle_timeout: self.config.timing.idle_timeout(),
            eol: self.config.misc.eol.clone(),
            delay: self.config.timing.delay(),
        });

        let mut tasks = JoinSet::new();
        let mut accepted = 0usize;
        let mut backoff = FailureBackoff::new(ACCEPT_BACKOFF_BASE_MS, ACCEPT_BACKOFF_MAX_MS);
        let mut shutdown = self.shutdown.clone();

        loop {
            if accept_limit.is_some_and(|limit| accepted >= limit) {
                tracing::info!(accepted, "Accept limit reached");
                break;
            }
            while let Some(done) = tasks.try_join_next() {
                log_task_exit(done);
            }

            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.recv() => break,
            };

            let accepted_conn = tokio::select! {
                res = listener.accept() => res,
                _ = shutdown.recv() => {
                    tracing::info!("Accept loop stopped by shutdown");
                    break;
                }
            };

            let conn = match accepted_conn {
                Ok(conn) => {
                    backoff.succeeded();
                    conn
                }
                Err(e) => {
                    let delay = backoff.failed();
                    tracing::warn!(
                        error = %e,
                        failures = backoff.failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Accept failed"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            if !self.admit(conn.peer().clone()).await {
                drop(conn);
                match listen.deny_policy {
                    DenyPolicy::Stop => {
                        tracing::warn!("Accept loop stopped after access denial");
                        break;
                    }
                    DenyPolicy::Skip => continue,
                }
            }

            accepted += 1;
            let id = ids.next_id();
            tracing::info!(conn_id = %id, peer_addr = %conn.peer(), "Connection accepted");

            if let Some(exec) = self.config.exec.clone() {
                tasks.spawn(async move {
                    let _permit = permit;
                    if let Err(e) = run_command(&exec, conn).await {
                        tracing::warn!(conn_id = %id, error = %e, "Command relay failed");
                    }
                });
                continue;
            }

            let (reader, writer) = conn.into_split();
            let writer: BoxedWriter = Box::new(writer);

            let stdin = if ctx.broker || self.config.misc.receive_only {
                None
            } else {
                self.stdin.take()
            };
            // the stdin target's writer stays out of the registry
            let stdin = match stdin {
                Some(input) => Some((input, writer)),
                None => {
                    registry.add(id, writer).await;
                    if !ctx.broker && !ctx.no_shutdown {
                        if let Err(e) = registry.close_write(id).await {
                            tracing::debug!(conn_id = %id, error = %e, "Half-close failed");
                        }
                    }
                    None
                }
            };

            tasks.spawn(relay_connection(ctx.clone(), id, Box::new(reader), stdin, permit));
        }

        while let Some(done) = tasks.join_next().await {
            log_task_exit(done);
        }
        tracing::info!(accepted, "Listener finished");
        Ok(())
    }
}

fn log_task_exit(done: Result<(), tokio::task::JoinError>) {
    if let Err(e) = done {
        tracing::error!(error = %e, "Relay task panicked");
    }
}

/// Body of one accepted connection: inbound relay plus, for the first
/// connection, the stdin copy. Always unregisters and closes on exit.
///
/// The connection that receives stdin owns its writer instead of registering it.
async fn relay_connection(
    ctx: Arc<RelayContext>,
    id: ConnectionId,
    reader: BoxedReader,
    stdin: Option<(BoxedReader, BoxedWriter)>,
    _permit: OwnedSemaphorePermit,
) {
    let (input, mut own_writer) = match stdin {
        Some((input, writer)) => (Some(input), Some(writer)),
        None => (None, None),
    };

    let inbound = relay_inbound(&ctx, id, reader);
    let outbound = async {
        match (input, own_writer.as_mut()) {
            (Some(input), Some(writer)) => relay_stdin(&ctx, input, writer).await,
            _ => Ok(()),
        }
    };

    let (inbound, outbound) = tokio::join!(inbound, outbound);
    if let Err(e) = inbound {
        tracing::warn!(conn_id = %id, error = %e, "Connection relay ended with error");
    }
    if let Err(e) = outbound {
        tracing::debug!(conn_id = %id, error = %e, "Stdin relay ended with error");
    }

    let writer = match own_writer {
        Some(writer) => Some(writer),
        None => ctx.registry.delete(id).await,
    };
    if let Some(mut writer) = writer {
        let _ = writer.shutdown().await;
    }
    tracing::info!(conn_id = %id, "Connection closed");
}

async fn relay_inbound(ctx: &RelayContext, id: ConnectionId, mut reader: BoxedReader) -> io::Result<()> {
    if ctx.broker {
        return relay_lines(ctx, id, reader).await;
    }
    if ctx.send_only {
        let mut buf = vec![0u8; 4096];
        while read_chunk(&mut reader, &mut buf, ctx.idle_timeout).await? > 0 {}
        return Ok(());
    }
    copy_to_output(&mut reader, &ctx.output, ctx.idle_timeout).await?;
    Ok(())
}

/// Broker mode: every line read from the peer goes to output and all other peers.
///
/// A line longer than [`MAX_LINE`] ends the connection with `InvalidData`.
async fn relay_lines(ctx: &RelayContext, id: ConnectionId, reader: BoxedReader) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let prefix = ctx.chat.then(|| format!("user<{}>: ", id.as_u64()));
    let mut line = Vec::new();

    loop {
        line.clear();
        let mut limited = (&mut reader).take(MAX_LINE as u64 + 1);
        let read = limited.read_until(b'\n', &mut line);
        let n = match ctx.idle_timeout {
            Some(idle) => tokio::time::timeout(idle, read)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))??,
            None => read.await?,
        };
        if n == 0 {
            return Ok(());
        }
        if line.len() > MAX_LINE && line.last() != Some(&b'\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {MAX_LINE} bytes"),
            ));
        }

        let message = frame_line(prefix.as_deref(), &line);
        ctx.registry.broadcast(&ctx.output, id, &message).await?;
    }
}

/// Build the broadcast message for one line: optional prefix, the line without
/// its `\n` or `\r\n` terminator, then a single `\n`.
fn frame_line(prefix: Option<&str>, line: &[u8]) -> Vec<u8> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let prefix = prefix.unwrap_or("").as_bytes();
    [prefix, line, b"\n"].concat()
}

async fn relay_stdin(ctx: &RelayContext, stdin: BoxedReader, writer: &mut BoxedWriter) -> io::Result<()> {
    let mut chunks = InputChunks::new(stdin, &ctx.eol, ctx.delay);
    while let Some(chunk) = chunks.next_chunk().await? {
        writer.write_all(&chunk).await?;
        writer.flush().await?;
    }
    if !ctx.no_shutdown {
        writer.shutdown().await?;
    }
    Ok(())
}
