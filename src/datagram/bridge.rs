//! Full-duplex relay between stdin/stdout and one datagram peer.
//!
//! # Responsibilities
//! - Learn the peer from the first admitted datagram (listen mode)
//! - Send stdin chunks to the peer while relaying received datagrams to output
//! - Stop the receive loop cooperatively when the input side finishes or fails

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::schema::Config;
use crate::error::{RelayError, RelayResult};
use crate::net::{DatagramSocket, PeerAddr};
use crate::relay::{BoxedReader, InputChunks, SharedOutput};
use crate::security::{AccessControl, ReverseResolver};

/// Largest chunk read from stdin or the socket at once.
pub const MAX_DATAGRAM: usize = 64 * 1024;

/// How often the receive loop re-checks the abort signal.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Which side of the exchange this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeMode {
    /// The socket is connected to its peer; stdin EOF ends the bridge.
    Connect,
    /// The peer is learned from the first admitted datagram; stdin EOF does not
    /// end the bridge.
    Listen,
}

/// Capacity-1 stop request from the input task to the receive loop.
///
/// Raising never blocks: a full slot already carries a pending stop, and a
/// closed slot means the receiver is gone.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    tx: mpsc::Sender<()>,
}

impl AbortSignal {
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    pub fn raise(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Per-run options taken from the configuration.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub idle_timeout: Option<Duration>,
    pub eol: String,
    pub delay: Option<Duration>,
    pub send_only: bool,
    pub receive_only: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            eol: "\n".to_string(),
            delay: None,
            send_only: false,
            receive_only: false,
        }
    }
}

impl BridgeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            idle_timeout: config.timing.idle_timeout(),
            eol: config.misc.eol.clone(),
            delay: config.timing.delay(),
            send_only: config.misc.send_only,
            receive_only: config.misc.receive_only,
        }
    }
}

/// Datagram relay.
pub struct DatagramBridge {
    access: Arc<AccessControl>,
    resolver: Arc<dyn ReverseResolver>,
    options: BridgeOptions,
}

impl DatagramBridge {
    pub fn new(
        access: Arc<AccessControl>,
        resolver: Arc<dyn ReverseResolver>,
        options: BridgeOptions,
    ) -> Self {
        Self {
            access,
            resolver,
            options,
        }
    }

    /// Bridge `stdin` and `output` with the socket's peer.
    ///
    /// Returns after both directions have finished. An input-side error wins
    /// over a receive-side error.
    pub async fn transfer(
        &self,
        output: SharedOutput,
        socket: DatagramSocket,
        mode: BridgeMode,
        stdin: BoxedReader,
    ) -> RelayResult<()> {
        let socket = Arc::new(socket);
        let peer = match mode {
            BridgeMode::Listen => Some(self.learn_peer(&socket, &output).await?),
            BridgeMode::Connect => None,
        };

        let (abort, mut abort_rx) = AbortSignal::channel();
        let input = tokio::spawn(pump_input(
            socket.clone(),
            peer.clone(),
            stdin,
            mode,
            abort,
            self.options.clone(),
        ));

        let received = self
            .relay_received(&socket, peer.as_ref(), &output, &mut abort_rx)
            .await;
        if received.is_err() {
            // a blocked stdin read cannot observe the failure on its own
            input.abort();
        }

        let sent = match input.await {
            Ok(res) => res,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(RelayError::Io(std::io::Error::other(e))),
        };
        sent.and(received)
    }

    /// Block until a datagram from an admitted sender arrives; that sender
    /// becomes the peer for the rest of the run.
    async fn learn_peer(&self, socket: &DatagramSocket, output: &SharedOutput) -> RelayResult<PeerAddr> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (n, from) = socket.recv_from(&mut buf).await?;
            if socket.is_udp() && !self.access.check(&from, self.resolver.as_ref()).await {
                tracing::debug!(peer_addr = %from, "Datagram from denied sender dropped");
                continue;
            }
            tracing::info!(peer_addr = %from, "Datagram peer learned");
            if !self.options.send_only {
                output.write_all(&buf[..n]).await?;
            }
            return Ok(from);
        }
    }

    async fn relay_received(
        &self,
        socket: &DatagramSocket,
        peer: Option<&PeerAddr>,
        output: &SharedOutput,
        abort: &mut mpsc::Receiver<()>,
    ) -> RelayResult<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let idle = self.options.idle_timeout;
        let mut last_activity = Instant::now();

        loop {
            // a disconnected slot only means the input task is done, not a stop
            if abort.try_recv().is_ok() {
                tracing::debug!("Datagram receive loop stopped");
                return Ok(());
            }

            let (n, from) = match tokio::time::timeout(POLL_INTERVAL, socket.recv_from(&mut buf)).await {
                Err(_) => {
                    if let Some(idle) = idle {
                        if last_activity.elapsed() >= idle {
                            return Err(RelayError::Io(std::io::Error::new(
                                std::io::ErrorKind::TimedOut,
                                "idle timeout",
                            )));
                        }
                    }
                    continue;
                }
                Ok(res) => res?,
            };

            if let Some(peer) = peer {
                if from != *peer {
                    tracing::debug!(peer_addr = %from, learned = %peer, "Datagram from unknown peer dropped");
                    continue;
                }
            }
            last_activity = Instant::now();

            if !self.options.send_only {
                output.write_all(&buf[..n]).await?;
            }
        }
    }
}

async fn pump_input(
    socket: Arc<DatagramSocket>,
    peer: Option<PeerAddr>,
    stdin: BoxedReader,
    mode: BridgeMode,
    abort: AbortSignal,
    options: BridgeOptions,
) -> RelayResult<()> {
    if options.receive_only {
        return Ok(());
    }

    let mut chunks = InputChunks::new(stdin, &options.eol, options.delay);
    loop {
        let chunk = match chunks.next_chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                if mode == BridgeMode::Connect {
                    abort.raise();
                }
                tracing::debug!(?mode, "Stdin finished");
                return Ok(());
            }
            Err(e) => {
                abort.raise();
                return Err(e.into());
            }
        };

        for part in chunk.chunks(MAX_DATAGRAM) {
            let sent = match &peer {
                Some(peer) => socket.send_to(part, peer).await,
                None => socket.send(part).await,
            };
            if let Err(e) = sent {
                abort.raise();
                return Err(e.into());
            }
        }
    }
}
