//! Table of live accepted connections.
//!
//! # Responsibilities
//! - Own the write half of every registered connection
//! - Fan broadcast messages out to every peer except the sender
//! - Half-close a single connection's write side
//!
//! # Design Decisions
//! - One lock guards the whole table; every method holds it for exactly one call
//! - Broadcast holds the lock across its peer writes so membership cannot change
//!   mid-delivery
//! - Removed writers are handed back so they are shut down outside the lock

use std::collections::HashMap;
use std::io;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::net::ConnectionId;
use crate::relay::{BoxedWriter, SharedOutput};

/// Lock-guarded map of `ConnectionId` to connection write half.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, BoxedWriter>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, id: ConnectionId, writer: BoxedWriter) {
        self.connections.lock().await.insert(id, writer);
        tracing::debug!(conn_id = %id, "Connection added to registry");
    }

    /// Remove a connection, returning its writer for the caller to close.
    pub async fn delete(&self, id: ConnectionId) -> Option<BoxedWriter> {
        let removed = self.connections.lock().await.remove(&id);
        if removed.is_some() {
            tracing::debug!(conn_id = %id, "Connection removed from registry");
        }
        removed
    }

    /// Write `message` to `output`, then to every connection but `sender`.
    ///
    /// Output failures are logged and delivery continues to the peers. The
    /// first failing peer write is logged and ends delivery for this call.
    pub async fn broadcast(
        &self,
        output: &SharedOutput,
        sender: ConnectionId,
        message: &[u8],
    ) -> io::Result<()> {
        let mut connections = self.connections.lock().await;
        if let Err(e) = output.write_all(message).await {
            tracing::warn!(sender = %sender, error = %e, "Broadcast to output failed");
        }

        for (id, writer) in connections.iter_mut() {
            if *id == sender {
                continue;
            }
            let delivered = async {
                writer.write_all(message).await?;
                writer.flush().await
            }
            .await;
            if let Err(e) = delivered {
                tracing::warn!(
                    conn_id = %id,
                    sender = %sender,
                    error = %e,
                    "Broadcast delivery failed"
                );
                break;
            }
        }
        Ok(())
    }

    /// Half-close one connection's write side.
    pub async fn close_write(&self, id: ConnectionId) -> io::Result<()> {
        let mut connections = self.connections.lock().await;
        let writer = connections
            .get_mut(&id)
            .ok_or_else(|| not_registered(id))?;
        writer.shutdown().await
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().await.contains_key(&id)
    }
}

fn not_registered(id: ConnectionId) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("{id} is not registered"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ConnectionIdAllocator;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream};

    struct BrokenWriter;

    impl AsyncWrite for BrokenWriter {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")))
        }
        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn try_read(rx: &mut (impl AsyncRead + Unpin)) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; 64];
        match tokio::time::timeout(std::time::Duration::from_millis(50), rx.read(&mut buf)).await {
            Ok(Ok(n)) => Some(buf[..n].to_vec()),
            _ => None,
        }
    }

    fn peer() -> (BoxedWriter, DuplexStream) {
        let (writer, rx) = tokio::io::duplex(256);
        (Box::new(writer), rx)
    }

    #[tokio::test]
    async fn broadcast_skips_sender() {
        let ids = ConnectionIdAllocator::new();
        let registry = ConnectionRegistry::new();
        let (a, b, c) = (ids.next_id(), ids.next_id(), ids.next_id());
        let (wa, mut ra) = peer();
        let (wb, mut rb) = peer();
        let (wc, mut rc) = peer();
        registry.add(a, wa).await;
        registry.add(b, wb).await;
        registry.add(c, wc).await;

        let (out, mut out_rx) = tokio::io::duplex(256);
        let output = SharedOutput::new(out);
        registry.broadcast(&output, a, b"hello\n").await.unwrap();

        assert_eq!(try_read(&mut out_rx).await.unwrap(), b"hello\n");
        assert_eq!(try_read(&mut rb).await.unwrap(), b"hello\n");
        assert_eq!(try_read(&mut rc).await.unwrap(), b"hello\n");
        assert_eq!(try_read(&mut ra).await, None);
    }

    #[tokio::test]
    async fn broken_peer_does_not_fail_broadcast() {
        let ids = ConnectionIdAllocator::new();
        let registry = ConnectionRegistry::new();
        let sender = ids.next_id();
        let (ws, _rs) = peer();
        registry.add(sender, ws).await;
        registry.add(ids.next_id(), Box::new(BrokenWriter)).await;

        let output = SharedOutput::new(tokio::io::sink());
        assert!(registry.broadcast(&output, sender, b"x").await.is_ok());
    }

    #[tokio::test]
    async fn failed_output_still_reaches_peers() {
        let ids = ConnectionIdAllocator::new();
        let registry = ConnectionRegistry::new();
        let (a, b) = (ids.next_id(), ids.next_id());
        let (wa, _ra) = peer();
        let (wb, mut rb) = peer();
        registry.add(a, wa).await;
        registry.add(b, wb).await;

        let output = SharedOutput::new(BrokenWriter);
        registry.broadcast(&output, a, b"hello\n").await.unwrap();
        assert_eq!(try_read(&mut rb).await.unwrap(), b"hello\n");
    }

    #[tokio::test]
    async fn add_delete_and_half_close() {
        let ids = ConnectionIdAllocator::new();
        let registry = ConnectionRegistry::new();
        let id = ids.next_id();
        let (w, mut r) = peer();

        registry.add(id, w).await;
        assert!(registry.contains(id).await);
        assert_eq!(registry.len().await, 1);

        registry.close_write(id).await.unwrap();
        assert_eq!(try_read(&mut r).await.unwrap(), b"");

        assert!(registry.delete(id).await.is_some());
        assert!(registry.is_empty().await);
        assert!(registry.delete(id).await.is_none());

        let err = registry.close_write(id).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
