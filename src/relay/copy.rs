//! Chunked copies with an optional idle timeout.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::relay::output::SharedOutput;

const CHUNK_SIZE: usize = 32 * 1024;

/// Read once, retrying `Interrupted`, failing with `TimedOut` after `idle`.
pub async fn read_chunk<R>(reader: &mut R, buf: &mut [u8], idle: Option<Duration>) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    loop {
        let res = match idle {
            Some(idle) => tokio::time::timeout(idle, reader.read(buf))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))?,
            None => reader.read(buf).await,
        };
        match res {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Copy `reader` into the shared output until EOF. Returns bytes copied.
pub async fn copy_to_output<R>(
    reader: &mut R,
    output: &SharedOutput,
    idle: Option<Duration>,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = read_chunk(reader, &mut buf, idle).await?;
        if n == 0 {
            return Ok(total);
        }
        output.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}

/// Copy `reader` into `writer` until EOF. Returns bytes copied.
pub async fn copy_to_writer<R, W>(
    reader: &mut R,
    writer: &mut W,
    idle: Option<Duration>,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = read_chunk(reader, &mut buf, idle).await?;
        if n == 0 {
            writer.flush().await?;
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}
