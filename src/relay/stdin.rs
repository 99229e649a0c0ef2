//! Standard input handling.
//!
//! # Responsibilities
//! - Hand stdin to exactly one consumer per run ([`RunOnce`])
//! - Rewrite line endings and pace lines when configured ([`InputChunks`])

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

const CHUNK_SIZE: usize = 64 * 1024;

/// Single-fire slot: the first `take` gets the value, every later call gets `None`.
#[derive(Debug)]
pub struct RunOnce<T> {
    fired: AtomicBool,
    value: Mutex<Option<T>>,
}

impl<T> RunOnce<T> {
    pub fn new(value: T) -> Self {
        Self {
            fired: AtomicBool::new(false),
            value: Mutex::new(Some(value)),
        }
    }

    pub fn take(&self) -> Option<T> {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        self.value.lock().ok()?.take()
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// Reads stdin as chunks ready to send.
///
/// With the default `\n` line ending and no delay, chunks are raw reads.
/// Otherwise input is read line by line, the trailing `\n` is replaced by the
/// configured ending and every line after the first is preceded by the delay.
/// A final line without `\n` is passed through unchanged.
pub struct InputChunks<R> {
    reader: BufReader<R>,
    eol: Vec<u8>,
    delay: Option<Duration>,
    started: bool,
}

impl<R: AsyncRead + Unpin> InputChunks<R> {
    pub fn new(reader: R, eol: &str, delay: Option<Duration>) -> Self {
        Self {
            reader: BufReader::new(reader),
            eol: eol.as_bytes().to_vec(),
            delay,
            started: false,
        }
    }

    fn line_mode(&self) -> bool {
        self.eol != b"\n" || self.delay.is_some()
    }

    /// Next chunk, or `None` at end of input.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        if !self.line_mode() {
            let mut buf = vec![0u8; CHUNK_SIZE];
            let n = loop {
                match self.reader.read(&mut buf).await {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            };
            if n == 0 {
                return Ok(None);
            }
            buf.truncate(n);
            return Ok(Some(buf));
        }

        if self.started {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
        }
        self.started = true;

        let mut line = Vec::new();
        if self.reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(None);
        }
        if line.last() == Some(&b'\n') {
            line.pop();
            line.extend_from_slice(&self.eol);
        }
        Ok(Some(line))
    }
}

/// Copy `reader` to `writer` through [`InputChunks`]. Returns bytes written.
pub async fn copy_lines<R, W>(
    reader: R,
    writer: &mut W,
    eol: &str,
    delay: Option<Duration>,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut chunks = InputChunks::new(reader, eol, delay);
    let mut total = 0u64;
    while let Some(chunk) = chunks.next_chunk().await? {
        writer.write_all(&chunk).await?;
        writer.flush().await?;
        total += chunk.len() as u64;
    }
    Ok(total)
}
