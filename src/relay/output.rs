//! The shared output sink.
//!
//! # Responsibilities
//! - Serialize writes from every relay task onto stdout
//! - Tee received bytes into a plain file when configured
//! - Render received bytes as a hex dump when configured

use std::fmt::Write as _;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::config::schema::OutputConfig;

/// Boxed reader used for stdin and connection read halves.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed writer used for stdout, tee files and connection write halves.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

const HEX_ROW: usize = 16;

/// Hex dump renderer with a running offset.
struct HexDump {
    sink: BoxedWriter,
    offset: u64,
}

impl HexDump {
    /// Render `data` as rows of 16 bytes: offset, hex bytes, ASCII gutter.
    fn render(&mut self, data: &[u8]) -> String {
        let mut out = String::new();
        for row in data.chunks(HEX_ROW) {
            let _ = write!(out, "{:08x}  ", self.offset);
            for i in 0..HEX_ROW {
                match row.get(i) {
                    Some(b) => {
                        let _ = write!(out, "{b:02x} ");
                    }
                    None => out.push_str("   "),
                }
                if i == 7 {
                    out.push(' ');
                }
            }
            out.push_str(" |");
            out.extend(row.iter().map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                }
            }));
            out.push_str("|\n");
            self.offset += row.len() as u64;
        }
        out
    }
}

struct OutputInner {
    primary: BoxedWriter,
    tee: Option<BoxedWriter>,
    hex: Option<HexDump>,
}

/// Cloneable handle to the process output.
///
/// Every write goes to the primary writer first, then to the tee and hex-dump
/// sinks, all under one lock so interleaved writers never split a chunk.
#[derive(Clone)]
pub struct SharedOutput {
    inner: Arc<Mutex<OutputInner>>,
}

impl SharedOutput {
    pub fn new(primary: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self::with_sinks(Box::new(primary), None, None)
    }

    pub fn with_sinks(
        primary: BoxedWriter,
        tee: Option<BoxedWriter>,
        hex_dump: Option<BoxedWriter>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OutputInner {
                primary,
                tee,
                hex: hex_dump.map(|sink| HexDump { sink, offset: 0 }),
            })),
        }
    }

    /// Wrap `primary` with the files named in the output configuration.
    pub async fn open(
        primary: impl AsyncWrite + Send + Unpin + 'static,
        config: &OutputConfig,
    ) -> io::Result<Self> {
        let tee = match &config.file {
            Some(path) => Some(open_sink(path, config.append).await?),
            None => None,
        };
        let hex = match &config.hex_dump {
            Some(path) => Some(open_sink(path, config.append).await?),
            None => None,
        };
        Ok(Self::with_sinks(Box::new(primary), tee, hex))
    }

    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.primary.write_all(buf).await?;
        inner.primary.flush().await?;
        if let Some(tee) = inner.tee.as_mut() {
            tee.write_all(buf).await?;
        }
        if let Some(hex) = inner.hex.as_mut() {
            let dump = hex.render(buf);
            hex.sink.write_all(dump.as_bytes()).await?;
        }
        Ok(())
    }

    pub async fn flush(&self) -> io::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.primary.flush().await?;
        if let Some(tee) = inner.tee.as_mut() {
            tee.flush().await?;
        }
        if let Some(hex) = inner.hex.as_mut() {
            hex.sink.flush().await?;
        }
        Ok(())
    }

    /// Flush everything and shut the primary writer down.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.flush().await?;
        let mut inner = self.inner.lock().await;
        inner.primary.shutdown().await
    }
}

async fn open_sink(path: &Path, append: bool) -> io::Result<BoxedWriter> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .await?;
    tracing::debug!(path = %path.display(), append, "Output file opened");
    Ok(Box::new(file))
}
