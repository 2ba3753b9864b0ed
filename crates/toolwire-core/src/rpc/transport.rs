//! Line-framed byte transport to a single peer.
//!
//! The transport knows nothing about the protocol. The write side sends
//! pre-framed bytes as one unit; the read side yields complete lines and
//! reports end-of-stream as `Ok(None)`, distinct from any decoding failure.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::{Result, ToolwireError};

/// Write side of the transport.
pub struct LineWriter<W> {
    /// `None` once shut down; dropping the stream closes the peer's input.
    inner: Option<W>,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner: Some(inner) }
    }

    /// Write one already-framed message and flush it.
    ///
    /// Dropping the returned future mid-write leaves a partial line on the
    /// wire, so only a task that never gets cancelled should drive this.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| ToolwireError::disconnected("write side is closed"))?;
        inner.write_all(bytes).await?;
        inner.flush().await?;
        Ok(())
    }

    /// Close the write side, signalling EOF to the peer.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(mut inner) = self.inner.take() {
            inner.shutdown().await?;
        }
        Ok(())
    }
}

/// Read side of the transport.
pub struct LineReader<R> {
    inner: BufReader<R>,
    max_line_bytes: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R, max_line_bytes: usize) -> Self {
        Self {
            inner: BufReader::new(inner),
            max_line_bytes,
        }
    }

    /// Read the next complete line, without its terminator.
    ///
    /// Returns `Ok(None)` on end-of-stream, including when the stream closes
    /// in the middle of a line (the partial line is dropped). Invalid UTF-8
    /// is reported as `MalformedMessage`; the stream stays usable.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let limit = self.max_line_bytes as u64 + 1;
        let read = (&mut self.inner)
            .take(limit)
            .read_until(b'\n', &mut buf)
            .await?;

        if read == 0 {
            return Ok(None);
        }

        if buf.last() != Some(&b'\n') {
            if buf.len() > self.max_line_bytes {
                return Err(ToolwireError::LineTooLong {
                    limit: self.max_line_bytes,
                });
            }
            warn!(
                "Peer stream closed mid-line, dropping {} trailing bytes",
                buf.len()
            );
            return Ok(None);
        }

        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }

        String::from_utf8(buf)
            .map(Some)
            .map_err(|_| ToolwireError::malformed("line is not valid UTF-8"))
    }
}
