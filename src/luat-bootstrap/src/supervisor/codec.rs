//! `Content-Length` framing for the server's stdio channel.
//!
//! Each message is `Content-Length: N\r\n\r\n` followed by N bytes of JSON.
//! Other headers are accepted and ignored.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{BootstrapError, Result};

/// Upper bound on a single frame body.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

fn channel_error(message: impl Into<String>) -> BootstrapError {
    BootstrapError::Channel {
        message: message.into(),
    }
}

/// Reads frames from the server's stdout.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            line: String::new(),
        }
    }

    /// Next message, or `None` when the stream ends between frames.
    pub async fn next_message(&mut self) -> Result<Option<Value>> {
        let Some(length) = self.header_block().await? else {
            return Ok(None);
        };
        if length > MAX_FRAME_BYTES {
            return Err(channel_error(format!(
                "frame of {} bytes exceeds the {} byte limit",
                length, MAX_FRAME_BYTES
            )));
        }

        let mut body = vec![0u8; length];
        self.inner
            .read_exact(&mut body)
            .await
            .map_err(|e| channel_error(format!("truncated frame body: {}", e)))?;

        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| channel_error(format!("frame body is not JSON: {}", e)))
    }

    async fn header_block(&mut self) -> Result<Option<usize>> {
        let mut length = None;
        let mut started = false;

        loop {
            self.line.clear();
            let read = self
                .inner
                .read_line(&mut self.line)
                .await
                .map_err(|e| channel_error(format!("reading frame header: {}", e)))?;

            if read == 0 {
                if started {
                    return Err(channel_error("stream ended inside a frame header"));
                }
                return Ok(None);
            }
            started = true;

            let header = self.line.trim();
            if header.is_empty() {
                break;
            }

            let Some((name, value)) = header.split_once(':') else {
                continue;
            };
            if name.trim().eq_ignore_ascii_case("content-length") {
                let parsed = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| channel_error(format!("bad Content-Length: {}", value.trim())))?;
                length = Some(parsed);
            }
        }

        length
            .map(Some)
            .ok_or_else(|| channel_error("frame header without Content-Length"))
    }
}

/// Writes frames to the server's stdin.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Frame and flush one message.
    pub async fn send(&mut self, message: &Value) -> Result<()> {
        let body = serde_json::to_vec(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        let io = async {
            self.inner.write_all(header.as_bytes()).await?;
            self.inner.write_all(&body).await?;
            self.inner.flush().await
        };
        io.await
            .map_err(|e| channel_error(format!("writing frame: {}", e)))
    }

    /// Close the underlying writer.
    pub async fn close(mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| channel_error(format!("closing channel: {}", e)))
    }
}
