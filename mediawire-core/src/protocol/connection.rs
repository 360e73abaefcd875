//! Frame-level connection wrapper with idle timeout

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::frame::{DEFAULT_MAX_FRAME_SIZE, read_frame, write_frame};
use super::{ProtocolError, ProtocolResult};

/// A byte stream speaking the Mediawire frame protocol.
///
/// Generic over any `AsyncRead + AsyncWrite` so the same session logic runs
/// on a `TcpStream`, an in-memory duplex pipe, or a scripted mock, under
/// either a multi-threaded or a current-thread runtime. Every frame read and
/// write is bounded by the idle timeout when one is configured.
pub struct FramedConnection<S> {
    stream: S,
    idle_timeout: Option<Duration>,
    max_frame_size: u32,
}

impl<S> FramedConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps a stream with no timeout and the default frame limit.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            idle_timeout: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Bounds every blocking frame read and write by `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Overrides the maximum accepted frame payload.
    pub fn with_max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Receives the next frame payload.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::IdleTimeout` - Nothing completed within the idle timeout
    /// - `ProtocolError::ConnectionClosed` - Peer closed mid-frame
    /// - `ProtocolError::FrameTooLarge` - Announced length above the limit
    pub async fn read_frame(&mut self) -> ProtocolResult<Bytes> {
        self.read_frame_within(self.idle_timeout).await
    }

    /// Receives the next frame payload, bounded by `limit` instead of the
    /// idle timeout. `None` waits indefinitely.
    ///
    /// # Errors
    ///
    /// Same as [`read_frame`](Self::read_frame), with `IdleTimeout` carrying
    /// `limit`.
    pub async fn read_frame_within(&mut self, limit: Option<Duration>) -> ProtocolResult<Bytes> {
        let max_frame_size = self.max_frame_size;
        match limit {
            Some(after) => {
                tokio::time::timeout(after, read_frame(&mut self.stream, max_frame_size))
                    .await
                    .map_err(|_| ProtocolError::IdleTimeout { after })?
            }
            None => read_frame(&mut self.stream, max_frame_size).await,
        }
    }

    /// Sends one complete frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::WriteTimeout` - Peer stopped draining the connection
    /// - `ProtocolError::Io` - Write failed or peer reset the connection
    pub async fn write_frame(&mut self, payload: &[u8]) -> ProtocolResult<()> {
        match self.idle_timeout {
            Some(after) => tokio::time::timeout(after, write_frame(&mut self.stream, payload))
                .await
                .map_err(|_| ProtocolError::WriteTimeout { after })?,
            None => write_frame(&mut self.stream, payload).await,
        }
    }

    /// Sends the zero-length frame that terminates a chunked transfer.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Io` - Write failed
    pub async fn write_terminator(&mut self) -> ProtocolResult<()> {
        self.write_frame(&[]).await
    }

    /// Flushes and shuts down the write half.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::WriteTimeout` - Flush did not complete within the idle timeout
    /// - `ProtocolError::Io` - Shutdown failed
    pub async fn shutdown(&mut self) -> ProtocolResult<()> {
        match self.idle_timeout {
            Some(after) => tokio::time::timeout(after, self.stream.shutdown())
                .await
                .map_err(|_| ProtocolError::WriteTimeout { after })??,
            None => self.stream.shutdown().await?,
        }
        Ok(())
    }

    /// Mutable access to the stream. Writing through it bypasses framing.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}
