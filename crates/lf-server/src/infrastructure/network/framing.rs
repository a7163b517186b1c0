//! Frame-level reading and writing over any async byte stream.
//!
//! # Binary streaming protocol
//!
//! TCP is a *stream* protocol: a single `read()` call may return less than one
//! complete frame, or more than one.  [`FrameReader`] buffers incoming bytes
//! and uses [`lf_core::decode_message`] to extract complete messages one at a
//! time.  [`FrameWriter`] serialises concurrent senders (the reader task's
//! replies and the writer task's deliveries) behind one async mutex so frames
//! never interleave.
//!
//! Both are generic over `AsyncRead` / `AsyncWrite`, which lets the tests
//! drive them with `tokio::io::duplex` instead of real sockets.

use lf_core::protocol::SequenceCounter;
use lf_core::{decode_message, HubMessage, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream ended in the middle of a frame ({0} bytes buffered)")]
    Truncated(usize),
}

/// Decodes [`HubMessage`]s from a byte stream.
pub struct FrameReader<R> {
    inner: R,
    recv_buf: Vec<u8>,
    read_tmp: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            recv_buf: Vec::with_capacity(READ_CHUNK),
            read_tmp: vec![0u8; READ_CHUNK],
        }
    }

    /// Returns the next complete message, or `None` on a clean EOF.
    ///
    /// Cancel-safe: the only suspension point is the socket read, and bytes
    /// are moved into the buffer only after it completes.
    ///
    /// # Errors
    ///
    /// [`FrameError::Protocol`] for undecodable bytes, [`FrameError::Io`] for
    /// read failures and [`FrameError::Truncated`] for EOF mid-frame.
    pub async fn next_message(&mut self) -> Result<Option<HubMessage>, FrameError> {
        loop {
            match decode_message(&self.recv_buf) {
                Ok((msg, consumed)) => {
                    self.recv_buf.drain(..consumed);
                    return Ok(Some(msg));
                }
                Err(ProtocolError::InsufficientData { .. }) => {}
                Err(e) => return Err(e.into()),
            }

            let n = self.inner.read(&mut self.read_tmp).await?;
            if n == 0 {
                return if self.recv_buf.is_empty() {
                    Ok(None)
                } else {
                    Err(FrameError::Truncated(self.recv_buf.len()))
                };
            }
            self.recv_buf.extend_from_slice(&self.read_tmp[..n]);
        }
    }
}

/// Encodes and writes [`HubMessage`]s, one whole frame at a time.
pub struct FrameWriter<W> {
    inner: Mutex<W>,
    /// Header sequence numbers for outgoing frames.
    sequence: SequenceCounter,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: Mutex::new(inner),
            sequence: SequenceCounter::new(),
        }
    }

    /// # Errors
    ///
    /// [`FrameError::Protocol`] if the message is too large to encode and
    /// [`FrameError::Io`] if the write fails.
    pub async fn send(&self, msg: &HubMessage) -> Result<(), FrameError> {
        let bytes = lf_core::protocol::encode_message_now(msg, self.sequence.next())?;
        let mut inner = self.inner.lock().await;
        inner.write_all(&bytes).await?;
        inner.flush().await?;
        Ok(())
    }

    /// Half-closes the stream.  Errors are ignored: the peer may already be
    /// gone.
    pub async fn shutdown(&self) {
        let _ = self.inner.lock().await.shutdown().await;
    }
}
