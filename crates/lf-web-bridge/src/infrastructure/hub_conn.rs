//! TCP connection to the hub for one browser session.
//!
//! The hub treats the bridge as an ordinary client: each browser session
//! sends its own `Hello` and owns its own connection id.
//!
//! TCP is a stream, so a single `read()` may hold part of a frame or several
//! frames.  [`read_hub_messages`] buffers bytes and decodes complete frames
//! one at a time.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use lf_core::protocol::encode_message_now;
use lf_core::protocol::SequenceCounter;
use lf_core::{decode_message, HubMessage, ProtocolError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

/// The two halves of a freshly dialled hub connection.
pub struct HubConnection {
    pub read_half: OwnedReadHalf,
    pub write_half: OwnedWriteHalf,
}

impl HubConnection {
    /// Dials the hub.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is refused or not established
    /// within `connect_timeout`.
    pub async fn connect(hub_addr: SocketAddr, connect_timeout: Duration) -> anyhow::Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(hub_addr))
            .await
            .with_context(|| format!("timed out connecting to hub at {hub_addr}"))?
            .with_context(|| format!("failed to connect to hub at {hub_addr}"))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed: {e}");
        }
        let (read_half, write_half) = stream.into_split();
        Ok(Self { read_half, write_half })
    }
}

/// Write side shared by the browser forwarder and the keepalive task.
pub struct HubWriter {
    write_half: Mutex<OwnedWriteHalf>,
    sequence: SequenceCounter,
    session_id: String,
}

impl HubWriter {
    pub fn new(write_half: OwnedWriteHalf, session_id: impl Into<String>) -> Self {
        Self {
            write_half: Mutex::new(write_half),
            sequence: SequenceCounter::new(),
            session_id: session_id.into(),
        }
    }

    /// Encodes `msg` with the next sequence number and writes it.
    ///
    /// # Errors
    ///
    /// Encoding errors (an oversized payload) and write errors.
    pub async fn send(&self, msg: &HubMessage) -> anyhow::Result<()> {
        let bytes = encode_message_now(msg, self.sequence.next())
            .with_context(|| format!("session {}: encode {:?}", self.session_id, msg.message_type()))?;
        self.write_half
            .lock()
            .await
            .write_all(&bytes)
            .await
            .with_context(|| format!("session {}: write to hub failed", self.session_id))
    }
}

/// Reads hub frames and forwards each decoded message on `tx`.
///
/// Returns on EOF, on a read or decode error, or when the receiver is gone.
/// Dropping `tx` on return is what tells the forwarder the hub side is done.
pub async fn read_hub_messages(mut read_half: OwnedReadHalf, session_id: &str, tx: mpsc::Sender<HubMessage>) {
    let mut recv_buf: Vec<u8> = Vec::with_capacity(4096);
    let mut read_tmp = vec![0u8; 4096];

    loop {
        let n = match read_half.read(&mut read_tmp).await {
            Ok(0) => {
                debug!("session {session_id}: hub closed the connection");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("session {session_id}: read from hub failed: {e}");
                return;
            }
        };
        recv_buf.extend_from_slice(&read_tmp[..n]);

        // One read may carry several frames.
        loop {
            match decode_message(&recv_buf) {
                Ok((msg, consumed)) => {
                    recv_buf.drain(..consumed);
                    if tx.send(msg).await.is_err() {
                        debug!("session {session_id}: forwarder gone; reader exiting");
                        return;
                    }
                }
                Err(ProtocolError::InsufficientData { .. }) => break,
                Err(e) => {
                    warn!("session {session_id}: undecodable frame from hub: {e}");
                    return;
                }
            }
        }
    }
}
