//! Network infrastructure for the machine runtime.
//!
//! Handles the TCP connection to the hub and publishes telemetry on it.
//!
//! Architecture:
//! - `HubConnection` owns the write half of the hub socket and implements
//!   [`TelemetryPublisher`].
//! - A reconnect loop dials the hub, sends `Hello{Machine, name}`, and reads
//!   replies.  Hub events are forwarded on an `mpsc` channel.
//! - A heartbeat task keeps the connection inside the hub's liveness window
//!   while it is up.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use lf_core::protocol::messages::{DisconnectReason, ErrorMessage, HelloMessage, PublishMessage, HEADER_SIZE};
use lf_core::protocol::{encode_message_now, SequenceCounter};
use lf_core::{decode_message, ConnectionId, HubMessage, Payload, ProtocolError, Role, Topic};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{tcp::OwnedReadHalf, tcp::OwnedWriteHalf, TcpStream},
    sync::{mpsc, Mutex},
    time,
};
use tracing::{debug, error, info, warn};

use crate::application::publish_telemetry::{PublishError, TelemetryPublisher};

/// Errors that can occur on the hub connection.
#[derive(Debug, Error)]
pub enum HubConnectionError {
    #[error("not connected to the hub")]
    NotConnected,

    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<HubConnectionError> for PublishError {
    fn from(e: HubConnectionError) -> Self {
        match e {
            HubConnectionError::NotConnected => PublishError::NotConnected,
            other => PublishError::Transport(other.to_string()),
        }
    }
}

/// Configuration for one machine's hub connection.
#[derive(Debug, Clone)]
pub struct HubConnectionConfig {
    /// `host:port` of the hub.
    pub hub_addr: String,
    /// Identity sent in `Hello`; the machine's configured name.
    pub identity: String,
    /// How often to send a heartbeat while connected.
    pub heartbeat_interval: Duration,
    /// Wait between reconnect attempts.
    pub reconnect_interval: Duration,
}

impl Default for HubConnectionConfig {
    fn default() -> Self {
        Self {
            hub_addr: "127.0.0.1:5560".to_string(),
            identity: "machine".to_string(),
            heartbeat_interval: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(5),
        }
    }
}

/// Events emitted by the connection to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// The hub accepted the `Hello`.
    Admitted { connection_id: ConnectionId },
    /// The hub refused the `Hello`.
    Rejected { reason: String },
    /// A publication was accepted with this sequence number.
    Acked { sequence: u64 },
    /// The hub reported an error for one of our frames.
    Error(ErrorMessage),
    /// The hub closed the session.
    Disconnected { reason: Option<DisconnectReason> },
}

/// Manages the TCP connection from one machine interface to the hub.
pub struct HubConnection {
    config: HubConnectionConfig,
    write_half: Mutex<Option<OwnedWriteHalf>>,
    /// Set between `HelloAck{accepted}` and the end of the session.
    admitted: AtomicBool,
    sequence: SequenceCounter,
}

impl HubConnection {
    /// Creates a new (not yet connected) `HubConnection`.
    pub fn new(config: HubConnectionConfig) -> Self {
        Self {
            config,
            write_half: Mutex::new(None),
            admitted: AtomicBool::new(false),
            sequence: SequenceCounter::new(),
        }
    }

    pub fn is_admitted(&self) -> bool {
        self.admitted.load(Ordering::Acquire)
    }

    /// Starts the reconnect loop and returns the event channel.
    ///
    /// The loop runs until `running` is cleared or the receiver is dropped.
    pub fn start(self: Arc<Self>, running: Arc<AtomicBool>) -> mpsc::Receiver<HubEvent> {
        let (tx, rx) = mpsc::channel(128);

        tokio::spawn(async move {
            while running.load(Ordering::Relaxed) && !tx.is_closed() {
                match TcpStream::connect(&self.config.hub_addr).await {
                    Ok(stream) => {
                        info!(identity = %self.config.identity, "connected to hub at {}", self.config.hub_addr);
                        self.run_session(stream, &tx).await;
                        info!(
                            identity = %self.config.identity,
                            "disconnected from hub; reconnecting in {:?}",
                            self.config.reconnect_interval
                        );
                    }
                    Err(e) => {
                        warn!("could not connect to hub at {}: {e}", self.config.hub_addr);
                    }
                }

                if running.load(Ordering::Relaxed) {
                    time::sleep(self.config.reconnect_interval).await;
                }
            }
        });

        rx
    }

    async fn run_session(self: &Arc<Self>, stream: TcpStream, tx: &mpsc::Sender<HubEvent>) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed: {e}");
        }
        let (read_half, write_half) = stream.into_split();
        *self.write_half.lock().await = Some(write_half);

        let hello = HubMessage::Hello(HelloMessage {
            role: Role::Machine,
            identity: self.config.identity.clone(),
        });
        if let Err(e) = self.send_message(&hello).await {
            error!("failed to send hello: {e}");
            *self.write_half.lock().await = None;
            return;
        }

        let heartbeat = tokio::spawn(Arc::clone(self).heartbeat_loop());
        let reason = self.read_loop(read_half, tx).await;
        heartbeat.abort();

        self.admitted.store(false, Ordering::Release);
        *self.write_half.lock().await = None;
        let _ = tx.send(HubEvent::Disconnected { reason }).await;
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = time::interval(self.config.heartbeat_interval);
        let mut token = 0u64;
        loop {
            ticker.tick().await;
            if !self.is_admitted() {
                continue;
            }
            token = token.wrapping_add(1);
            if let Err(e) = self.send_message(&HubMessage::Heartbeat(token)).await {
                debug!("heartbeat failed: {e}");
                return;
            }
        }
    }

    /// Reads frames until the hub disconnects.  Returns the hub's reason if
    /// it sent one.
    async fn read_loop(&self, mut reader: OwnedReadHalf, tx: &mpsc::Sender<HubEvent>) -> Option<DisconnectReason> {
        loop {
            let mut header = [0u8; HEADER_SIZE];
            if let Err(e) = reader.read_exact(&mut header).await {
                if e.kind() != std::io::ErrorKind::UnexpectedEof {
                    error!("read error on hub connection: {e}");
                }
                return None;
            }

            // Payload length is at bytes 4..8 (big-endian u32)
            let payload_len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            if payload_len > lf_core::protocol::codec::MAX_FRAME_PAYLOAD {
                error!("hub sent an oversized frame ({payload_len} bytes)");
                return None;
            }
            let mut frame = header.to_vec();
            frame.resize(HEADER_SIZE + payload_len, 0);
            if let Err(e) = reader.read_exact(&mut frame[HEADER_SIZE..]).await {
                error!("read payload error: {e}");
                return None;
            }

            let msg = match decode_message(&frame) {
                Ok((msg, _)) => msg,
                Err(e) => {
                    warn!("failed to decode hub frame: {e}");
                    continue;
                }
            };

            let event = match msg {
                HubMessage::HelloAck(ack) if ack.accepted => {
                    self.admitted.store(true, Ordering::Release);
                    HubEvent::Admitted {
                        connection_id: ack.connection_id,
                    }
                }
                HubMessage::HelloAck(ack) => HubEvent::Rejected { reason: ack.reason },
                HubMessage::Ack { sequence } => HubEvent::Acked { sequence },
                HubMessage::Error(e) => HubEvent::Error(e),
                HubMessage::Disconnect { reason } => return Some(reason),
                HubMessage::HeartbeatAck(_) => continue,
                other => {
                    debug!("ignoring {:?} from hub", other.message_type());
                    continue;
                }
            };
            // A dropped receiver just means nobody is listening.
            let _ = tx.send(event).await;
        }
    }

    /// Encodes and sends one frame.
    ///
    /// # Errors
    ///
    /// [`HubConnectionError::NotConnected`] when there is no socket, or the
    /// encode / write error.
    pub async fn send_message(&self, msg: &HubMessage) -> Result<(), HubConnectionError> {
        let bytes = encode_message_now(msg, self.sequence.next())?;
        let mut guard = self.write_half.lock().await;
        let writer = guard.as_mut().ok_or(HubConnectionError::NotConnected)?;
        writer.write_all(&bytes).await?;
        Ok(())
    }

    /// Tells the hub we are leaving.  Best-effort.
    pub async fn disconnect(&self) {
        if self.is_admitted() {
            let msg = HubMessage::Disconnect {
                reason: DisconnectReason::ClientShutdown,
            };
            if let Err(e) = self.send_message(&msg).await {
                debug!("disconnect not sent: {e}");
            }
        }
    }
}

#[async_trait]
impl TelemetryPublisher for HubConnection {
    async fn publish(&self, topic: &Topic, payload: Payload) -> Result<(), PublishError> {
        if !self.is_admitted() {
            return Err(PublishError::NotConnected);
        }
        let msg = HubMessage::Publish(PublishMessage {
            topic: topic.as_str().to_owned(),
            payload,
        });
        Ok(self.send_message(&msg).await?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
