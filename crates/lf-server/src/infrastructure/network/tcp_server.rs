//! TCP transport: accept loop, per-connection session task and the
//! [`DeliverySink`] that writes DELIVER frames back to the socket.
//!
//! # One connection, two tasks
//!
//! ```text
//!            ┌──────── reader task (this module) ────────┐
//! socket ──► │ FrameReader ─► hub.handle_message ─► reply │ ──► FrameWriter ──► socket
//!            └────────────────────────────────────────────┘          ▲
//!            hub writer task ─► StreamDeliverySink::deliver ─────────┘
//! ```
//!
//! The reader task owns the read half.  The write half is shared between the
//! reader (for replies) and the hub's writer task (for deliveries) through a
//! [`FrameWriter`].  When the hub closes the connection it calls
//! [`DeliverySink::closed`], which sends a DISCONNECT frame and wakes the
//! reader task so it can drop the socket.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use lf_core::protocol::messages::{DisconnectReason, HelloAckMessage};
use lf_core::{ConnectionId, Envelope, HubMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::connection::CloseCause;
use crate::application::dispatch::{DeliveryOutcome, DeliverySink};
use crate::application::error::HubError;
use crate::application::hub::Hub;
use crate::infrastructure::network::framing::{FrameError, FrameReader, FrameWriter};

// ── Delivery sink ─────────────────────────────────────────────────────────────

/// Writes envelopes to a byte stream as DELIVER frames.
pub struct StreamDeliverySink<W> {
    writer: Arc<FrameWriter<W>>,
    shutdown: Notify,
}

/// The sink used for real sockets.
pub type TcpDeliverySink = StreamDeliverySink<tokio::net::tcp::OwnedWriteHalf>;

impl<W: AsyncWrite + Unpin + Send> StreamDeliverySink<W> {
    pub fn new(writer: Arc<FrameWriter<W>>) -> Self {
        Self {
            writer,
            shutdown: Notify::new(),
        }
    }

    /// Resolves once the hub has closed the connection.
    pub async fn closed_by_hub(&self) {
        self.shutdown.notified().await;
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> DeliverySink for StreamDeliverySink<W> {
    async fn deliver(&self, _connection: ConnectionId, envelope: &Envelope) -> DeliveryOutcome {
        match self.writer.send(&HubMessage::Deliver(envelope.clone())).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => DeliveryOutcome::Failed(e.to_string()),
        }
    }

    async fn closed(&self, connection: ConnectionId, cause: CloseCause) {
        if !matches!(cause, CloseCause::ClientGone | CloseCause::TransportError) {
            if let Some(e) = cause.client_error() {
                if let Err(send) = self.writer.send(&e.to_message()).await {
                    debug!(%connection, error = %send, "could not send close error");
                }
            }
            let reason = cause.disconnect_reason();
            if let Err(e) = self.writer.send(&HubMessage::Disconnect { reason }).await {
                debug!(%connection, error = %e, "could not send disconnect");
            }
        }
        self.writer.shutdown().await;
        self.shutdown.notify_one();
    }
}

// ── Session loop ──────────────────────────────────────────────────────────────

/// Pumps frames from `reader` into the hub until either side ends the
/// session.
///
/// `keepalive` makes the loop record activity on the connection's behalf at
/// that interval; egress links use it for peers that never send anything.
pub async fn serve_session<R, W>(
    hub: &Hub,
    id: ConnectionId,
    mut reader: FrameReader<R>,
    writer: Arc<FrameWriter<W>>,
    sink: Arc<StreamDeliverySink<W>>,
    keepalive: Option<Duration>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut keepalive_tick = keepalive.map(tokio::time::interval);
    let mut token = 0u64;

    loop {
        let next_tick = async {
            match keepalive_tick.as_mut() {
                Some(t) => {
                    t.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            frame = reader.next_message() => match frame {
                Ok(Some(message)) => match hub.handle_message(id, message).await {
                    Ok(ack) => {
                        if let Some(reply) = ack.reply() {
                            if let Err(e) = writer.send(&reply).await {
                                warn!(connection = %id, error = %e, "reply failed");
                                hub.on_disconnect(id, CloseCause::TransportError).await;
                                return;
                            }
                        }
                    }
                    Err(HubError::NotFound(_)) => return,
                    Err(e) => {
                        debug!(connection = %id, error = %e, "frame rejected");
                        if writer.send(&e.to_message()).await.is_err() {
                            hub.on_disconnect(id, CloseCause::TransportError).await;
                            return;
                        }
                    }
                },
                Ok(None) => {
                    hub.on_disconnect(id, CloseCause::ClientGone).await;
                    return;
                }
                Err(FrameError::Protocol(e)) => {
                    warn!(connection = %id, error = %e, "undecodable frame; closing");
                    let _ = writer.send(&HubError::from(e).to_message()).await;
                    hub.on_disconnect(id, CloseCause::ProtocolError).await;
                    return;
                }
                Err(e) => {
                    debug!(connection = %id, error = %e, "transport ended");
                    hub.on_disconnect(id, CloseCause::TransportError).await;
                    return;
                }
            },
            () = next_tick => {
                token = token.wrapping_add(1);
                if hub.handle_message(id, HubMessage::Heartbeat(token)).await.is_err() {
                    return;
                }
            }
            () = sink.closed_by_hub() => return,
        }
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// Binds the hub listener.
///
/// # Errors
///
/// Returns an error if the address is in use or not permitted.
pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind hub listener on {addr}"))
}

/// Accepts connections until `running` is cleared.
pub async fn serve(listener: TcpListener, hub: Hub, running: Arc<AtomicBool>) {
    if let Ok(addr) = listener.local_addr() {
        info!("hub listening on {addr}");
    }

    while running.load(Ordering::Relaxed) {
        // A short timeout lets the loop notice the shutdown flag.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                debug!("accepted {peer}");
                let hub = hub.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer, hub).await;
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }
    info!("accept loop stopped");
}

/// Binds `addr` and runs [`serve`].
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(addr: SocketAddr, hub: Hub, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = bind(addr).await?;
    serve(listener, hub, running).await;
    Ok(())
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, hub: Hub) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("{peer}: set_nodelay failed: {e}");
    }
    let (read_half, write_half) = stream.into_split();
    match run_connection(FrameReader::new(read_half), Arc::new(FrameWriter::new(write_half)), &hub).await {
        Ok(Some(id)) => info!("{peer}: session {id} ended"),
        Ok(None) => debug!("{peer}: closed before handshake"),
        Err(e) => warn!("{peer}: {e:#}"),
    }
}

/// Runs the handshake and then the session loop.  Returns the connection id
/// once admitted, or `None` if the peer left before saying `Hello`.
///
/// # Errors
///
/// Handshake timeouts, rejected handshakes and transport failures before
/// admission.
pub async fn run_connection<R, W>(
    mut reader: FrameReader<R>,
    writer: Arc<FrameWriter<W>>,
    hub: &Hub,
) -> anyhow::Result<Option<ConnectionId>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let first = match hub.await_handshake(reader.next_message()).await {
        Ok(frame) => frame.context("reading hello")?,
        Err(e) => {
            let _ = writer.send(&e.to_message()).await;
            let _ = writer
                .send(&HubMessage::Disconnect {
                    reason: DisconnectReason::HandshakeTimeout,
                })
                .await;
            writer.shutdown().await;
            return Err(e.into());
        }
    };
    let Some(first) = first else {
        return Ok(None);
    };

    let HubMessage::Hello(hello) = first else {
        let e = HubError::Validation(format!("expected Hello, got {:?}", first.message_type()));
        let _ = writer.send(&e.to_message()).await;
        writer.shutdown().await;
        return Err(e.into());
    };

    let sink = Arc::new(StreamDeliverySink::new(Arc::clone(&writer)));
    let id = match hub
        .on_connect(Arc::clone(&sink) as Arc<dyn DeliverySink>, hello.role, &hello.identity)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            let _ = writer
                .send(&HubMessage::HelloAck(HelloAckMessage {
                    connection_id: ConnectionId::nil(),
                    accepted: false,
                    reason: e.to_string(),
                }))
                .await;
            writer.shutdown().await;
            return Err(e).with_context(|| format!("{} '{}' rejected", hello.role, hello.identity));
        }
    };

    writer
        .send(&HubMessage::HelloAck(HelloAckMessage {
            connection_id: id,
            accepted: true,
            reason: String::new(),
        }))
        .await
        .context("sending hello ack")?;

    serve_session(hub, id, reader, writer, sink, None).await;
    Ok(Some(id))
}

#[cfg(test)]
mod tests {
    use lf_core::protocol::messages::HelloMessage;
    use lf_core::{AllowAll, Role};

    use super::*;
    use crate::application::hub::HubConfig;

    fn hello(role: Role, identity: &str) -> HubMessage {
        HubMessage::Hello(HelloMessage {
            role,
            identity: identity.into(),
        })
    }

    #[tokio::test]
    async fn test_hello_is_acknowledged_with_connection_id() {
        // Arrange
        let hub = Hub::new(HubConfig::default(), Arc::new(AllowAll));
        let (client, server) = tokio::io::duplex(4096);
        let (server_r, server_w) = tokio::io::split(server);
        let (client_r, client_w) = tokio::io::split(client);
        let client_writer = FrameWriter::new(client_w);
        let mut client_reader = FrameReader::new(client_r);
        let task = {
            let hub = hub.clone();
            tokio::spawn(async move {
                run_connection(FrameReader::new(server_r), Arc::new(FrameWriter::new(server_w)), &hub).await
            })
        };

        // Act
        client_writer.send(&hello(Role::Dashboard, "wall")).await.expect("send");
        let ack = client_reader.next_message().await.expect("read");

        // Assert
        let Some(HubMessage::HelloAck(ack)) = ack else {
            panic!("expected HelloAck, got {ack:?}");
        };
        assert!(ack.accepted);
        assert_eq!(hub.connections(None).await.len(), 1);

        client_writer.shutdown().await;
        let ended = task.await.expect("join").expect("session");
        assert_eq!(ended, Some(ack.connection_id));
        assert!(hub.connections(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_close_sends_error_then_disconnect() {
        // Arrange
        let (client, server) = tokio::io::duplex(4096);
        let (_server_r, server_w) = tokio::io::split(server);
        let (client_r, _client_w) = tokio::io::split(client);
        let mut client_reader = FrameReader::new(client_r);
        let sink = StreamDeliverySink::new(Arc::new(FrameWriter::new(server_w)));

        // Act
        sink.closed(ConnectionId::new(), CloseCause::HeartbeatTimeout).await;

        // Assert
        let first = client_reader.next_message().await.expect("read");
        let second = client_reader.next_message().await.expect("read");
        assert_eq!(first, Some(HubError::HeartbeatTimeout.to_message()));
        assert_eq!(
            second,
            Some(HubMessage::Disconnect {
                reason: DisconnectReason::HeartbeatTimeout
            })
        );
    }

    #[tokio::test]
    async fn test_first_frame_other_than_hello_is_rejected() {
        let hub = Hub::new(HubConfig::default(), Arc::new(AllowAll));
        let (client, server) = tokio::io::duplex(4096);
        let (server_r, server_w) = tokio::io::split(server);
        let (client_r, client_w) = tokio::io::split(client);
        let client_writer = FrameWriter::new(client_w);
        let mut client_reader = FrameReader::new(client_r);

        client_writer.send(&HubMessage::Heartbeat(1)).await.expect("send");
        let result = run_connection(FrameReader::new(server_r), Arc::new(FrameWriter::new(server_w)), &hub).await;
        let reply = client_reader.next_message().await.expect("read");

        assert!(result.is_err());
        assert!(matches!(reply, Some(HubMessage::Error(_))));
        assert!(hub.connections(None).await.is_empty());
    }
}
