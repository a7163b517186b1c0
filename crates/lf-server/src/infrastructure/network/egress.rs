//! Outbound links to passive peers.
//!
//! Some participants (a Virtual Factory simulation running on a lab PC, for
//! instance) listen for the hub instead of dialling it.  For each
//! `[[egress]]` entry the hub connects out, admits the peer under the
//! configured role and identity, subscribes it to the configured patterns
//! and then treats it like any other connection.  When the link drops it is
//! retried every `retry_interval_ms` until shutdown.
//!
//! A passive peer is not expected to send heartbeats, so the link records
//! them on its behalf at the hub's heartbeat interval.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use lf_core::protocol::messages::HelloAckMessage;
use lf_core::HubMessage;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::application::connection::CloseCause;
use crate::application::dispatch::DeliverySink;
use crate::application::hub::Hub;
use crate::infrastructure::network::framing::{FrameReader, FrameWriter};
use crate::infrastructure::network::tcp_server::{serve_session, StreamDeliverySink};
use crate::infrastructure::storage::config::EgressTarget;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Keeps one egress link up until `running` is cleared.
pub async fn run_egress_link(target: EgressTarget, hub: Hub, running: Arc<AtomicBool>) {
    let retry = Duration::from_millis(target.retry_interval_ms.max(1));

    while running.load(Ordering::Relaxed) {
        match connect_once(&target, &hub).await {
            Ok(()) => info!(identity = %target.identity, address = %target.address, "egress link closed"),
            Err(e) => warn!(identity = %target.identity, "egress link failed: {e:#}"),
        }

        let mut waited = Duration::ZERO;
        while waited < retry && running.load(Ordering::Relaxed) {
            let step = (retry - waited).min(Duration::from_millis(200));
            tokio::time::sleep(step).await;
            waited += step;
        }
    }
}

/// Dials the peer once and serves it until the link ends.
///
/// # Errors
///
/// Connection failures, rejected admission and a failed `HelloAck` write.
pub async fn connect_once(target: &EgressTarget, hub: &Hub) -> anyhow::Result<()> {
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&target.address))
        .await
        .with_context(|| format!("timed out connecting to {}", target.address))?
        .with_context(|| format!("failed to connect to {}", target.address))?;
    if let Err(e) = stream.set_nodelay(true) {
        warn!("set_nodelay failed: {e}");
    }
    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(FrameWriter::new(write_half));
    let sink = Arc::new(StreamDeliverySink::new(Arc::clone(&writer)));

    let id = hub
        .on_connect(Arc::clone(&sink) as Arc<dyn DeliverySink>, target.role, &target.identity)
        .await
        .with_context(|| format!("{} '{}' not admitted", target.role, target.identity))?;

    let ack = HubMessage::HelloAck(HelloAckMessage {
        connection_id: id,
        accepted: true,
        reason: String::new(),
    });
    if let Err(e) = writer.send(&ack).await {
        hub.on_disconnect(id, CloseCause::TransportError).await;
        return Err(e).context("sending hello ack");
    }

    for pattern in &target.subscribe {
        let subscribe = HubMessage::Subscribe {
            pattern: pattern.clone(),
        };
        if let Err(e) = hub.handle_message(id, subscribe).await {
            warn!(identity = %target.identity, %pattern, "egress subscription refused: {e}");
        }
    }

    info!(identity = %target.identity, address = %target.address, connection = %id, "egress link up");
    let keepalive = hub.config().session.heartbeat_interval;
    serve_session(hub, id, FrameReader::new(read_half), writer, sink, Some(keepalive)).await;
    Ok(())
}
