//! WebSocket server: accept loop and per-session task management.
//!
//! For every browser connection:
//!
//! 1. Complete the WebSocket upgrade.
//! 2. Dial the hub (one TCP connection per session).
//! 3. Run the forwarding tasks until either side is done:
//!    - **Hub reader**: hub TCP → decoded `HubMessage`s on a channel.
//!    - **Hub → Browser**: channel → JSON text frames.
//!    - **Browser → Hub**: JSON text frames → binary frames.
//!    - **Keepalive**: heartbeats to the hub once the session is admitted.
//! 4. Close the WebSocket.
//!
//! The accept loop polls the `running` flag every 200 ms, so Ctrl-C stops new
//! sessions promptly.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use lf_core::protocol::messages::{DisconnectReason, ErrorCode};
use lf_core::HubMessage;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    WebSocketStream,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::{translate_browser_to_hub, translate_hub_to_browser, KEEPALIVE_TOKEN_BASE};
use crate::domain::config::BridgeConfig;
use crate::domain::messages::{BrowserToHubMsg, HubToBrowserMsg};
use crate::infrastructure::hub_conn::{read_hub_messages, HubConnection, HubWriter};

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the WebSocket listener.
///
/// # Errors
///
/// Returns an error if the address is in use or not permitted.
pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))?;
    info!("WebSocket bridge listening on {addr}");
    Ok(listener)
}

/// Accepts browser connections until `running` is cleared.
pub async fn serve(listener: TcpListener, config: Arc<BridgeConfig>, running: Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                info!("new browser connection from {peer_addr}");
                let cfg = Arc::clone(&config);
                tokio::spawn(async move {
                    handle_browser_session(stream, peer_addr, cfg).await;
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }
}

/// Binds `config.ws_bind_addr` and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(config: BridgeConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = bind(config.ws_bind_addr).await?;
    serve(listener, Arc::new(config), running).await;
    Ok(())
}

// ── Per-session handler ───────────────────────────────────────────────────────

async fn handle_browser_session(raw_stream: TcpStream, peer_addr: SocketAddr, config: Arc<BridgeConfig>) {
    match run_session(raw_stream, peer_addr, config).await {
        Ok(()) => info!("session {peer_addr} closed normally"),
        Err(e) => warn!("session {peer_addr} closed with error: {e:#}"),
    }
}

async fn run_session(raw_stream: TcpStream, peer_addr: SocketAddr, config: Arc<BridgeConfig>) -> anyhow::Result<()> {
    let ws_stream = accept_async(raw_stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;
    let session_id = Uuid::new_v4().to_string();
    info!(session = %session_id, "WebSocket session established with {peer_addr}");

    let (ws_tx, mut ws_rx) = ws_stream.split();
    let ws_tx = Arc::new(Mutex::new(ws_tx));

    let hub = match HubConnection::connect(config.hub_addr, config.connect_timeout).await {
        Ok(hub) => hub,
        Err(e) => {
            let farewell = HubToBrowserMsg::Disconnect {
                reason: DisconnectReason::TransportError,
            };
            send_json(&ws_tx, &farewell, &session_id).await;
            close_ws(&ws_tx).await;
            return Err(e).with_context(|| format!("session {session_id}"));
        }
    };
    info!(session = %session_id, "connected to hub at {}", config.hub_addr);

    let HubConnection { read_half, write_half } = hub;
    let writer = Arc::new(HubWriter::new(write_half, session_id.clone()));
    let admitted = Arc::new(AtomicBool::new(false));
    let (hub_tx, mut hub_rx) = mpsc::channel::<HubMessage>(128);

    // ── Task A: hub reader ────────────────────────────────────────────────────
    let sid = session_id.clone();
    let hub_reader_task = tokio::spawn(async move {
        read_hub_messages(read_half, &sid, hub_tx).await;
    });

    // ── Task B: hub → browser ─────────────────────────────────────────────────
    //
    // Ends once the reader has exited and every decoded message was forwarded.
    let sid = session_id.clone();
    let ws_tx_h2b = Arc::clone(&ws_tx);
    let admitted_h2b = Arc::clone(&admitted);
    let mut hub_to_browser_task = tokio::spawn(async move {
        while let Some(msg) = hub_rx.recv().await {
            if let HubMessage::HelloAck(ack) = &msg {
                admitted_h2b.store(ack.accepted, Ordering::Release);
            }
            let Some(json_msg) = translate_hub_to_browser(&msg) else {
                continue;
            };
            if !send_json(&ws_tx_h2b, &json_msg, &sid).await {
                break;
            }
        }
    });

    // ── Task C: browser → hub ─────────────────────────────────────────────────
    let sid = session_id.clone();
    let ws_tx_b2h = Arc::clone(&ws_tx);
    let writer_b2h = Arc::clone(&writer);
    let mut browser_to_hub_task = tokio::spawn(async move {
        loop {
            let ws_msg = match ws_rx.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) | None => {
                    debug!("session {sid}: browser stream ended");
                    break;
                }
                Some(Err(e)) => {
                    warn!("session {sid}: browser WebSocket error: {e}");
                    break;
                }
            };

            let text = match ws_msg {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => {
                    debug!("session {sid}: browser sent Close");
                    break;
                }
                WsMessage::Binary(_) => {
                    let reply = HubToBrowserMsg::Error {
                        code: ErrorCode::Validation,
                        description: "binary frames are not supported; send JSON text".into(),
                    };
                    send_json(&ws_tx_b2h, &reply, &sid).await;
                    continue;
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
            };

            let browser_msg: BrowserToHubMsg = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(e) => {
                    debug!("session {sid}: invalid JSON from browser: {e}");
                    let reply = HubToBrowserMsg::Error {
                        code: ErrorCode::Validation,
                        description: format!("invalid message: {e}"),
                    };
                    send_json(&ws_tx_b2h, &reply, &sid).await;
                    continue;
                }
            };
            debug!("session {sid}: browser → hub: {}", browser_msg.type_name());

            let hub_msg = match translate_browser_to_hub(&browser_msg) {
                Ok(m) => m,
                Err(e) => {
                    let reply = HubToBrowserMsg::Error {
                        code: ErrorCode::Validation,
                        description: e.to_string(),
                    };
                    send_json(&ws_tx_b2h, &reply, &sid).await;
                    continue;
                }
            };
            if let Err(e) = writer_b2h.send(&hub_msg).await {
                warn!("{e:#}");
                break;
            }
        }
    });

    // ── Task D: keepalive ─────────────────────────────────────────────────────
    let sid = session_id.clone();
    let writer_ping = Arc::clone(&writer);
    let admitted_ping = Arc::clone(&admitted);
    let heartbeat_interval = config.heartbeat_interval;
    let mut keepalive_task = tokio::spawn(async move {
        let mut ticker = interval(heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        let mut counter = 0u64;

        loop {
            ticker.tick().await;
            // Heartbeats before the HelloAck would be a protocol violation.
            if !admitted_ping.load(Ordering::Acquire) {
                continue;
            }
            counter = counter.wrapping_add(1);
            let token = KEEPALIVE_TOKEN_BASE | (counter & !KEEPALIVE_TOKEN_BASE);
            if let Err(e) = writer_ping.send(&HubMessage::Heartbeat(token)).await {
                debug!("session {sid}: keepalive failed: {e:#}");
                break;
            }
        }
    });

    // ── Wait for the session to end ───────────────────────────────────────────
    tokio::select! {
        _ = &mut hub_to_browser_task => debug!("session {session_id}: hub side finished"),
        _ = &mut browser_to_hub_task => debug!("session {session_id}: browser side finished"),
        _ = &mut keepalive_task => debug!("session {session_id}: keepalive finished"),
    }
    hub_reader_task.abort();
    hub_to_browser_task.abort();
    browser_to_hub_task.abort();
    keepalive_task.abort();

    close_ws(&ws_tx).await;
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Serialises `msg` and sends it as a text frame.  Returns `false` once the
/// browser is gone.
async fn send_json(ws_tx: &Mutex<WsSink>, msg: &HubToBrowserMsg, session_id: &str) -> bool {
    let text = match serde_json::to_string(msg) {
        Ok(text) => text,
        Err(e) => {
            error!("session {session_id}: JSON serialisation error: {e}");
            return true;
        }
    };
    if let Err(e) = ws_tx.lock().await.send(WsMessage::Text(text)).await {
        debug!("session {session_id}: WebSocket send failed: {e}");
        return false;
    }
    true
}

async fn close_ws(ws_tx: &Mutex<WsSink>) {
    if let Err(e) = ws_tx.lock().await.close().await {
        debug!("WebSocket close failed: {e}");
    }
}
