//! Learning Factory WebSocket bridge entry point.
//!
//! Browsers cannot open raw TCP sockets, so a browser-based Digital
//! Dashboard reaches the hub through this bridge.  Each WebSocket session
//! becomes one hub connection speaking the binary protocol.
//!
//! # Usage
//!
//! ```text
//! lf-web-bridge [OPTIONS]
//!
//! Options:
//!   --ws-port <PORT>              WebSocket listener port [default: 5561]
//!   --ws-bind <ADDR>              WebSocket bind address [default: 0.0.0.0]
//!   --hub-host <HOST>             Hub IP address [default: 127.0.0.1]
//!   --hub-port <PORT>             Hub TCP port [default: 5560]
//!   --heartbeat-interval <SECS>   Keepalive interval [default: 5]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                | Default     |
//! |-------------------------|-------------|
//! | `LF_WS_PORT`            | `5561`      |
//! | `LF_WS_BIND`            | `0.0.0.0`   |
//! | `LF_HUB_HOST`           | `127.0.0.1` |
//! | `LF_HUB_PORT`           | `5560`      |
//! | `LF_HEARTBEAT_INTERVAL` | `5`         |

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lf_web_bridge::domain::BridgeConfig;
use lf_web_bridge::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Learning Factory WebSocket bridge.
#[derive(Debug, Parser)]
#[command(
    name = "lf-web-bridge",
    about = "WebSocket bridge between browsers and the Learning Factory hub",
    version
)]
struct Cli {
    /// TCP port for the WebSocket server.
    #[arg(long, default_value_t = 5561, env = "LF_WS_PORT")]
    ws_port: u16,

    /// IP address to bind the WebSocket server to.
    #[arg(long, default_value = "0.0.0.0", env = "LF_WS_BIND")]
    ws_bind: String,

    /// IP address of the hub.
    #[arg(long, default_value = "127.0.0.1", env = "LF_HUB_HOST")]
    hub_host: String,

    /// TCP port of the hub.
    #[arg(long, default_value_t = 5560, env = "LF_HUB_PORT")]
    hub_port: u16,

    /// Seconds between keepalive heartbeats sent on each session's behalf.
    #[arg(long, default_value_t = 5, env = "LF_HEARTBEAT_INTERVAL")]
    heartbeat_interval: u64,
}

impl Cli {
    /// # Errors
    ///
    /// Returns an error if `--ws-bind` or `--hub-host` is not an IP address.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let ws_bind_addr: SocketAddr = format!("{}:{}", self.ws_bind, self.ws_port)
            .parse()
            .with_context(|| format!("invalid WebSocket bind address: '{}:{}'", self.ws_bind, self.ws_port))?;
        let hub_addr: SocketAddr = format!("{}:{}", self.hub_host, self.hub_port)
            .parse()
            .with_context(|| format!("invalid hub address: '{}:{}'", self.hub_host, self.hub_port))?;

        Ok(BridgeConfig {
            ws_bind_addr,
            hub_addr,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval.max(1)),
            ..BridgeConfig::default()
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Cli::parse().into_bridge_config()?;
    info!(
        "Learning Factory WebSocket bridge starting: ws={}, hub={}",
        config.ws_bind_addr, config.hub_addr
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl-C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl-C signal: {e}"),
        }
    });

    run_server(config, running).await?;

    info!("Learning Factory WebSocket bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
