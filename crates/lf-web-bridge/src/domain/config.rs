//! Bridge configuration.
//!
//! Populated from CLI arguments in `main.rs`; the defaults suit a bridge
//! running next to the hub on one machine.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// All runtime configuration for the WebSocket bridge.
///
/// # Example
///
/// ```rust
/// use lf_web_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.ws_bind_addr.port(), 5561);
/// assert_eq!(cfg.hub_addr.port(), 5560);
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Where browsers connect (`ws://host:port`).
    pub ws_bind_addr: SocketAddr,

    /// The hub's TCP listener.
    pub hub_addr: SocketAddr,

    /// How often the bridge heartbeats the hub on the browser's behalf.
    ///
    /// Browsers throttle timers in background tabs, so the bridge keeps the
    /// session inside the hub's liveness window itself.  Browsers may still
    /// send their own `Heartbeat` messages.
    pub heartbeat_interval: Duration,

    /// Upper bound on dialling the hub for a new session.
    pub connect_timeout: Duration,
}

impl Default for BridgeConfig {
    /// | Field              | Default           |
    /// |--------------------|-------------------|
    /// | ws_bind_addr       | `0.0.0.0:5561`    |
    /// | hub_addr           | `127.0.0.1:5560`  |
    /// | heartbeat_interval | 5 seconds         |
    /// | connect_timeout    | 5 seconds         |
    fn default() -> Self {
        Self {
            ws_bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 5561)),
            hub_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 5560)),
            heartbeat_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}
