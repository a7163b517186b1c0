//! lf-web-bridge library crate.
//!
//! Lets a browser take part in the Learning Factory as a Digital Dashboard
//! (or any other role) without speaking the binary hub protocol.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser (JSON over WebSocket)
//!         ↕
//! [lf-web-bridge]
//!   ├── domain/           JSON message enums, BridgeConfig
//!   ├── application/      Translation: JSON ↔ HubMessage
//!   └── infrastructure/
//!         ├── ws_server/  WebSocket accept loop (tokio-tungstenite)
//!         └── hub_conn/   TCP connection to the hub (lf-core codec)
//!         ↕
//! lf-server (binary protocol over TCP)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `lf-core` only.
//! - `infrastructure` depends on all other layers plus `tokio` and
//!   `tokio-tungstenite`.
//!
//! # For beginners: one hub connection per browser tab
//!
//! The hub identifies participants by their TCP connection.  Giving every
//! WebSocket session its own hub connection means each browser tab is a
//! separate participant with its own subscriptions, heartbeats and
//! connection id, exactly like a native client.

/// Domain layer: pure types (no I/O).
pub mod domain;

/// Application layer: message translation.
pub mod application;

/// Infrastructure layer: WebSocket server and hub TCP connection.
pub mod infrastructure;
