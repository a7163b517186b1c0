//! Infrastructure layer for lf-web-bridge.
//!
//! Accepts browser WebSocket connections and opens one TCP connection to the
//! hub per session.  Translation lives in the application layer.

pub mod hub_conn;
pub mod ws_server;

pub use ws_server::run_server;
