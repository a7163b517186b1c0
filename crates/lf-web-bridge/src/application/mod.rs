//! Application layer for lf-web-bridge: translation between the browser's
//! JSON messages and binary hub messages.  No sockets, no tasks.

pub mod bridge_service;

pub use bridge_service::{
    body_to_json, translate_browser_to_hub, translate_hub_to_browser, BridgeError, KEEPALIVE_TOKEN_BASE,
};
