//! JSON message types for the browser-facing WebSocket protocol.
//!
//! The hub speaks a compact binary protocol (24-byte header + payload).
//! Browsers speak JSON naturally, so the bridge exposes a JSON shadow of the
//! binary messages.
//!
//! # Message flow
//!
//! ```text
//! Browser → Bridge:  JSON text frame  →  BrowserToHubMsg  →  HubMessage
//! Bridge  → Browser: HubMessage       →  HubToBrowserMsg  →  JSON text frame
//! ```
//!
//! # JSON discriminant
//!
//! Every message is a JSON object whose `"type"` field names the variant:
//!
//! ```json
//! {"type":"Subscribe","pattern":"machine.*"}
//! {"type":"Deliver","source":"…","topic":"machine.haas-vf2.status","sequence":7,
//!  "timestamp_us":1700000000000000,"kind":"telemetry","payload":{"spindle_speed":1200}}
//! ```
//!
//! Enumerations (`role`, `kind`, `code`, `reason`) use their snake_case
//! names, e.g. `"virtual_factory"` or `"simulation_tick"`.
//!
//! # Payloads
//!
//! Payload bodies are opaque bytes to the hub.  Towards the browser a body
//! that parses as JSON is sent as that JSON value; anything else becomes a
//! string (invalid UTF-8 replaced with U+FFFD).  From the browser, the
//! `payload` value is serialised back to JSON bytes.

use lf_core::protocol::messages::{DisconnectReason, ErrorCode};
use lf_core::{PayloadKind, Role};
use serde::{Deserialize, Serialize};

fn default_kind() -> PayloadKind {
    PayloadKind::Telemetry
}

// ── Browser → Hub messages ────────────────────────────────────────────────────

/// Everything a browser may send over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BrowserToHubMsg {
    /// Must be the first message of a session.
    Hello { role: Role, identity: String },

    Subscribe { pattern: String },

    Unsubscribe { pattern: String },

    /// `kind` defaults to `telemetry` when omitted.
    Publish {
        topic: String,
        #[serde(default = "default_kind")]
        kind: PayloadKind,
        payload: serde_json::Value,
    },

    Heartbeat { token: u64 },

    /// Graceful end of the session.
    Disconnect,
}

impl BrowserToHubMsg {
    /// Variant name for log lines; never includes field values.
    pub fn type_name(&self) -> &'static str {
        match self {
            BrowserToHubMsg::Hello { .. } => "Hello",
            BrowserToHubMsg::Subscribe { .. } => "Subscribe",
            BrowserToHubMsg::Unsubscribe { .. } => "Unsubscribe",
            BrowserToHubMsg::Publish { .. } => "Publish",
            BrowserToHubMsg::Heartbeat { .. } => "Heartbeat",
            BrowserToHubMsg::Disconnect => "Disconnect",
        }
    }
}

// ── Hub → Browser messages ────────────────────────────────────────────────────

/// Everything the bridge may send to a browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HubToBrowserMsg {
    /// Reply to `Hello`.  `connection_id` is the nil UUID when rejected.
    HelloAck {
        connection_id: String,
        accepted: bool,
        reason: String,
    },

    /// A publication matching one of the browser's subscriptions.
    Deliver {
        /// Connection id of the publisher.
        source: String,
        topic: String,
        sequence: u64,
        timestamp_us: u64,
        kind: PayloadKind,
        payload: serde_json::Value,
    },

    /// The browser's publish was accepted under this sequence number.
    Ack { sequence: u64 },

    HeartbeatAck { token: u64 },

    Error { code: ErrorCode, description: String },

    /// The hub ended the session.  The WebSocket closes right after.
    Disconnect { reason: DisconnectReason },
}
