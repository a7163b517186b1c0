//! All Learning Factory hub protocol message types.
//!
//! Every frame on the wire is a 24-byte header followed by one of the
//! payloads below (see [`crate::protocol::codec`] for the byte layout).
//!
//! A typical session looks like this:
//!
//! ```text
//! client                              hub
//!   | -- Hello{role, identity} -------> |
//!   | <------- HelloAck{id, accepted} - |
//!   | -- Subscribe{"line1.*"} --------> |
//!   | -- Publish{topic, payload} -----> |
//!   | <------------ Ack{sequence} ----- |
//!   | <------- Deliver(envelope) ------ |
//!   | -- Heartbeat(token) ------------> |
//!   | <------- HeartbeatAck(token) ---- |
//!   | -- Disconnect{reason} ----------> |
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::role::{ConnectionId, Role};
use crate::protocol::envelope::{Envelope, Payload};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the common message header in bytes.
pub const HEADER_SIZE: usize = 24;

// ── Message type codes ────────────────────────────────────────────────────────

/// Message type codes carried in the second header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Session control (0x01–0x0F)
    Hello = 0x01,
    HelloAck = 0x02,
    Heartbeat = 0x03,
    HeartbeatAck = 0x04,
    Disconnect = 0x05,
    Error = 0x06,
    // Routing (0x10–0x1F)
    Subscribe = 0x10,
    Unsubscribe = 0x11,
    Publish = 0x12,
    Ack = 0x13,
    Deliver = 0x14,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::Hello),
            0x02 => Ok(MessageType::HelloAck),
            0x03 => Ok(MessageType::Heartbeat),
            0x04 => Ok(MessageType::HeartbeatAck),
            0x05 => Ok(MessageType::Disconnect),
            0x06 => Ok(MessageType::Error),
            0x10 => Ok(MessageType::Subscribe),
            0x11 => Ok(MessageType::Unsubscribe),
            0x12 => Ok(MessageType::Publish),
            0x13 => Ok(MessageType::Ack),
            0x14 => Ok(MessageType::Deliver),
            _ => Err(()),
        }
    }
}

// ── Per-message payload structs ───────────────────────────────────────────────

/// HELLO (0x01): first frame a client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub role: Role,
    /// Declared identity, e.g. the machine name `haas-vf2`.
    pub identity: String,
}

/// HELLO_ACK (0x02): the hub's answer to [`HelloMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloAckMessage {
    /// Assigned id; nil when `accepted` is false.
    pub connection_id: ConnectionId,
    pub accepted: bool,
    /// Human-readable rejection reason; empty when accepted.
    pub reason: String,
}

/// PUBLISH (0x12): raw publish request; the topic is validated by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishMessage {
    pub topic: String,
    pub payload: Payload,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DisconnectReason {
    ClientShutdown = 0x01,
    ServerShutdown = 0x02,
    HeartbeatTimeout = 0x03,
    HandshakeTimeout = 0x04,
    PolicyViolation = 0x05,
    ForceClosed = 0x06,
    ProtocolError = 0x07,
    TransportError = 0x08,
}

impl TryFrom<u8> for DisconnectReason {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(DisconnectReason::ClientShutdown),
            0x02 => Ok(DisconnectReason::ServerShutdown),
            0x03 => Ok(DisconnectReason::HeartbeatTimeout),
            0x04 => Ok(DisconnectReason::HandshakeTimeout),
            0x05 => Ok(DisconnectReason::PolicyViolation),
            0x06 => Ok(DisconnectReason::ForceClosed),
            0x07 => Ok(DisconnectReason::ProtocolError),
            0x08 => Ok(DisconnectReason::TransportError),
            _ => Err(()),
        }
    }
}

/// Error categories reported to a client in an ERROR frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ErrorCode {
    Validation = 0x01,
    Authorization = 0x02,
    DuplicateIdentity = 0x03,
    HandshakeTimeout = 0x04,
    HeartbeatTimeout = 0x05,
    DeliveryFailure = 0x06,
    RoutingCorruption = 0x07,
    NotFound = 0x08,
    InvalidState = 0x09,
}

impl TryFrom<u8> for ErrorCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(ErrorCode::Validation),
            0x02 => Ok(ErrorCode::Authorization),
            0x03 => Ok(ErrorCode::DuplicateIdentity),
            0x04 => Ok(ErrorCode::HandshakeTimeout),
            0x05 => Ok(ErrorCode::HeartbeatTimeout),
            0x06 => Ok(ErrorCode::DeliveryFailure),
            0x07 => Ok(ErrorCode::RoutingCorruption),
            0x08 => Ok(ErrorCode::NotFound),
            0x09 => Ok(ErrorCode::InvalidState),
            _ => Err(()),
        }
    }
}

/// ERROR (0x06): a request was rejected; the session stays open unless a
/// DISCONNECT follows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: ErrorCode,
    pub description: String,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// Every message that can travel between a client and the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubMessage {
    Hello(HelloMessage),
    HelloAck(HelloAckMessage),
    Heartbeat(u64),
    HeartbeatAck(u64),
    Disconnect { reason: DisconnectReason },
    Error(ErrorMessage),
    Subscribe { pattern: String },
    Unsubscribe { pattern: String },
    Publish(PublishMessage),
    /// Acknowledges an accepted publish with the sequence number it was given.
    Ack { sequence: u64 },
    Deliver(Envelope),
}

impl HubMessage {
    /// Returns the [`MessageType`] discriminant for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            HubMessage::Hello(_) => MessageType::Hello,
            HubMessage::HelloAck(_) => MessageType::HelloAck,
            HubMessage::Heartbeat(_) => MessageType::Heartbeat,
            HubMessage::HeartbeatAck(_) => MessageType::HeartbeatAck,
            HubMessage::Disconnect { .. } => MessageType::Disconnect,
            HubMessage::Error(_) => MessageType::Error,
            HubMessage::Subscribe { .. } => MessageType::Subscribe,
            HubMessage::Unsubscribe { .. } => MessageType::Unsubscribe,
            HubMessage::Publish(_) => MessageType::Publish,
            HubMessage::Ack { .. } => MessageType::Ack,
            HubMessage::Deliver(_) => MessageType::Deliver,
        }
    }

    /// Convenience constructor for an ERROR frame.
    pub fn error(code: ErrorCode, description: impl Into<String>) -> Self {
        HubMessage::Error(ErrorMessage {
            code,
            description: description.into(),
        })
    }
}
