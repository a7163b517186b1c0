//! Binary codec for encoding and decoding hub protocol messages.
//!
//! Wire format:
//! ```text
//! [version:1][msg_type:1][reserved:2][payload_len:4][seq:8][timestamp_us:8][payload:N]
//! ```
//! Total header size: 24 bytes. All multi-byte integers are big-endian.
//! Strings are a u16 length followed by UTF-8 bytes; payload bodies are a
//! kind byte, a u32 length and the raw bytes.
//!
//! The header `seq` is a per-link frame counter.  It is distinct from the
//! per-source envelope sequence carried inside a DELIVER payload.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use uuid::Uuid;

use crate::domain::role::{ConnectionId, Role};
use crate::domain::topic::Topic;
use crate::protocol::envelope::{Envelope, Payload, PayloadKind};
use crate::protocol::messages::{
    DisconnectReason, ErrorCode, ErrorMessage, HelloAckMessage, HelloMessage, HubMessage,
    MessageType, PublishMessage, HEADER_SIZE, PROTOCOL_VERSION,
};

/// Largest payload a single frame may declare.  Guards the streaming
/// reader against buffering unbounded garbage.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// Not enough bytes for a complete frame yet.  Streaming readers treat
    /// this as "read more", never as a failure.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte in the header is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The payload could not be parsed (field value out of range, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A length field inside the payload points past the end of the frame.
    #[error("payload length mismatch: field says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// The header declares a payload larger than [`MAX_FRAME_PAYLOAD`].
    #[error("frame payload of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`HubMessage`] into a byte vector including the 24-byte header.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the encoded payload would not
/// be accepted by a peer's decoder.
///
/// # Examples
///
/// ```rust
/// use lf_core::protocol::{encode_message, decode_message, HubMessage};
///
/// let msg = HubMessage::Heartbeat(42);
/// let bytes = encode_message(&msg, 0, 0).unwrap();
/// let (decoded, consumed) = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, msg);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_message(
    msg: &HubMessage,
    sequence_number: u64,
    timestamp_us: u64,
) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(msg);
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(msg.message_type() as u8);
    buf.extend_from_slice(&[0x00, 0x00]); // reserved
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&sequence_number.to_be_bytes());
    buf.extend_from_slice(&timestamp_us.to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Encodes a [`HubMessage`] using the current system time as the timestamp.
///
/// # Errors
///
/// See [`encode_message`].
pub fn encode_message_now(msg: &HubMessage, sequence_number: u64) -> Result<Vec<u8>, ProtocolError> {
    let timestamp_us = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    encode_message(msg, sequence_number, timestamp_us)
}

/// Decodes one [`HubMessage`] from the beginning of `bytes`.
///
/// Returns the decoded message and the total number of bytes consumed
/// (header + payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] while the frame is still
/// incomplete (header or payload), and any other variant if the bytes are
/// malformed.
pub fn decode_message(bytes: &[u8]) -> Result<(HubMessage, usize), ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let msg_type_byte = bytes[1];
    let msg_type = MessageType::try_from(msg_type_byte)
        .map_err(|_| ProtocolError::UnknownMessageType(msg_type_byte))?;

    let payload_len = read_u32(bytes, 4)? as usize;
    if payload_len > MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::FrameTooLarge(payload_len));
    }

    let total_needed = HEADER_SIZE + payload_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::InsufficientData {
            needed: total_needed,
            available: bytes.len(),
        });
    }

    let msg = decode_payload(msg_type, &bytes[HEADER_SIZE..total_needed])?;
    Ok((msg, total_needed))
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(msg: &HubMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    match msg {
        HubMessage::Hello(m) => {
            buf.push(m.role as u8);
            write_length_prefixed_string(&mut buf, &m.identity);
        }
        HubMessage::HelloAck(m) => {
            buf.extend_from_slice(m.connection_id.as_uuid().as_bytes());
            buf.push(u8::from(m.accepted));
            write_length_prefixed_string(&mut buf, &m.reason);
        }
        HubMessage::Heartbeat(token) | HubMessage::HeartbeatAck(token) => {
            buf.extend_from_slice(&token.to_be_bytes());
        }
        HubMessage::Disconnect { reason } => buf.push(*reason as u8),
        HubMessage::Error(m) => {
            buf.push(m.code as u8);
            write_length_prefixed_string(&mut buf, &m.description);
        }
        HubMessage::Subscribe { pattern } | HubMessage::Unsubscribe { pattern } => {
            write_length_prefixed_string(&mut buf, pattern);
        }
        HubMessage::Publish(m) => {
            write_length_prefixed_string(&mut buf, &m.topic);
            write_payload(&mut buf, &m.payload);
        }
        HubMessage::Ack { sequence } => buf.extend_from_slice(&sequence.to_be_bytes()),
        HubMessage::Deliver(env) => {
            buf.extend_from_slice(env.source().as_uuid().as_bytes());
            buf.extend_from_slice(&env.sequence().to_be_bytes());
            buf.extend_from_slice(&env.timestamp_us().to_be_bytes());
            write_length_prefixed_string(&mut buf, env.topic().as_str());
            write_payload(&mut buf, env.payload());
        }
    }
    buf
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(msg_type: MessageType, p: &[u8]) -> Result<HubMessage, ProtocolError> {
    match msg_type {
        MessageType::Hello => {
            require_len(p, 3, "Hello")?;
            let role = Role::try_from(p[0])
                .map_err(|_| ProtocolError::MalformedPayload(format!("unknown role: {}", p[0])))?;
            let (identity, _) = read_length_prefixed_string(p, 1)?;
            Ok(HubMessage::Hello(HelloMessage { role, identity }))
        }
        MessageType::HelloAck => {
            // 16 (uuid) + 1 (accepted) + 2 (reason_len) + reason
            require_len(p, 19, "HelloAck")?;
            let connection_id = ConnectionId::from_uuid(read_uuid(p, 0)?);
            let accepted = p[16] != 0;
            let (reason, _) = read_length_prefixed_string(p, 17)?;
            Ok(HubMessage::HelloAck(HelloAckMessage {
                connection_id,
                accepted,
                reason,
            }))
        }
        MessageType::Heartbeat => Ok(HubMessage::Heartbeat(read_u64(p, 0)?)),
        MessageType::HeartbeatAck => Ok(HubMessage::HeartbeatAck(read_u64(p, 0)?)),
        MessageType::Disconnect => {
            require_len(p, 1, "Disconnect")?;
            let reason = DisconnectReason::try_from(p[0]).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown disconnect reason: {}", p[0]))
            })?;
            Ok(HubMessage::Disconnect { reason })
        }
        MessageType::Error => {
            require_len(p, 3, "Error")?;
            let code = ErrorCode::try_from(p[0])
                .map_err(|_| ProtocolError::MalformedPayload(format!("unknown error code: {}", p[0])))?;
            let (description, _) = read_length_prefixed_string(p, 1)?;
            Ok(HubMessage::Error(ErrorMessage { code, description }))
        }
        MessageType::Subscribe => {
            let (pattern, _) = read_length_prefixed_string(p, 0)?;
            Ok(HubMessage::Subscribe { pattern })
        }
        MessageType::Unsubscribe => {
            let (pattern, _) = read_length_prefixed_string(p, 0)?;
            Ok(HubMessage::Unsubscribe { pattern })
        }
        MessageType::Publish => {
            let (topic, topic_end) = read_length_prefixed_string(p, 0)?;
            let (payload, _) = read_payload(p, topic_end)?;
            Ok(HubMessage::Publish(PublishMessage { topic, payload }))
        }
        MessageType::Ack => Ok(HubMessage::Ack {
            sequence: read_u64(p, 0)?,
        }),
        MessageType::Deliver => decode_deliver(p).map(HubMessage::Deliver),
    }
}

fn decode_deliver(p: &[u8]) -> Result<Envelope, ProtocolError> {
    // 16 (source) + 8 (seq) + 8 (timestamp) + 2 (topic_len) + topic + payload
    require_len(p, 34, "Deliver")?;
    let source = ConnectionId::from_uuid(read_uuid(p, 0)?);
    let sequence = read_u64(p, 16)?;
    let timestamp_us = read_u64(p, 24)?;
    let (raw_topic, topic_end) = read_length_prefixed_string(p, 32)?;
    let topic = Topic::parse(&raw_topic)
        .map_err(|e| ProtocolError::MalformedPayload(format!("Deliver.topic: {e}")))?;
    let (payload, _) = read_payload(p, topic_end)?;
    Ok(Envelope::from_parts(source, topic, payload, timestamp_us, sequence))
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    buf.get(offset..offset + 4)
        .and_then(|s| <[u8; 4]>::try_from(s).ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| {
            ProtocolError::MalformedPayload(format!(
                "need 4 bytes for u32 at offset {offset}, got {}",
                buf.len().saturating_sub(offset)
            ))
        })
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    buf.get(offset..offset + 8)
        .and_then(|s| <[u8; 8]>::try_from(s).ok())
        .map(u64::from_be_bytes)
        .ok_or_else(|| {
            ProtocolError::MalformedPayload(format!(
                "need 8 bytes for u64 at offset {offset}, got {}",
                buf.len().saturating_sub(offset)
            ))
        })
}

fn read_uuid(buf: &[u8], offset: usize) -> Result<Uuid, ProtocolError> {
    buf.get(offset..offset + 16)
        .and_then(|s| <[u8; 16]>::try_from(s).ok())
        .map(Uuid::from_bytes)
        .ok_or_else(|| {
            ProtocolError::MalformedPayload(format!(
                "need 16 bytes for UUID at offset {offset}, got {}",
                buf.len().saturating_sub(offset)
            ))
        })
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
///
/// Strings longer than `u16::MAX` bytes are truncated at the last character
/// boundary that fits.
fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) {
    let mut len = s.len().min(u16::MAX as usize);
    while !s.is_char_boundary(len) {
        len -= 1;
    }
    buf.extend_from_slice(&(len as u16).to_be_bytes());
    buf.extend_from_slice(&s.as_bytes()[..len]);
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    let len_bytes = buf.get(offset..offset + 2).ok_or_else(|| {
        ProtocolError::MalformedPayload(format!("need 2 bytes for string length at offset {offset}"))
    })?;
    let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let start = offset + 2;
    let raw = buf.get(start..start + len).ok_or(ProtocolError::PayloadLengthMismatch {
        declared: len,
        available: buf.len().saturating_sub(start),
    })?;
    let s = std::str::from_utf8(raw)
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

fn write_payload(buf: &mut Vec<u8>, payload: &Payload) {
    buf.push(payload.kind as u8);
    buf.extend_from_slice(&(payload.body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload.body);
}

/// Reads a kind byte, a u32 length and the body.
fn read_payload(buf: &[u8], offset: usize) -> Result<(Payload, usize), ProtocolError> {
    let kind_byte = *buf.get(offset).ok_or_else(|| {
        ProtocolError::MalformedPayload(format!("need payload kind at offset {offset}"))
    })?;
    let kind = PayloadKind::try_from(kind_byte)
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown payload kind: {kind_byte}")))?;
    let len = read_u32(buf, offset + 1)? as usize;
    let start = offset + 5;
    let body = buf.get(start..start + len).ok_or(ProtocolError::PayloadLengthMismatch {
        declared: len,
        available: buf.len().saturating_sub(start),
    })?;
    Ok((Payload::new(kind, body.to_vec()), start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
