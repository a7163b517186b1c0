//! Protocol translation between the browser and the hub.
//!
//! ```text
//! Browser → Hub:  BrowserToHubMsg → HubMessage       translate_browser_to_hub()
//! Hub → Browser:  HubMessage      → HubToBrowserMsg  translate_hub_to_browser()
//! ```
//!
//! Both directions are pure functions, tested without any network.

use lf_core::protocol::messages::{DisconnectReason, HelloAckMessage, HelloMessage, PublishMessage};
use lf_core::{HubMessage, Payload};
use thiserror::Error;

use crate::domain::messages::{BrowserToHubMsg, HubToBrowserMsg};

/// Heartbeat tokens at or above this value belong to the bridge's own
/// keepalive; their acks are not forwarded to the browser.
pub const KEEPALIVE_TOKEN_BASE: u64 = 1 << 63;

// ── Error type ────────────────────────────────────────────────────────────────

/// Browser input the bridge cannot turn into a hub message.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("payload could not be encoded: {0}")]
    Payload(#[from] serde_json::Error),
}

// ── Browser → Hub ─────────────────────────────────────────────────────────────

/// Translates a browser message into the hub message to forward.
///
/// Topic and pattern strings are passed through untouched; the hub validates
/// them and answers with an `Error` if they are malformed.
///
/// # Errors
///
/// [`BridgeError::Payload`] if the payload value cannot be serialised.
///
/// # Example
///
/// ```rust
/// use lf_web_bridge::application::translate_browser_to_hub;
/// use lf_web_bridge::domain::BrowserToHubMsg;
///
/// let msg = BrowserToHubMsg::Subscribe { pattern: "machine.*".into() };
/// let hub = translate_browser_to_hub(&msg).unwrap();
/// assert!(matches!(hub, lf_core::HubMessage::Subscribe { .. }));
/// ```
pub fn translate_browser_to_hub(msg: &BrowserToHubMsg) -> Result<HubMessage, BridgeError> {
    Ok(match msg {
        BrowserToHubMsg::Hello { role, identity } => HubMessage::Hello(HelloMessage {
            role: *role,
            identity: identity.clone(),
        }),
        BrowserToHubMsg::Subscribe { pattern } => HubMessage::Subscribe {
            pattern: pattern.clone(),
        },
        BrowserToHubMsg::Unsubscribe { pattern } => HubMessage::Unsubscribe {
            pattern: pattern.clone(),
        },
        BrowserToHubMsg::Publish { topic, kind, payload } => HubMessage::Publish(PublishMessage {
            topic: topic.clone(),
            payload: Payload::new(*kind, serde_json::to_vec(payload)?),
        }),
        BrowserToHubMsg::Heartbeat { token } => HubMessage::Heartbeat(*token),
        BrowserToHubMsg::Disconnect => HubMessage::Disconnect {
            reason: DisconnectReason::ClientShutdown,
        },
    })
}

// ── Hub → Browser ─────────────────────────────────────────────────────────────

/// Translates a hub message into the JSON message for the browser.
///
/// Returns `None` for messages a hub never sends to a client (`Hello`,
/// `Publish`…) and for acks of the bridge's own keepalive heartbeats.
pub fn translate_hub_to_browser(msg: &HubMessage) -> Option<HubToBrowserMsg> {
    match msg {
        HubMessage::HelloAck(HelloAckMessage {
            connection_id,
            accepted,
            reason,
        }) => Some(HubToBrowserMsg::HelloAck {
            connection_id: connection_id.to_string(),
            accepted: *accepted,
            reason: reason.clone(),
        }),
        HubMessage::Deliver(envelope) => Some(HubToBrowserMsg::Deliver {
            source: envelope.source().to_string(),
            topic: envelope.topic().as_str().to_owned(),
            sequence: envelope.sequence(),
            timestamp_us: envelope.timestamp_us(),
            kind: envelope.payload().kind,
            payload: body_to_json(&envelope.payload().body),
        }),
        HubMessage::Ack { sequence } => Some(HubToBrowserMsg::Ack { sequence: *sequence }),
        HubMessage::HeartbeatAck(token) if *token >= KEEPALIVE_TOKEN_BASE => None,
        HubMessage::HeartbeatAck(token) => Some(HubToBrowserMsg::HeartbeatAck { token: *token }),
        HubMessage::Error(e) => Some(HubToBrowserMsg::Error {
            code: e.code,
            description: e.description.clone(),
        }),
        HubMessage::Disconnect { reason } => Some(HubToBrowserMsg::Disconnect { reason: *reason }),
        HubMessage::Hello(_)
        | HubMessage::Heartbeat(_)
        | HubMessage::Subscribe { .. }
        | HubMessage::Unsubscribe { .. }
        | HubMessage::Publish(_) => None,
    }
}

/// A payload body as JSON: parsed if it is JSON, otherwise a lossy string.
pub fn body_to_json(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(body).into_owned()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use lf_core::protocol::messages::{ErrorCode, ErrorMessage};
    use lf_core::{ConnectionId, Envelope, PayloadKind, Role, Topic};
    use serde_json::json;

    use super::*;

    fn deliver(body: &[u8]) -> HubMessage {
        HubMessage::Deliver(Envelope::from_parts(
            ConnectionId::new(),
            Topic::parse("machine.haas-vf2.status").expect("topic"),
            Payload::telemetry(body.to_vec()),
            1_700_000_000_000_000,
            42,
        ))
    }

    // ── Browser → Hub ─────────────────────────────────────────────────────────

    #[test]
    fn test_hello_keeps_role_and_identity() {
        // Arrange
        let msg = BrowserToHubMsg::Hello {
            role: Role::Dashboard,
            identity: "wall".into(),
        };

        // Act
        let hub = translate_browser_to_hub(&msg).expect("translate");

        // Assert
        assert_eq!(
            hub,
            HubMessage::Hello(HelloMessage {
                role: Role::Dashboard,
                identity: "wall".into()
            })
        );
    }

    #[test]
    fn test_publish_payload_becomes_json_bytes() {
        let msg = BrowserToHubMsg::Publish {
            topic: "vf.line1.command".into(),
            kind: PayloadKind::Command,
            payload: json!({"start": true}),
        };

        let hub = translate_browser_to_hub(&msg).expect("translate");

        let HubMessage::Publish(publish) = hub else {
            panic!("expected Publish");
        };
        assert_eq!(publish.topic, "vf.line1.command");
        assert_eq!(publish.payload.kind, PayloadKind::Command);
        assert_eq!(publish.payload.body, br#"{"start":true}"#.to_vec());
    }

    #[test]
    fn test_disconnect_is_client_shutdown() {
        let hub = translate_browser_to_hub(&BrowserToHubMsg::Disconnect).expect("translate");
        assert_eq!(
            hub,
            HubMessage::Disconnect {
                reason: DisconnectReason::ClientShutdown
            }
        );
    }

    #[test]
    fn test_malformed_pattern_is_forwarded_for_the_hub_to_judge() {
        let msg = BrowserToHubMsg::Subscribe { pattern: "a..b".into() };
        let hub = translate_browser_to_hub(&msg).expect("translate");
        assert_eq!(hub, HubMessage::Subscribe { pattern: "a..b".into() });
    }

    // ── Hub → Browser ─────────────────────────────────────────────────────────

    #[test]
    fn test_deliver_with_json_body_carries_json_value() {
        let browser = translate_hub_to_browser(&deliver(br#"{"spindle_speed":1200}"#)).expect("forwarded");

        let HubToBrowserMsg::Deliver {
            topic,
            sequence,
            kind,
            payload,
            ..
        } = browser
        else {
            panic!("expected Deliver");
        };
        assert_eq!(topic, "machine.haas-vf2.status");
        assert_eq!(sequence, 42);
        assert_eq!(kind, PayloadKind::Telemetry);
        assert_eq!(payload, json!({"spindle_speed": 1200}));
    }

    #[test]
    fn test_non_json_body_falls_back_to_lossy_string() {
        assert_eq!(body_to_json(b"spindle ok"), json!("spindle ok"));
        assert_eq!(body_to_json(&[0x66, 0xFF, 0x6F]), json!("f\u{FFFD}o"));
    }

    #[test]
    fn test_keepalive_acks_are_swallowed() {
        assert_eq!(translate_hub_to_browser(&HubMessage::HeartbeatAck(KEEPALIVE_TOKEN_BASE + 3)), None);
        assert_eq!(
            translate_hub_to_browser(&HubMessage::HeartbeatAck(3)),
            Some(HubToBrowserMsg::HeartbeatAck { token: 3 })
        );
    }

    #[test]
    fn test_error_and_disconnect_are_forwarded() {
        let error = HubMessage::Error(ErrorMessage {
            code: ErrorCode::Validation,
            description: "empty segment".into(),
        });
        let disconnect = HubMessage::Disconnect {
            reason: DisconnectReason::ServerShutdown,
        };

        assert!(matches!(
            translate_hub_to_browser(&error),
            Some(HubToBrowserMsg::Error { code: ErrorCode::Validation, .. })
        ));
        assert_eq!(
            translate_hub_to_browser(&disconnect),
            Some(HubToBrowserMsg::Disconnect {
                reason: DisconnectReason::ServerShutdown
            })
        );
    }

    #[test]
    fn test_rejected_hello_ack_carries_reason() {
        let ack = HubMessage::HelloAck(HelloAckMessage {
            connection_id: ConnectionId::nil(),
            accepted: false,
            reason: "identity taken".into(),
        });

        let browser = translate_hub_to_browser(&ack).expect("forwarded");

        assert_eq!(
            browser,
            HubToBrowserMsg::HelloAck {
                connection_id: "00000000-0000-0000-0000-000000000000".into(),
                accepted: false,
                reason: "identity taken".into(),
            }
        );
    }

    #[test]
    fn test_client_only_messages_are_not_forwarded() {
        assert_eq!(translate_hub_to_browser(&HubMessage::Heartbeat(1)), None);
        assert_eq!(translate_hub_to_browser(&HubMessage::Subscribe { pattern: "x".into() }), None);
    }
}
