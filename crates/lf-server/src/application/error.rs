//! The aggregated error type returned by the hub facade.
//!
//! Each lower-level error converts into a [`HubError`] with `?`, and every
//! [`HubError`] maps onto a wire [`ErrorCode`] so a transport can report it to
//! the client verbatim.  None of these errors stops the hub: a failure is
//! always scoped to one message or one connection.

use std::time::Duration;

use lf_core::protocol::messages::ErrorCode;
use lf_core::{AuthorizationError, ConnectionId, EnvelopeError, HubMessage, ProtocolError, Role, TopicError};
use thiserror::Error;

use crate::application::dispatch::DispatchError;
use crate::application::registry::RegistryError;
use crate::application::router::RoutingError;
use crate::application::session::SessionError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    /// Malformed frame, topic, pattern, identity or oversized payload.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error("{role} identity '{identity}' is already connected")]
    DuplicateIdentity { role: Role, identity: String },

    #[error("handshake not completed within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    #[error("delivery failed: {0}")]
    DeliveryFailure(String),

    #[error(transparent)]
    RoutingCorruption(#[from] RoutingError),

    #[error("connection not found: {0}")]
    NotFound(ConnectionId),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl HubError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HubError::Validation(_) => ErrorCode::Validation,
            HubError::Authorization(_) => ErrorCode::Authorization,
            HubError::DuplicateIdentity { .. } => ErrorCode::DuplicateIdentity,
            HubError::HandshakeTimeout(_) => ErrorCode::HandshakeTimeout,
            HubError::HeartbeatTimeout => ErrorCode::HeartbeatTimeout,
            HubError::DeliveryFailure(_) => ErrorCode::DeliveryFailure,
            HubError::RoutingCorruption(_) => ErrorCode::RoutingCorruption,
            HubError::NotFound(_) => ErrorCode::NotFound,
            HubError::InvalidState(_) => ErrorCode::InvalidState,
        }
    }

    /// The ERROR frame a transport sends back to the client.
    pub fn to_message(&self) -> HubMessage {
        HubMessage::error(self.code(), self.to_string())
    }
}

impl From<RegistryError> for HubError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::DuplicateIdentity { role, identity } => {
                HubError::DuplicateIdentity { role, identity }
            }
            RegistryError::NotFound(id) => HubError::NotFound(id),
            e @ RegistryError::InvalidTransition { .. } => HubError::InvalidState(e.to_string()),
        }
    }
}

impl From<SessionError> for HubError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidIdentity(reason) => HubError::Validation(reason),
            SessionError::Registry(e) => e.into(),
            SessionError::HandshakeTimeout(d) => HubError::HandshakeTimeout(d),
        }
    }
}

impl From<EnvelopeError> for HubError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::Unauthorized(e) => HubError::Authorization(e),
            other => HubError::Validation(other.to_string()),
        }
    }
}

impl From<TopicError> for HubError {
    fn from(e: TopicError) -> Self {
        HubError::Validation(e.to_string())
    }
}

impl From<ProtocolError> for HubError {
    fn from(e: ProtocolError) -> Self {
        HubError::Validation(e.to_string())
    }
}

impl From<DispatchError> for HubError {
    fn from(e: DispatchError) -> Self {
        HubError::InvalidState(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use lf_core::protocol::messages::ErrorMessage;
    use lf_core::Action;

    use super::*;

    #[test]
    fn test_unauthorized_envelope_maps_to_authorization_code() {
        let err: HubError = EnvelopeError::Unauthorized(AuthorizationError {
            role: Role::Dashboard,
            action: Action::Publish,
            subject: "machine.line1.command".into(),
        })
        .into();

        assert_eq!(err.code(), ErrorCode::Authorization);
    }

    #[test]
    fn test_oversized_payload_maps_to_validation() {
        let err: HubError = EnvelopeError::PayloadTooLarge { size: 10, max: 4 }.into();
        assert_eq!(err.code(), ErrorCode::Validation);
    }

    #[test]
    fn test_duplicate_identity_survives_session_wrapping() {
        let err: HubError = SessionError::Registry(RegistryError::DuplicateIdentity {
            role: Role::Machine,
            identity: "lathe-1".into(),
        })
        .into();

        assert_eq!(
            err,
            HubError::DuplicateIdentity {
                role: Role::Machine,
                identity: "lathe-1".into()
            }
        );
    }

    #[test]
    fn test_to_message_carries_code_and_text() {
        let id = ConnectionId::new();
        let msg = HubError::NotFound(id).to_message();
        assert_eq!(
            msg,
            HubMessage::Error(ErrorMessage {
                code: ErrorCode::NotFound,
                description: format!("connection not found: {id}"),
            })
        );
    }
}
