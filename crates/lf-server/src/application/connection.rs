//! The per-connection record shared by the registry, the session manager and
//! the dispatch engine.
//!
//! # Connection lifecycle (for beginners)
//!
//! ```text
//! Connecting ──► Active ──► Draining ──► Closed
//!     │            │                       ▲
//!     └────────────┴───────────────────────┘
//! ```
//!
//! - `Connecting`: registered, handshake not yet complete.
//! - `Active`: handshake accepted; publishes and subscribes are served.
//! - `Draining`: the client asked to leave; queued outbound messages are
//!   still delivered but new inbound frames are refused.
//! - `Closed`: terminal.  The connection is removed from the router and the
//!   registry right after entering this state.

use std::fmt;
use std::sync::Arc;

use lf_core::protocol::messages::DisconnectReason;
use lf_core::protocol::SequenceCounter;
use lf_core::{ConnectionId, Role};
use tokio::time::Instant;

use crate::application::dispatch::DeliverySink;
use crate::application::error::HubError;
use crate::application::queue::OutboundQueue;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Active,
    Draining,
    Closed,
}

impl ConnectionState {
    /// Returns `true` if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Active)
                | (Connecting, Closed)
                | (Active, Draining)
                | (Active, Closed)
                | (Draining, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Active => "active",
            ConnectionState::Draining => "draining",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// The transport reported EOF or the client vanished.
    ClientGone,
    /// A read or write on the transport failed.
    TransportError,
    /// Nothing was heard within the liveness window.
    HeartbeatTimeout,
    /// Too many authorization violations.
    PolicyViolation,
    /// An operator closed it through the admin surface.
    ForceClosed,
    /// The client sent bytes that could not be decoded.
    ProtocolError,
    /// Graceful drain finished with an empty queue.
    Drained,
    /// Graceful drain ran out of time.
    DrainDeadline,
    /// The hub is shutting down.
    Shutdown,
}

impl CloseCause {
    /// Wire reason sent to the client, if it is still reachable.
    pub fn disconnect_reason(self) -> DisconnectReason {
        match self {
            CloseCause::ClientGone | CloseCause::Drained | CloseCause::DrainDeadline => {
                DisconnectReason::ClientShutdown
            }
            CloseCause::TransportError => DisconnectReason::TransportError,
            CloseCause::HeartbeatTimeout => DisconnectReason::HeartbeatTimeout,
            CloseCause::PolicyViolation => DisconnectReason::PolicyViolation,
            CloseCause::ForceClosed => DisconnectReason::ForceClosed,
            CloseCause::ProtocolError => DisconnectReason::ProtocolError,
            CloseCause::Shutdown => DisconnectReason::ServerShutdown,
        }
    }

    /// Error reported to the client ahead of the disconnect, for causes the
    /// client itself brought about by staying silent.
    pub fn client_error(self) -> Option<HubError> {
        match self {
            CloseCause::HeartbeatTimeout => Some(HubError::HeartbeatTimeout),
            _ => None,
        }
    }
}

/// A live connection as stored in the registry.
///
/// Cloning is cheap: the queue, sequence counter and sink are shared.  Every
/// read from the registry hands out a clone, so a caller never observes a
/// record that is half-way through removal.
#[derive(Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub role: Role,
    pub identity: String,
    pub state: ConnectionState,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub violations: u32,
    pub queue: Arc<OutboundQueue>,
    pub sequence: Arc<SequenceCounter>,
    pub sink: Arc<dyn DeliverySink>,
}

impl Connection {
    /// Creates a record in the `Connecting` state.
    pub fn new(
        role: Role,
        identity: impl Into<String>,
        queue_capacity: usize,
        sink: Arc<dyn DeliverySink>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            role,
            identity: identity.into(),
            state: ConnectionState::Connecting,
            connected_at: now,
            last_activity: now,
            violations: 0,
            queue: Arc::new(OutboundQueue::new(queue_capacity)),
            sequence: Arc::new(SequenceCounter::new()),
            sink,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("violations", &self.violations)
            .field("queue_depth", &self.queue.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_legal_transitions() {
        assert!(Connecting.can_transition_to(Active));
        assert!(Connecting.can_transition_to(Closed));
        assert!(Active.can_transition_to(Draining));
        assert!(Active.can_transition_to(Closed));
        assert!(Draining.can_transition_to(Closed));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!Active.can_transition_to(Connecting));
        assert!(!Draining.can_transition_to(Active));
        assert!(!Connecting.can_transition_to(Draining));
        assert!(!Active.can_transition_to(Active));
        for next in [Connecting, Active, Draining, Closed] {
            assert!(!Closed.can_transition_to(next), "Closed is terminal");
        }
    }

    #[test]
    fn test_close_cause_maps_to_wire_reason() {
        assert_eq!(
            CloseCause::HeartbeatTimeout.disconnect_reason(),
            DisconnectReason::HeartbeatTimeout
        );
        assert_eq!(CloseCause::Shutdown.disconnect_reason(), DisconnectReason::ServerShutdown);
    }

    #[test]
    fn test_only_heartbeat_timeout_reports_an_error() {
        assert_eq!(CloseCause::HeartbeatTimeout.client_error(), Some(HubError::HeartbeatTimeout));
        for cause in [CloseCause::ForceClosed, CloseCause::Drained, CloseCause::Shutdown] {
            assert_eq!(cause.client_error(), None, "{cause:?}");
        }
    }
}
