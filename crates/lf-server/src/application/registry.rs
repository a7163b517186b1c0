//! Connection registry: every live connection, indexed by id and by identity.
//!
//! # Why one lock for two maps?
//!
//! The registry keeps two views of the same data:
//!
//! - `by_id`: `ConnectionId → Connection`, used on every dispatch.
//! - `by_identity`: `(Role, identity) → {ConnectionId}`, used by the
//!   duplicate-identity check during the handshake.
//!
//! Both maps live behind a single [`tokio::sync::RwLock`].  Registering or
//! removing a connection updates both under one write guard, so a reader can
//! never see a connection that is present in one map but already gone from
//! the other.  Readers receive a *clone* of the record, never a reference into
//! the map.

use std::collections::{HashMap, HashSet};

use lf_core::{ConnectionId, Role};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::application::connection::{Connection, ConnectionState};

/// Errors raised by [`ConnectionRegistry`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{role} identity '{identity}' already has an active session")]
    DuplicateIdentity { role: Role, identity: String },

    #[error("connection not found: {0}")]
    NotFound(ConnectionId),

    #[error("connection {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: ConnectionId,
        from: ConnectionState,
        to: ConnectionState,
    },
}

#[derive(Default)]
struct RegistryInner {
    by_id: HashMap<ConnectionId, Connection>,
    by_identity: HashMap<(Role, String), HashSet<ConnectionId>>,
}

/// Thread-safe store of live connections.
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
    allow_multiple_sessions: bool,
}

impl ConnectionRegistry {
    pub fn new(allow_multiple_sessions: bool) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            allow_multiple_sessions,
        }
    }

    /// Adds a connection.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateIdentity`] if another connection with the
    /// same role and identity is registered and multiple sessions are not
    /// allowed.
    pub async fn register(&self, connection: Connection) -> Result<ConnectionId, RegistryError> {
        let mut inner = self.inner.write().await;
        let key = (connection.role, connection.identity.clone());

        if !self.allow_multiple_sessions
            && inner.by_identity.get(&key).is_some_and(|ids| !ids.is_empty())
        {
            return Err(RegistryError::DuplicateIdentity {
                role: key.0,
                identity: key.1,
            });
        }

        let id = connection.id;
        inner.by_identity.entry(key).or_default().insert(id);
        inner.by_id.insert(id, connection);
        Ok(id)
    }

    /// Returns a snapshot of the connection.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if `id` is not registered.
    pub async fn lookup(&self, id: ConnectionId) -> Result<Connection, RegistryError> {
        self.inner
            .read()
            .await
            .by_id
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Removes a connection from both indexes, returning its last snapshot.
    pub async fn remove(&self, id: ConnectionId) -> Option<Connection> {
        let mut inner = self.inner.write().await;
        let connection = inner.by_id.remove(&id)?;
        let key = (connection.role, connection.identity.clone());
        if let Some(ids) = inner.by_identity.get_mut(&key) {
            ids.remove(&id);
            if ids.is_empty() {
                inner.by_identity.remove(&key);
            }
        }
        Some(connection)
    }

    /// Lists connections, optionally filtered by role, oldest first.
    pub async fn list(&self, role: Option<Role>) -> Vec<Connection> {
        let inner = self.inner.read().await;
        let mut out: Vec<Connection> = inner
            .by_id
            .values()
            .filter(|c| role.map_or(true, |r| c.role == r))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Moves a connection to `to`, returning the previous state.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotFound`] if `id` is not registered.
    /// - [`RegistryError::InvalidTransition`] if the move is not allowed.
    pub async fn transition(
        &self,
        id: ConnectionId,
        to: ConnectionState,
    ) -> Result<ConnectionState, RegistryError> {
        let mut inner = self.inner.write().await;
        let connection = inner.by_id.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        let from = connection.state;
        if !from.can_transition_to(to) {
            return Err(RegistryError::InvalidTransition { id, from, to });
        }
        connection.state = to;
        Ok(from)
    }

    /// Stamps the last-activity instant and returns the current state.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if `id` is not registered.
    pub async fn touch(
        &self,
        id: ConnectionId,
        at: Instant,
    ) -> Result<ConnectionState, RegistryError> {
        let mut inner = self.inner.write().await;
        let connection = inner.by_id.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        connection.last_activity = at;
        Ok(connection.state)
    }

    /// Increments the authorization-violation counter and returns the new count.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if `id` is not registered.
    pub async fn record_violation(&self, id: ConnectionId) -> Result<u32, RegistryError> {
        let mut inner = self.inner.write().await;
        let connection = inner.by_id.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        connection.violations = connection.violations.saturating_add(1);
        Ok(connection.violations)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.by_id.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
