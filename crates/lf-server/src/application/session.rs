//! Session manager: handshake, liveness, drain and close.
//!
//! The session manager is the only component that moves a connection through
//! its lifecycle (see [`crate::application::connection`]).  It owns the
//! connection's writer task and is responsible for unwinding every trace of a
//! connection when it closes:
//!
//! 1. Mark the connection `Closed` in the registry.  From this point the
//!    dispatch engine skips it.
//! 2. Remove its subscriptions from the router.
//! 3. Remove it from the registry.
//! 4. Close its outbound queue and stop the writer.
//! 5. Release its source lane in the dispatch engine.
//! 6. Tell the transport through [`DeliverySink::closed`].
//!
//! Step 1 is the only one that can race: whichever caller wins the
//! transition performs the rest, and every other caller sees `false`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lf_core::{ConnectionId, Role};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::connection::{CloseCause, Connection, ConnectionState};
use crate::application::dispatch::{run_writer, DeliverySink, DispatchEngine, WriterExit};
use crate::application::registry::{ConnectionRegistry, RegistryError};
use crate::application::router::TopicRouter;

/// Longest identity a client may declare, in characters.
pub const MAX_IDENTITY_LEN: usize = 128;

/// Timing and admission settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Time allowed between accept and a valid `Hello`.
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Consecutive silent intervals before an `Active` connection is closed.
    pub missed_heartbeats: u32,
    /// Upper bound on how long a `Draining` connection may keep flushing.
    pub drain_deadline: Duration,
    pub allow_multiple_sessions: bool,
    /// Authorization violations tolerated before the connection is closed.
    /// `None` never escalates.
    pub max_violations: Option<u32>,
    pub outbound_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
            missed_heartbeats: 3,
            drain_deadline: Duration::from_secs(5),
            allow_multiple_sessions: false,
            max_violations: None,
            outbound_queue_capacity: 256,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("handshake not completed within {0:?}")]
    HandshakeTimeout(Duration),
}

pub struct SessionManager {
    registry: Arc<ConnectionRegistry>,
    router: Arc<TopicRouter>,
    engine: Arc<DispatchEngine>,
    config: SessionConfig,
    writers: Mutex<HashMap<ConnectionId, JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        registry: Arc<ConnectionRegistry>,
        router: Arc<TopicRouter>,
        engine: Arc<DispatchEngine>,
    ) -> Self {
        Self {
            registry,
            router,
            engine,
            config,
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// `heartbeat_interval × missed_heartbeats`.
    pub fn liveness_window(&self) -> Duration {
        self.config.heartbeat_interval * self.config.missed_heartbeats.max(1)
    }

    /// Completes a handshake: validates the identity, registers the
    /// connection, starts its writer task and activates it.
    ///
    /// The writer is stored before activation, so any close that can see the
    /// connection `Active` also finds the writer to stop.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidIdentity`] for an empty, oversized or
    ///   control-character identity.
    /// - [`SessionError::Registry`] wrapping `DuplicateIdentity`.
    pub async fn open(
        self: &Arc<Self>,
        sink: Arc<dyn DeliverySink>,
        role: Role,
        identity: &str,
    ) -> Result<ConnectionId, SessionError> {
        validate_identity(identity)?;

        let connection = Connection::new(role, identity, self.config.outbound_queue_capacity, sink);
        let queue = Arc::clone(&connection.queue);
        let sink = Arc::clone(&connection.sink);
        let id = self.registry.register(connection).await?;

        let manager = Arc::clone(self);
        let writer = tokio::spawn(async move {
            if run_writer(id, queue, sink).await == WriterExit::Drained {
                // Closing from a separate task: close() aborts this one.
                tokio::spawn(async move {
                    manager.close(id, CloseCause::Drained).await;
                });
            }
        });
        self.writers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, writer);

        if let Err(e) = self.registry.transition(id, ConnectionState::Active).await {
            // Closed before activation; that close may have missed the writer.
            self.stop_writer(id);
            return Err(e.into());
        }

        info!(connection = %id, %role, identity, "connection admitted");
        Ok(id)
    }

    /// Records that a frame arrived and returns the connection's state.
    ///
    /// # Errors
    ///
    /// [`SessionError::Registry`] wrapping `NotFound`.
    pub async fn record_activity(&self, id: ConnectionId) -> Result<ConnectionState, SessionError> {
        Ok(self.registry.touch(id, Instant::now()).await?)
    }

    /// Moves an `Active` connection to `Draining`.  Queued output is still
    /// delivered; the connection closes when its queue empties or when
    /// `drain_deadline` elapses, whichever comes first.
    ///
    /// # Errors
    ///
    /// [`SessionError::Registry`] wrapping `NotFound` or `InvalidTransition`.
    pub async fn begin_drain(self: &Arc<Self>, id: ConnectionId) -> Result<(), SessionError> {
        self.registry.transition(id, ConnectionState::Draining).await?;
        let connection = self.registry.lookup(id).await?;
        debug!(connection = %id, queued = connection.queue.len(), "draining");
        connection.queue.seal();

        let manager = Arc::clone(self);
        let deadline = self.config.drain_deadline;
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if manager.close(id, CloseCause::DrainDeadline).await {
                warn!(connection = %id, ?deadline, "drain deadline elapsed; queued output discarded");
            }
        });
        Ok(())
    }

    /// Closes a connection and removes every trace of it.
    ///
    /// Returns `false` if it was already closed or unknown.
    pub async fn close(&self, id: ConnectionId, cause: CloseCause) -> bool {
        let Ok(previous) = self.registry.transition(id, ConnectionState::Closed).await else {
            return false;
        };
        let Ok(connection) = self.registry.lookup(id).await else {
            return false;
        };

        let subscriptions = self.router.remove_connection(id).await;
        self.registry.remove(id).await;
        connection.queue.close();
        self.stop_writer(id);
        self.engine.release_source(id).await;
        connection.sink.closed(id, cause).await;

        info!(
            connection = %id,
            role = %connection.role,
            identity = %connection.identity,
            from = %previous,
            ?cause,
            subscriptions,
            "connection closed"
        );
        true
    }

    fn stop_writer(&self, id: ConnectionId) {
        let writer = self
            .writers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(writer) = writer {
            writer.abort();
        }
    }

    #[cfg(test)]
    fn writer_count(&self) -> usize {
        self.writers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Closes every `Active` connection silent for longer than the liveness
    /// window.  Returns the ids it closed.
    pub async fn reap_idle(&self) -> Vec<ConnectionId> {
        let window = self.liveness_window();
        let now = Instant::now();
        let stale: Vec<ConnectionId> = self
            .registry
            .list(None)
            .await
            .into_iter()
            .filter(|c| c.state == ConnectionState::Active && now.duration_since(c.last_activity) > window)
            .map(|c| c.id)
            .collect();

        let mut closed = Vec::with_capacity(stale.len());
        for id in stale {
            if self.close(id, CloseCause::HeartbeatTimeout).await {
                warn!(connection = %id, ?window, "heartbeat timeout");
                closed.push(id);
            }
        }
        closed
    }

    /// Runs `handshake` under the handshake timeout.
    ///
    /// # Errors
    ///
    /// [`SessionError::HandshakeTimeout`] if it does not finish in time.
    pub async fn await_handshake<F>(&self, handshake: F) -> Result<F::Output, SessionError>
    where
        F: Future,
    {
        tokio::time::timeout(self.config.handshake_timeout, handshake)
            .await
            .map_err(|_| SessionError::HandshakeTimeout(self.config.handshake_timeout))
    }

    /// Counts an authorization violation.  Returns `true` if the count
    /// reached `max_violations` and the connection was closed.
    ///
    /// # Errors
    ///
    /// [`SessionError::Registry`] wrapping `NotFound`.
    pub async fn record_violation(&self, id: ConnectionId) -> Result<bool, SessionError> {
        let count = self.registry.record_violation(id).await?;
        match self.config.max_violations {
            Some(max) if count >= max => {
                warn!(connection = %id, violations = count, "too many authorization violations");
                Ok(self.close(id, CloseCause::PolicyViolation).await)
            }
            _ => Ok(false),
        }
    }

    /// Closes every connection.  Returns how many were closed.
    pub async fn close_all(&self, cause: CloseCause) -> usize {
        let mut closed = 0;
        for connection in self.registry.list(None).await {
            if self.close(connection.id, cause).await {
                closed += 1;
            }
        }
        closed
    }
}

fn validate_identity(identity: &str) -> Result<(), SessionError> {
    if identity.trim().is_empty() {
        return Err(SessionError::InvalidIdentity("identity is empty".into()));
    }
    if identity.chars().count() > MAX_IDENTITY_LEN {
        return Err(SessionError::InvalidIdentity(format!(
            "identity exceeds {MAX_IDENTITY_LEN} characters"
        )));
    }
    if identity.chars().any(char::is_control) {
        return Err(SessionError::InvalidIdentity(
            "identity contains control characters".into(),
        ));
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use lf_core::TopicPattern;

    use super::*;
    use crate::application::dispatch::{DispatchConfig, MockDeliverySink};

    fn make_manager(config: SessionConfig) -> Arc<SessionManager> {
        let registry = Arc::new(ConnectionRegistry::new(config.allow_multiple_sessions));
        let router = Arc::new(TopicRouter::new());
        let engine = Arc::new(DispatchEngine::new(
            DispatchConfig::default(),
            Arc::clone(&registry),
            Arc::clone(&router),
        ));
        Arc::new(SessionManager::new(config, registry, router, engine))
    }

    fn quiet_sink() -> Arc<MockDeliverySink> {
        let mut sink = MockDeliverySink::new();
        sink.expect_closed().returning(|_, _| ());
        Arc::new(sink)
    }

    #[tokio::test]
    async fn test_open_activates_connection() {
        let manager = make_manager(SessionConfig::default());

        let id = manager
            .open(quiet_sink(), Role::Machine, "lathe-1")
            .await
            .expect("open");

        let conn = manager.registry.lookup(id).await.expect("lookup");
        assert_eq!(conn.state, ConnectionState::Active);
        assert_eq!(conn.role, Role::Machine);
    }

    #[tokio::test]
    async fn test_open_rejects_bad_identities() {
        let manager = make_manager(SessionConfig::default());
        let oversized = "x".repeat(MAX_IDENTITY_LEN + 1);
        for identity in ["", "   ", "line\n1", oversized.as_str()] {
            let result = manager.open(quiet_sink(), Role::Dashboard, identity).await;
            assert!(
                matches!(result, Err(SessionError::InvalidIdentity(_))),
                "{identity:?} must be rejected"
            );
        }
        assert!(manager.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_open_rejects_duplicate_identity() {
        let manager = make_manager(SessionConfig::default());
        manager.open(quiet_sink(), Role::Dashboard, "ops").await.expect("first");

        let result = manager.open(quiet_sink(), Role::Dashboard, "ops").await;

        assert!(matches!(
            result,
            Err(SessionError::Registry(RegistryError::DuplicateIdentity { .. }))
        ));
    }

    #[tokio::test]
    async fn test_close_unwinds_router_and_registry_once() {
        // Arrange
        let manager = make_manager(SessionConfig::default());
        let mut sink = MockDeliverySink::new();
        sink.expect_closed()
            .withf(|_, cause| *cause == CloseCause::ForceClosed)
            .times(1)
            .returning(|_, _| ());
        let id = manager
            .open(Arc::new(sink), Role::Dashboard, "d1")
            .await
            .expect("open");
        manager.router.subscribe(id, TopicPattern::match_all()).await;

        // Act
        let first = manager.close(id, CloseCause::ForceClosed).await;
        let second = manager.close(id, CloseCause::ForceClosed).await;

        // Assert
        assert!(first);
        assert!(!second);
        assert!(manager.registry.lookup(id).await.is_err());
        assert!(manager.router.patterns_for(id).await.is_empty());
        assert_eq!(manager.writer_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_racing_open_leaves_no_writer_behind() {
        // Arrange
        let manager = make_manager(SessionConfig::default());

        // Act: every close_all may land anywhere inside a concurrent open
        for i in 0..200 {
            let opener = {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    let _ = manager.open(quiet_sink(), Role::Machine, &format!("m{i}")).await;
                })
            };
            manager.close_all(CloseCause::Shutdown).await;
            opener.await.expect("open task");
        }
        manager.close_all(CloseCause::Shutdown).await;

        // Assert
        assert!(manager.registry.is_empty().await);
        assert_eq!(manager.writer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_idle_closes_only_silent_connections() {
        // Arrange
        let manager = make_manager(SessionConfig {
            heartbeat_interval: Duration::from_secs(1),
            missed_heartbeats: 3,
            ..SessionConfig::default()
        });
        let silent = manager.open(quiet_sink(), Role::Machine, "silent").await.expect("open");
        let chatty = manager.open(quiet_sink(), Role::Machine, "chatty").await.expect("open");

        // Act
        tokio::time::advance(Duration::from_secs(2)).await;
        manager.record_activity(chatty).await.expect("activity");
        tokio::time::advance(Duration::from_millis(1_500)).await;
        let reaped = manager.reap_idle().await;

        // Assert
        assert_eq!(reaped, vec![silent]);
        assert!(manager.registry.lookup(chatty).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_handshake_times_out() {
        let manager = make_manager(SessionConfig {
            handshake_timeout: Duration::from_millis(500),
            ..SessionConfig::default()
        });

        let result = manager.await_handshake(std::future::pending::<()>()).await;

        assert_eq!(result, Err(SessionError::HandshakeTimeout(Duration::from_millis(500))));
    }

    #[tokio::test]
    async fn test_begin_drain_on_empty_queue_closes_connection() {
        let manager = make_manager(SessionConfig::default());
        let id = manager.open(quiet_sink(), Role::Dashboard, "d1").await.expect("open");

        manager.begin_drain(id).await.expect("drain");
        for _ in 0..50 {
            if manager.registry.lookup(id).await.is_err() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(manager.registry.lookup(id).await.is_err());
    }

    #[tokio::test]
    async fn test_violations_escalate_at_configured_limit() {
        let manager = make_manager(SessionConfig {
            max_violations: Some(2),
            ..SessionConfig::default()
        });
        let id = manager.open(quiet_sink(), Role::Dashboard, "d1").await.expect("open");

        assert_eq!(manager.record_violation(id).await, Ok(false));
        assert_eq!(manager.record_violation(id).await, Ok(true));
        assert!(manager.registry.lookup(id).await.is_err());
    }

    #[tokio::test]
    async fn test_violations_never_escalate_without_limit() {
        let manager = make_manager(SessionConfig::default());
        let id = manager.open(quiet_sink(), Role::Dashboard, "d1").await.expect("open");
        for _ in 0..10 {
            assert_eq!(manager.record_violation(id).await, Ok(false));
        }
    }
}
