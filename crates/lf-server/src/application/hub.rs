//! The hub facade: the single entry point transports talk to.
//!
//! # Lifecycle
//!
//! ```text
//! Hub::new(config, policy)   builds registry, router, sessions and engine
//! hub.start()                spawns dispatch workers and the idle reaper
//! ... on_connect / on_message / on_disconnect ...
//! hub.shutdown()             closes every connection and stops all tasks
//! ```
//!
//! There is no global state: a process may run several independent hubs (the
//! integration tests do exactly that).  [`Hub`] is a cheap `Arc` handle, so a
//! transport clones it into every connection task.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lf_core::protocol::messages::PublishMessage;
use lf_core::protocol::EnvelopeLimits;
use lf_core::{
    decode_message, Action, AuthorizationPolicy, ConnectionId, Envelope, EnvelopeContext,
    EnvelopeError, HubMessage, Role, TopicPattern,
};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::application::connection::{CloseCause, ConnectionState};
use crate::application::dispatch::{DeliverySink, DispatchConfig, DispatchEngine};
use crate::application::error::HubError;
use crate::application::queue::QueueStats;
use crate::application::registry::ConnectionRegistry;
use crate::application::router::TopicRouter;
use crate::application::session::{SessionConfig, SessionManager};

/// Everything needed to build a [`Hub`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubConfig {
    pub session: SessionConfig,
    pub dispatch: DispatchConfig,
    pub envelope: EnvelopeLimits,
}

/// What the hub did with an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundAck {
    Published { sequence: u64 },
    Subscribed { pattern: String },
    Unsubscribed { pattern: String, removed: bool },
    HeartbeatAck(u64),
    Draining,
}

impl InboundAck {
    /// The frame to send back to the client, if any.
    pub fn reply(&self) -> Option<HubMessage> {
        match self {
            InboundAck::Published { sequence } => Some(HubMessage::Ack { sequence: *sequence }),
            InboundAck::HeartbeatAck(token) => Some(HubMessage::HeartbeatAck(*token)),
            InboundAck::Subscribed { .. } | InboundAck::Unsubscribed { .. } | InboundAck::Draining => None,
        }
    }
}

/// Read-only view of a connection for the admin surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub role: Role,
    pub identity: String,
    pub state: ConnectionState,
    pub connected_for: Duration,
    pub idle_for: Duration,
    pub violations: u32,
    pub last_sequence: u64,
    pub subscriptions: Vec<String>,
    pub queue: QueueStats,
}

struct HubInner {
    config: HubConfig,
    policy: Arc<dyn AuthorizationPolicy>,
    registry: Arc<ConnectionRegistry>,
    router: Arc<TopicRouter>,
    sessions: Arc<SessionManager>,
    engine: Arc<DispatchEngine>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

/// Shared handle to one hub instance.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(config: HubConfig, policy: Arc<dyn AuthorizationPolicy>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.session.allow_multiple_sessions));
        let router = Arc::new(TopicRouter::new());
        let engine = Arc::new(DispatchEngine::new(
            config.dispatch,
            Arc::clone(&registry),
            Arc::clone(&router),
        ));
        let sessions = Arc::new(SessionManager::new(
            config.session,
            Arc::clone(&registry),
            Arc::clone(&router),
            Arc::clone(&engine),
        ));
        Self {
            inner: Arc::new(HubInner {
                config,
                policy,
                registry,
                router,
                sessions,
                engine,
                reaper: Mutex::new(None),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Spawns the dispatch workers and the idle reaper.  Idempotent.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.engine.start();

        let sessions = Arc::clone(&self.inner.sessions);
        let period = self.inner.config.session.heartbeat_interval;
        let reaper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reaped = sessions.reap_idle().await;
                if !reaped.is_empty() {
                    debug!(count = reaped.len(), "idle connections reaped");
                }
            }
        });
        *self.inner.reaper.lock().unwrap_or_else(PoisonError::into_inner) = Some(reaper);

        info!(
            workers = self.inner.engine.shard_count(),
            heartbeat_interval = ?period,
            liveness_window = ?self.inner.sessions.liveness_window(),
            "hub started"
        );
    }

    /// Closes every connection and stops background tasks.  A hub that has
    /// been shut down cannot be started again.
    pub async fn shutdown(&self) {
        let closed = self.inner.sessions.close_all(CloseCause::Shutdown).await;
        if let Some(reaper) = self
            .inner
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reaper.abort();
        }
        self.inner.engine.stop().await;
        info!(closed, "hub shut down");
    }

    // ── Ingestion ────────────────────────────────────────────────────────────

    /// Admits a connection after a successful `Hello`.
    ///
    /// # Errors
    ///
    /// [`HubError::Validation`] for a bad identity and
    /// [`HubError::DuplicateIdentity`] when the identity is already connected.
    pub async fn on_connect(
        &self,
        sink: Arc<dyn DeliverySink>,
        role: Role,
        identity: &str,
    ) -> Result<ConnectionId, HubError> {
        self.inner
            .sessions
            .open(sink, role, identity)
            .await
            .map_err(|e| {
                warn!(%role, identity, error = %e, "connection rejected");
                HubError::from(e)
            })
    }

    /// Decodes one complete frame and handles it.
    ///
    /// # Errors
    ///
    /// [`HubError::Validation`] if `raw` is not exactly one well-formed frame,
    /// otherwise whatever [`handle_message`](Self::handle_message) returns.
    pub async fn on_message(&self, id: ConnectionId, raw: &[u8]) -> Result<InboundAck, HubError> {
        let (message, consumed) = decode_message(raw)?;
        if consumed != raw.len() {
            return Err(HubError::Validation(format!(
                "{} trailing bytes after frame",
                raw.len() - consumed
            )));
        }
        self.handle_message(id, message).await
    }

    /// Handles a decoded frame from an admitted connection.
    ///
    /// Any frame counts as liveness.  A `Draining` connection has its frames
    /// refused with [`HubError::InvalidState`].
    ///
    /// # Errors
    ///
    /// Validation, authorization, state and not-found errors, all scoped to
    /// this one message.
    pub async fn handle_message(&self, id: ConnectionId, message: HubMessage) -> Result<InboundAck, HubError> {
        let state = self.inner.sessions.record_activity(id).await?;
        if state != ConnectionState::Active {
            return Err(HubError::InvalidState(format!("connection {id} is {state}")));
        }

        match message {
            HubMessage::Publish(publish) => self.publish(id, publish).await,
            HubMessage::Subscribe { pattern } => self.subscribe(id, &pattern).await,
            HubMessage::Unsubscribe { pattern } => self.unsubscribe(id, &pattern).await,
            HubMessage::Heartbeat(token) => Ok(InboundAck::HeartbeatAck(token)),
            HubMessage::Disconnect { reason } => {
                debug!(connection = %id, ?reason, "client requested disconnect");
                self.inner.sessions.begin_drain(id).await?;
                Ok(InboundAck::Draining)
            }
            other => Err(HubError::InvalidState(format!(
                "{:?} is not accepted from a client",
                other.message_type()
            ))),
        }
    }

    /// Removes a connection whose transport went away.
    pub async fn on_disconnect(&self, id: ConnectionId, cause: CloseCause) -> bool {
        self.inner.sessions.close(id, cause).await
    }

    async fn publish(&self, id: ConnectionId, publish: PublishMessage) -> Result<InboundAck, HubError> {
        let connection = self.inner.registry.lookup(id).await?;
        let ctx = EnvelopeContext {
            source: id,
            role: connection.role,
            sequence: &connection.sequence,
            limits: &self.inner.config.envelope,
            policy: self.inner.policy.as_ref(),
        };

        let envelope = match Envelope::build(&ctx, &publish.topic, publish.payload) {
            Ok(envelope) => envelope,
            Err(EnvelopeError::Unauthorized(e)) => {
                warn!(connection = %id, error = %e, "publish refused");
                self.inner.sessions.record_violation(id).await?;
                return Err(HubError::Authorization(e));
            }
            Err(e) => {
                warn!(connection = %id, topic = %publish.topic, error = %e, "publish rejected");
                return Err(e.into());
            }
        };

        let sequence = envelope.sequence();
        debug!(connection = %id, topic = %envelope.topic(), sequence, "publish accepted");
        self.inner.engine.submit(Arc::new(envelope)).await?;
        Ok(InboundAck::Published { sequence })
    }

    async fn subscribe(&self, id: ConnectionId, raw: &str) -> Result<InboundAck, HubError> {
        let connection = self.inner.registry.lookup(id).await?;
        let pattern = TopicPattern::parse_with(raw, &self.inner.config.envelope.topic)?;

        if let Err(e) = self
            .inner
            .policy
            .authorize(connection.role, &pattern, Action::Subscribe)
        {
            warn!(connection = %id, error = %e, "subscribe refused");
            self.inner.sessions.record_violation(id).await?;
            return Err(e.into());
        }

        self.inner.router.subscribe(id, pattern.clone()).await;
        Ok(InboundAck::Subscribed {
            pattern: pattern.to_string(),
        })
    }

    async fn unsubscribe(&self, id: ConnectionId, raw: &str) -> Result<InboundAck, HubError> {
        let pattern = TopicPattern::parse_with(raw, &self.inner.config.envelope.topic)?;
        let removed = self.inner.router.unsubscribe(id, &pattern).await;
        Ok(InboundAck::Unsubscribed {
            pattern: pattern.to_string(),
            removed,
        })
    }

    // ── Admin ────────────────────────────────────────────────────────────────

    /// Snapshots of live connections, oldest first.
    pub async fn connections(&self, role: Option<Role>) -> Vec<ConnectionInfo> {
        let now = Instant::now();
        let mut out = Vec::new();
        for c in self.inner.registry.list(role).await {
            let subscriptions = self
                .inner
                .router
                .patterns_for(c.id)
                .await
                .into_iter()
                .map(String::from)
                .collect();
            out.push(ConnectionInfo {
                id: c.id,
                role: c.role,
                identity: c.identity.clone(),
                state: c.state,
                connected_for: now.duration_since(c.connected_at),
                idle_for: now.duration_since(c.last_activity),
                violations: c.violations,
                last_sequence: c.sequence.last_issued(),
                subscriptions,
                queue: c.queue.stats(),
            });
        }
        out
    }

    /// Closes a connection on operator request.
    ///
    /// # Errors
    ///
    /// [`HubError::NotFound`] if `id` is not connected.
    pub async fn force_close(&self, id: ConnectionId) -> Result<(), HubError> {
        if self.inner.sessions.close(id, CloseCause::ForceClosed).await {
            info!(connection = %id, "connection force-closed");
            Ok(())
        } else {
            Err(HubError::NotFound(id))
        }
    }

    /// Starts a graceful close, as if the client had sent `Disconnect`.
    ///
    /// # Errors
    ///
    /// [`HubError::NotFound`] or [`HubError::InvalidState`].
    pub async fn drain(&self, id: ConnectionId) -> Result<(), HubError> {
        Ok(self.inner.sessions.begin_drain(id).await?)
    }

    /// Number of connections holding each pattern.
    pub async fn subscription_counts(&self) -> BTreeMap<String, usize> {
        self.inner.router.subscription_counts().await
    }

    /// Queue counters for one connection.
    ///
    /// # Errors
    ///
    /// [`HubError::NotFound`] if `id` is not connected.
    pub async fn queue_stats(&self, id: ConnectionId) -> Result<QueueStats, HubError> {
        Ok(self.inner.registry.lookup(id).await?.queue.stats())
    }

    /// Runs the idle reaper once, outside its schedule.
    pub async fn reap_idle(&self) -> Vec<ConnectionId> {
        self.inner.sessions.reap_idle().await
    }

    /// Bounds a handshake future by the configured handshake timeout.
    ///
    /// # Errors
    ///
    /// [`HubError::HandshakeTimeout`] if it does not finish in time.
    pub async fn await_handshake<F>(&self, handshake: F) -> Result<F::Output, HubError>
    where
        F: std::future::Future,
    {
        Ok(self.inner.sessions.await_handshake(handshake).await?)
    }

    /// Rebuilds the routing index and reports whether it had diverged.
    pub async fn verify_routing(&self) -> bool {
        match self.inner.router.check_consistency().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "routing index diverged; rebuilding");
                self.inner.router.rebuild().await;
                false
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
