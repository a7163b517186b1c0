//! Dispatch engine: fans accepted envelopes out to subscriber queues.
//!
//! # Pipeline (for beginners)
//!
//! ```text
//!  reader tasks ──submit──► shard 0 ─► worker 0 ─┐
//!                           shard 1 ─► worker 1 ─┼─► router ─► subscriber queues
//!                           shard N ─► worker N ─┘                    │
//!                                                           writer task per
//!                                                           connection ─► DeliverySink
//! ```
//!
//! 1. A reader task validates a publish into an [`Envelope`] and calls
//!    [`DispatchEngine::submit`].
//! 2. The envelope is placed on the shard chosen by hashing its **source**
//!    connection id.  One source always lands on the same shard, and each
//!    shard is drained by exactly one worker, so envelopes from one source
//!    are processed in the order they were submitted.
//! 3. The worker resolves subscribers through the [`TopicRouter`] and pushes
//!    the envelope onto every subscriber's [`OutboundQueue`].
//! 4. Each connection's writer task pops its queue in order and hands every
//!    envelope to the [`DeliverySink`].
//!
//! Under [`BackpressurePolicy::BlockSource`] step 2 changes: every source
//! gets its own lane, a bounded channel drained by a task of its own.  A
//! full subscriber queue then suspends only the lane of the source that
//! filled it, and once that lane's channel is full, only that source's
//! reader.  Other sources keep flowing.  A lane lives until
//! [`DispatchEngine::release_source`] is called for its source.
//!
//! A failed delivery is counted and logged.  It is never retried.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use lf_core::{ConnectionId, Envelope};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::application::connection::{CloseCause, ConnectionState};
use crate::application::error::HubError;
use crate::application::queue::{BackpressurePolicy, OutboundQueue, PushOutcome};
use crate::application::registry::ConnectionRegistry;
use crate::application::router::TopicRouter;

// ── Delivery collaborator ─────────────────────────────────────────────────────

/// Result of handing one envelope to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(String),
}

impl DeliveryOutcome {
    /// # Errors
    ///
    /// [`HubError::DeliveryFailure`] carrying the transport's reason.
    pub fn into_result(self) -> Result<(), HubError> {
        match self {
            DeliveryOutcome::Delivered => Ok(()),
            DeliveryOutcome::Failed(reason) => Err(HubError::DeliveryFailure(reason)),
        }
    }
}

/// Outbound side of a transport.
///
/// The hub calls [`deliver`](Self::deliver) from the connection's writer
/// task, one envelope at a time and in queue order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, connection: ConnectionId, envelope: &Envelope) -> DeliveryOutcome;

    /// Called once after the connection has been removed from the hub.
    async fn closed(&self, _connection: ConnectionId, _cause: CloseCause) {}
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Tuning for the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of shard workers.
    pub workers: usize,
    /// Capacity of each shard's inbound channel, and of each source lane's.
    pub inbound_queue_capacity: usize,
    pub backpressure: BackpressurePolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            inbound_queue_capacity: 1024,
            backpressure: BackpressurePolicy::DropOldest,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatch engine is stopped")]
    Stopped,

    #[error("source {0} is no longer connected")]
    SourceGone(ConnectionId),
}

/// What happened to one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    pub matched: usize,
    pub enqueued: usize,
    pub dropped: usize,
    pub skipped: usize,
    pub repaired: bool,
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct DispatchEngine {
    config: DispatchConfig,
    registry: Arc<ConnectionRegistry>,
    router: Arc<TopicRouter>,
    shards: Vec<mpsc::Sender<Arc<Envelope>>>,
    /// Handed to the workers by [`start`](Self::start).
    receivers: Mutex<Vec<mpsc::Receiver<Arc<Envelope>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Per-source lanes, used instead of the shards under `BlockSource`.
    lanes: tokio::sync::Mutex<HashMap<ConnectionId, SourceLane>>,
    stopped: AtomicBool,
}

struct SourceLane {
    tx: mpsc::Sender<Arc<Envelope>>,
    task: JoinHandle<()>,
}

impl DispatchEngine {
    pub fn new(
        config: DispatchConfig,
        registry: Arc<ConnectionRegistry>,
        router: Arc<TopicRouter>,
    ) -> Self {
        let shard_count = config.workers.max(1);
        let (shards, receivers): (Vec<_>, Vec<_>) = (0..shard_count)
            .map(|_| mpsc::channel(config.inbound_queue_capacity.max(1)))
            .unzip();
        Self {
            config,
            registry,
            router,
            shards,
            receivers: Mutex::new(receivers),
            workers: Mutex::new(Vec::new()),
            lanes: tokio::sync::Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawns one worker per shard.  Calling it again has no effect.
    pub fn start(self: &Arc<Self>) {
        let receivers: Vec<_> = std::mem::take(
            &mut *self.receivers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for (shard, mut rx) in receivers.into_iter().enumerate() {
            let engine = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                debug!(shard, "dispatch worker started");
                while let Some(envelope) = rx.recv().await {
                    engine.dispatch(&envelope).await;
                }
                debug!(shard, "dispatch worker stopped");
            }));
        }
    }

    /// Aborts every worker and lane.  Envelopes still in their channels are
    /// lost.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for worker in workers {
            worker.abort();
        }
        for (_, lane) in self.lanes.lock().await.drain() {
            lane.task.abort();
        }
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, source: ConnectionId) -> usize {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Queues an envelope for its source's shard, or for its source's lane
    /// under `BlockSource`, waiting if that channel is full.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Stopped`] if the engine has been stopped or the
    ///   shard's worker has gone away.
    /// - [`DispatchError::SourceGone`] if a lane is needed for a source that
    ///   is no longer registered.
    pub async fn submit(self: &Arc<Self>, envelope: Arc<Envelope>) -> Result<(), DispatchError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(DispatchError::Stopped);
        }
        if self.config.backpressure == BackpressurePolicy::BlockSource {
            let lane = self.lane_for(envelope.source()).await?;
            return lane.send(envelope).await.map_err(|_| DispatchError::Stopped);
        }
        let shard = self.shard_for(envelope.source());
        self.shards[shard]
            .send(envelope)
            .await
            .map_err(|_| DispatchError::Stopped)
    }

    /// Returns the sending half of `source`'s lane, opening the lane if
    /// needed.
    ///
    /// The registry check runs under the lane lock, so a lane is never
    /// opened after [`release_source`](Self::release_source) ran for a
    /// source that has left the registry.
    async fn lane_for(self: &Arc<Self>, source: ConnectionId) -> Result<mpsc::Sender<Arc<Envelope>>, DispatchError> {
        let mut lanes = self.lanes.lock().await;
        if let Some(lane) = lanes.get(&source) {
            return Ok(lane.tx.clone());
        }
        if self.registry.lookup(source).await.is_err() {
            return Err(DispatchError::SourceGone(source));
        }

        let (tx, mut rx) = mpsc::channel::<Arc<Envelope>>(self.config.inbound_queue_capacity.max(1));
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            debug!(%source, "source lane opened");
            while let Some(envelope) = rx.recv().await {
                engine.dispatch(&envelope).await;
            }
            debug!(%source, "source lane closed");
        });
        lanes.insert(source, SourceLane { tx: tx.clone(), task });
        Ok(tx)
    }

    /// Closes `source`'s lane once it has dispatched what it already holds.
    /// Does nothing for a source without a lane.
    pub async fn release_source(&self, source: ConnectionId) {
        // Dropping the sender ends the lane task after its backlog.
        self.lanes.lock().await.remove(&source);
    }

    /// Number of open source lanes.
    pub async fn lane_count(&self) -> usize {
        self.lanes.lock().await.len()
    }

    /// Routes one envelope to every subscriber queue.
    pub async fn dispatch(&self, envelope: &Arc<Envelope>) -> DispatchReport {
        let mut report = DispatchReport::default();

        let subscribers = match self.router.match_subscribers(envelope.topic()).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "routing index corrupted; rebuilding");
                self.router.rebuild().await;
                report.repaired = true;
                match self.router.match_subscribers(envelope.topic()).await {
                    Ok(ids) => ids,
                    Err(e) => {
                        error!(error = %e, topic = %envelope.topic(), "routing still inconsistent after rebuild; envelope dropped");
                        return report;
                    }
                }
            }
        };
        report.matched = subscribers.len();

        for id in subscribers {
            let connection = match self.registry.lookup(id).await {
                Ok(c) if c.state == ConnectionState::Active => c,
                Ok(c) => {
                    debug!(connection = %id, state = %c.state, "subscriber not active; skipped");
                    report.skipped += 1;
                    continue;
                }
                Err(_) => {
                    debug!(connection = %id, "subscriber vanished; skipped");
                    report.skipped += 1;
                    continue;
                }
            };

            match connection
                .queue
                .push(Arc::clone(envelope), self.config.backpressure)
                .await
            {
                Ok(PushOutcome::Enqueued) => report.enqueued += 1,
                Ok(PushOutcome::DroppedOldest) => {
                    report.enqueued += 1;
                    report.dropped += 1;
                    debug!(connection = %id, "queue full; oldest envelope dropped");
                }
                Ok(PushOutcome::DroppedNewest) => {
                    report.dropped += 1;
                    debug!(connection = %id, sequence = envelope.sequence(), "queue full; envelope dropped");
                }
                Err(_) => {
                    debug!(connection = %id, "queue closed during dispatch; skipped");
                    report.skipped += 1;
                }
            }
        }

        report
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Why a writer loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// The queue was closed.
    Closed,
    /// The queue was sealed and is now empty.
    Drained,
}

/// Pops `queue` in order and hands each envelope to `sink`.
pub async fn run_writer(
    connection: ConnectionId,
    queue: Arc<OutboundQueue>,
    sink: Arc<dyn DeliverySink>,
) -> WriterExit {
    while let Some(envelope) = queue.pop().await {
        match sink.deliver(connection, &envelope).await.into_result() {
            Ok(()) => queue.record_delivered(),
            Err(e) => {
                queue.record_failure();
                warn!(
                    connection = %connection,
                    topic = %envelope.topic(),
                    sequence = envelope.sequence(),
                    code = ?e.code(),
                    error = %e,
                    "delivery failed"
                );
            }
        }
    }
    if queue.is_closed() {
        WriterExit::Closed
    } else {
        WriterExit::Drained
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
