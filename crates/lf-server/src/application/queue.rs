//! Bounded per-connection outbound queue with a configurable backpressure
//! policy.
//!
//! # Producers and the consumer
//!
//! Many dispatch tasks may push onto the same queue (one per shard or source lane),
//! but exactly one writer task pops from it.  Items are `Arc<Envelope>`, so a
//! message fanned out to a hundred subscribers shares a single payload
//! allocation.
//!
//! # What happens when the queue is full?
//!
//! | Policy        | Effect                                                  |
//! |---------------|---------------------------------------------------------|
//! | `DropOldest`  | The oldest queued item is discarded to make room.       |
//! | `DropNewest`  | The incoming item is discarded.                         |
//! | `BlockSource` | The producer waits until the writer frees a slot.       |
//!
//! `DropOldest` is the default: for live telemetry the newest reading is the
//! one worth showing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lf_core::Envelope;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;

/// What to do when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    #[default]
    DropOldest,
    DropNewest,
    BlockSource,
}

/// Result of a successful [`OutboundQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    /// Enqueued after discarding the oldest item.
    DroppedOldest,
    /// Not enqueued; the queue was full.
    DroppedNewest,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("outbound queue is closed")]
    Closed,
}

/// Counters for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStats {
    pub depth: usize,
    pub capacity: usize,
    pub enqueued: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub delivery_failures: u64,
}

#[derive(Default)]
struct QueueState {
    buf: VecDeque<Arc<Envelope>>,
    /// Closed: contents discarded, pushes and pops fail.
    closed: bool,
    /// Sealed: pushes fail, pops drain what is left.
    sealed: bool,
}

pub struct OutboundQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    item_ready: Notify,
    space_ready: Notify,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    delivery_failures: AtomicU64,
}

impl OutboundQueue {
    /// Creates a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            item_ready: Notify::new(),
            space_ready: Notify::new(),
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an envelope, applying `policy` if the queue is full.
    ///
    /// # Errors
    ///
    /// [`QueueError::Closed`] if the queue is closed or sealed, including
    /// while a `BlockSource` producer is waiting for space.
    pub async fn push(
        &self,
        envelope: Arc<Envelope>,
        policy: BackpressurePolicy,
    ) -> Result<PushOutcome, QueueError> {
        loop {
            let space = self.space_ready.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed || state.sealed {
                    return Err(QueueError::Closed);
                }
                if state.buf.len() < self.capacity {
                    state.buf.push_back(envelope);
                    self.enqueued.fetch_add(1, Ordering::Relaxed);
                    self.item_ready.notify_one();
                    return Ok(PushOutcome::Enqueued);
                }
                match policy {
                    BackpressurePolicy::DropOldest => {
                        state.buf.pop_front();
                        state.buf.push_back(envelope);
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        self.enqueued.fetch_add(1, Ordering::Relaxed);
                        self.item_ready.notify_one();
                        return Ok(PushOutcome::DroppedOldest);
                    }
                    BackpressurePolicy::DropNewest => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        return Ok(PushOutcome::DroppedNewest);
                    }
                    BackpressurePolicy::BlockSource => {}
                }
            }

            space.await;
        }
    }

    /// Takes the next envelope, waiting if the queue is empty.
    ///
    /// Returns `None` once the queue is closed, or once it is sealed and
    /// empty.
    pub async fn pop(&self) -> Option<Arc<Envelope>> {
        loop {
            let ready = self.item_ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(envelope) = state.buf.pop_front() {
                    self.space_ready.notify_waiters();
                    return Some(envelope);
                }
                if state.sealed {
                    return None;
                }
            }

            ready.await;
        }
    }

    /// Refuses further pushes; the consumer drains what is already queued.
    pub fn seal(&self) {
        self.lock().sealed = true;
        self.item_ready.notify_waiters();
        self.space_ready.notify_waiters();
    }

    /// Discards queued items and wakes every waiter.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.buf.clear();
        }
        self.item_ready.notify_waiters();
        self.space_ready.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.len(),
            capacity: self.capacity,
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
