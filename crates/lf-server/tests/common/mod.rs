//! Shared test doubles for the lf-server integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lf_core::{ConnectionId, Envelope, HubMessage, Payload};
use lf_core::protocol::messages::PublishMessage;
use lf_server::application::connection::CloseCause;
use lf_server::application::dispatch::{DeliveryOutcome, DeliverySink};
use tokio::sync::{Notify, Semaphore};

/// Generous upper bound for anything the tests wait on.
pub const WAIT: Duration = Duration::from_secs(5);

/// A [`DeliverySink`] that remembers everything it was given.
///
/// A gated sink blocks inside `deliver` until [`RecordingSink::release`] is
/// called, which lets a test fill the outbound queue behind it.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Envelope>>,
    closed: Mutex<Vec<CloseCause>>,
    changed: Notify,
    gate: Option<Semaphore>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        })
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn delivered(&self) -> Vec<Envelope> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn closes(&self) -> Vec<CloseCause> {
        self.closed.lock().unwrap().clone()
    }

    /// Waits until at least `n` envelopes have been delivered.
    pub async fn wait_for_deliveries(&self, n: usize) -> Vec<Envelope> {
        tokio::time::timeout(WAIT, async {
            loop {
                let changed = self.changed.notified();
                let delivered = self.delivered();
                if delivered.len() >= n {
                    return delivered;
                }
                changed.await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {n} deliveries, got {}", self.delivered().len()))
    }

    /// Waits until the hub has closed this sink and returns the cause.
    pub async fn wait_for_close(&self) -> CloseCause {
        tokio::time::timeout(WAIT, async {
            loop {
                let changed = self.changed.notified();
                if let Some(cause) = self.closes().first().copied() {
                    return cause;
                }
                changed.await;
            }
        })
        .await
        .expect("sink was never closed")
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, _connection: ConnectionId, envelope: &Envelope) -> DeliveryOutcome {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.delivered.lock().unwrap().push(envelope.clone());
        self.changed.notify_waiters();
        DeliveryOutcome::Delivered
    }

    async fn closed(&self, _connection: ConnectionId, cause: CloseCause) {
        self.closed.lock().unwrap().push(cause);
        self.changed.notify_waiters();
    }
}

pub fn publish(topic: &str, body: &[u8]) -> HubMessage {
    HubMessage::Publish(PublishMessage {
        topic: topic.into(),
        payload: Payload::telemetry(body.to_vec()),
    })
}

pub fn subscribe(pattern: &str) -> HubMessage {
    HubMessage::Subscribe {
        pattern: pattern.into(),
    }
}
