//! PublishTelemetryUseCase: poll a machine, encode, publish.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use lf_core::{Payload, Topic, TopicError};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::machine::{telemetry_topic, MachineData, MachineError, MachineInterface};

/// Topic suffix used when a machine entry does not name one.
pub const DEFAULT_TOPIC_SUFFIX: &str = "status";

#[derive(Debug, Error)]
pub enum PublishError {
    /// No admitted hub connection at the moment.
    #[error("not connected to the hub")]
    NotConnected,

    #[error("hub transport error: {0}")]
    Transport(String),
}

/// Where telemetry goes.  Implemented by the hub connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetryPublisher: Send + Sync {
    /// # Errors
    ///
    /// Returns [`PublishError`] if the payload could not be handed to the hub.
    async fn publish(&self, topic: &Topic, payload: Payload) -> Result<(), PublishError>;
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error(transparent)]
    Machine(#[from] MachineError),

    #[error("failed to encode readings: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Polls one machine and publishes each snapshot as JSON telemetry.
pub struct PublishTelemetryUseCase {
    machine: Arc<dyn MachineInterface>,
    publisher: Arc<dyn TelemetryPublisher>,
    topic: Topic,
    published: u64,
}

impl PublishTelemetryUseCase {
    /// # Errors
    ///
    /// Returns [`TopicError`] if the machine name and suffix do not form a
    /// valid topic.
    pub fn new(
        machine: Arc<dyn MachineInterface>,
        publisher: Arc<dyn TelemetryPublisher>,
        topic_suffix: &str,
    ) -> Result<Self, TopicError> {
        let topic = telemetry_topic(machine.name(), topic_suffix)?;
        Ok(Self {
            machine,
            publisher,
            topic,
            published: 0,
        })
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Snapshots handed to the publisher so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// One poll → encode → publish cycle.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError`] if any step fails; nothing is published in
    /// that case.
    pub async fn poll_and_publish(&mut self) -> Result<MachineData, TelemetryError> {
        let data = self.machine.poll_machine().await?;
        let body = serde_json::to_vec(&data)?;
        self.publisher.publish(&self.topic, Payload::telemetry(body)).await?;
        self.published += 1;
        debug!(topic = %self.topic, fields = data.len(), "telemetry published");
        Ok(data)
    }

    /// Polls every `interval` until `running` is cleared.  Failed cycles are
    /// logged and skipped.
    pub async fn run(mut self, interval: Duration, running: Arc<AtomicBool>) {
        info!(machine = self.machine.name(), topic = %self.topic, ?interval, "machine interface started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while running.load(Ordering::Relaxed) {
            ticker.tick().await;
            match self.poll_and_publish().await {
                Ok(_) => {}
                Err(TelemetryError::Publish(PublishError::NotConnected)) => {
                    debug!(machine = self.machine.name(), "hub not connected; reading skipped");
                }
                Err(e) => warn!(machine = self.machine.name(), "telemetry cycle failed: {e}"),
            }
        }
        info!(machine = self.machine.name(), published = self.published, "machine interface stopped");
    }
}
