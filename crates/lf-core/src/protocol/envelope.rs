//! The message envelope: the unit the hub routes.
//!
//! An [`Envelope`] is immutable once built.  Fan-out to many subscribers
//! shares one `Arc<Envelope>` rather than copying the payload.
//!
//! # Building an envelope (for beginners)
//!
//! Inbound publish requests carry a *raw* topic string and a payload.  Before
//! anything is routed, [`Envelope::build`] runs three checks, in order:
//!
//! 1. the topic parses under the configured [`TopicLimits`],
//! 2. the payload body is no larger than `max_payload_bytes`,
//! 3. the sender's role is authorized to publish to that topic.
//!
//! Only after all three pass does it draw the next sequence number from the
//! sender's [`SequenceCounter`].  A rejected publish therefore never burns a
//! sequence number, and a gap seen by a subscriber always means a message
//! was dropped after acceptance (for example by drop-oldest backpressure).

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::authorization::{Action, AuthorizationError, AuthorizationPolicy};
use crate::domain::role::{ConnectionId, Role};
use crate::domain::topic::{Topic, TopicError, TopicLimits, TopicPattern};
use crate::protocol::sequence::SequenceCounter;

// ── Payload ───────────────────────────────────────────────────────────────────

/// What a payload body represents.  The hub never looks inside the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PayloadKind {
    /// A machine reading (spindle speed, coolant level…).
    Telemetry = 0x01,
    /// An instruction for a machine or the simulation.
    Command = 0x02,
    /// A discrete occurrence (alarm raised, job finished…).
    Event = 0x03,
    /// A Virtual Factory simulation step.
    SimulationTick = 0x04,
}

impl TryFrom<u8> for PayloadKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(PayloadKind::Telemetry),
            0x02 => Ok(PayloadKind::Command),
            0x03 => Ok(PayloadKind::Event),
            0x04 => Ok(PayloadKind::SimulationTick),
            _ => Err(()),
        }
    }
}

/// Typed, opaque message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub kind: PayloadKind,
    pub body: Vec<u8>,
}

impl Payload {
    pub fn new(kind: PayloadKind, body: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    pub fn telemetry(body: impl Into<Vec<u8>>) -> Self {
        Self::new(PayloadKind::Telemetry, body)
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

// ── Limits and context ────────────────────────────────────────────────────────

/// Size limits applied by [`Envelope::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeLimits {
    pub max_payload_bytes: usize,
    pub topic: TopicLimits,
}

impl Default for EnvelopeLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: 64 * 1024,
            topic: TopicLimits::default(),
        }
    }
}

/// Everything [`Envelope::build`] needs to know about the sender.
pub struct EnvelopeContext<'a> {
    pub source: ConnectionId,
    pub role: Role,
    pub sequence: &'a SequenceCounter,
    pub limits: &'a EnvelopeLimits,
    pub policy: &'a dyn AuthorizationPolicy,
}

/// Reasons a publish request is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("invalid topic: {0}")]
    Topic(#[from] TopicError),

    #[error("payload is {size} bytes, limit is {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error(transparent)]
    Unauthorized(#[from] AuthorizationError),
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// An accepted, routable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    source: ConnectionId,
    topic: Topic,
    payload: Payload,
    timestamp_us: u64,
    sequence: u64,
}

impl Envelope {
    /// Validates a publish request and stamps it with the sender's next
    /// sequence number and the current time.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::Topic`] if `raw_topic` is malformed.
    /// - [`EnvelopeError::PayloadTooLarge`] if the body exceeds the limit.
    /// - [`EnvelopeError::Unauthorized`] if the policy refuses the publish.
    pub fn build(
        ctx: &EnvelopeContext<'_>,
        raw_topic: &str,
        payload: Payload,
    ) -> Result<Self, EnvelopeError> {
        let topic = Topic::parse_with(raw_topic, &ctx.limits.topic)?;

        if payload.len() > ctx.limits.max_payload_bytes {
            return Err(EnvelopeError::PayloadTooLarge {
                size: payload.len(),
                max: ctx.limits.max_payload_bytes,
            });
        }

        let subject = TopicPattern::from(topic.clone());
        ctx.policy.authorize(ctx.role, &subject, Action::Publish)?;

        Ok(Self {
            source: ctx.source,
            topic,
            payload,
            timestamp_us: now_us(),
            sequence: ctx.sequence.next(),
        })
    }

    /// Reassembles an envelope received from the hub (no validation beyond
    /// the topic type itself).
    pub fn from_parts(
        source: ConnectionId,
        topic: Topic,
        payload: Payload,
        timestamp_us: u64,
        sequence: u64,
    ) -> Self {
        Self {
            source,
            topic,
            payload,
            timestamp_us,
            sequence,
        }
    }

    pub fn source(&self) -> ConnectionId {
        self.source
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Microseconds since the Unix epoch at acceptance.
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    /// Per-source sequence number, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} from {} ({} bytes)",
            self.topic,
            self.sequence,
            self.source,
            self.payload.len()
        )
    }
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::authorization::{AllowAll, Effect, PolicyRule, RulePolicy};

    struct Fixture {
        sequence: SequenceCounter,
        limits: EnvelopeLimits,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                sequence: SequenceCounter::new(),
                limits: EnvelopeLimits::default(),
            }
        }

        fn ctx<'a>(&'a self, role: Role, policy: &'a dyn AuthorizationPolicy) -> EnvelopeContext<'a> {
            EnvelopeContext {
                source: ConnectionId::nil(),
                role,
                sequence: &self.sequence,
                limits: &self.limits,
                policy,
            }
        }
    }

    #[test]
    fn test_build_normalises_topic_and_stamps_first_sequence() {
        // Arrange
        let fx = Fixture::new();
        let ctx = fx.ctx(Role::Machine, &AllowAll);

        // Act
        let env = Envelope::build(&ctx, "line1/temp", Payload::telemetry(b"72".to_vec()))
            .expect("accepted");

        // Assert
        assert_eq!(env.topic().as_str(), "line1.temp");
        assert_eq!(env.sequence(), 1);
        assert_eq!(env.payload().body, b"72");
        assert!(env.timestamp_us() > 0);
    }

    #[test]
    fn test_build_sequences_strictly_increase() {
        let fx = Fixture::new();
        let ctx = fx.ctx(Role::Machine, &AllowAll);

        let seqs: Vec<u64> = (0..5)
            .map(|_| {
                Envelope::build(&ctx, "a.b", Payload::telemetry(Vec::new()))
                    .expect("accepted")
                    .sequence()
            })
            .collect();

        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_build_rejects_malformed_topic_without_consuming_sequence() {
        let fx = Fixture::new();
        let ctx = fx.ctx(Role::Machine, &AllowAll);

        let err = Envelope::build(&ctx, "line1..temp", Payload::telemetry(Vec::new())).unwrap_err();
        assert!(matches!(err, EnvelopeError::Topic(TopicError::EmptySegment { .. })));

        let next = Envelope::build(&ctx, "line1.temp", Payload::telemetry(Vec::new())).unwrap();
        assert_eq!(next.sequence(), 1);
    }

    #[test]
    fn test_build_rejects_oversized_payload() {
        let mut fx = Fixture::new();
        fx.limits.max_payload_bytes = 4;
        let ctx = fx.ctx(Role::Machine, &AllowAll);

        let err = Envelope::build(&ctx, "a", Payload::telemetry(vec![0u8; 5])).unwrap_err();
        assert_eq!(err, EnvelopeError::PayloadTooLarge { size: 5, max: 4 });
    }

    #[test]
    fn test_build_accepts_payload_at_exact_limit() {
        let mut fx = Fixture::new();
        fx.limits.max_payload_bytes = 4;
        let ctx = fx.ctx(Role::Machine, &AllowAll);

        assert!(Envelope::build(&ctx, "a", Payload::telemetry(vec![0u8; 4])).is_ok());
    }

    #[test]
    fn test_build_rejects_unauthorized_publish() {
        // Arrange
        let fx = Fixture::new();
        let policy = RulePolicy::new(
            vec![PolicyRule {
                role: Some(Role::Dashboard),
                action: Some(Action::Publish),
                pattern: TopicPattern::parse("machine.*").unwrap(),
                effect: Effect::Deny,
            }],
            Effect::Allow,
        );
        let ctx = fx.ctx(Role::Dashboard, &policy);

        // Act
        let err = Envelope::build(
            &ctx,
            "machine.press2.command",
            Payload::new(PayloadKind::Command, b"stop".to_vec()),
        )
        .unwrap_err();

        // Assert
        assert!(matches!(err, EnvelopeError::Unauthorized(_)));
        assert_eq!(fx.sequence.last_issued(), 0);
    }

    #[test]
    fn test_payload_kind_try_from() {
        assert_eq!(PayloadKind::try_from(0x04), Ok(PayloadKind::SimulationTick));
        assert!(PayloadKind::try_from(0x05).is_err());
    }
}
