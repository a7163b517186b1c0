//! # lf-core
//!
//! Shared library for the Learning Factory hub containing the message
//! envelope, topic grammar, participant roles, the authorization policy seam,
//! and the binary wire codec.
//!
//! This crate is used by the hub server, the machine interface runtime, and
//! the WebSocket bridge.  It has zero dependencies on OS APIs, async runtimes,
//! or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! The Learning Factory hub sits between three kinds of participant:
//!
//! - **Machines** – production-line equipment (a CNC lathe, a Haas mill…)
//!   that publishes telemetry readings.
//! - **Digital Dashboard** – a human-facing monitoring/control client.
//! - **Virtual Factory** – a simulation (digital twin) of the line.
//!
//! Every piece of data travelling between them is wrapped in an
//! [`Envelope`]: a topic such as `machine.line3.press2.status`, a payload, a
//! timestamp, and a per-source sequence number.
//!
//! This crate (`lf-core`) is the shared foundation.  It defines:
//!
//! - **`domain`** – Pure rules with no I/O: what a valid [`Topic`] looks like,
//!   how a [`TopicPattern`] such as `line1.*` matches topics, which [`Role`]s
//!   exist, and the [`AuthorizationPolicy`] seam that decides whether a role
//!   may publish or subscribe to a topic.
//!
//! - **`protocol`** – How bytes travel over the network.  Messages are encoded
//!   into a compact binary format (24-byte header + payload) and decoded back
//!   into typed [`HubMessage`] values on the other end.

// Declare the two top-level modules.  Rust will look for each in a
// subdirectory with the same name (e.g., src/protocol/mod.rs).
pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `lf_core::Topic` instead of `lf_core::domain::topic::Topic`.
pub use domain::authorization::{
    Action, AllowAll, AuthorizationError, AuthorizationPolicy, Effect, PolicyRule, RulePolicy,
};
pub use domain::role::{ConnectionId, Role};
pub use domain::topic::{Topic, TopicError, TopicLimits, TopicPattern};
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::envelope::{Envelope, EnvelopeContext, EnvelopeError, Payload, PayloadKind};
pub use protocol::messages::HubMessage;
