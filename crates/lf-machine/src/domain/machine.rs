//! The machine interface seam.
//!
//! A machine adapter knows how to talk to one kind of equipment and returns
//! a [`MachineData`] snapshot each time it is polled.  Everything above this
//! trait (publishing, scheduling, reconnecting) is shared by all adapters.

use std::collections::BTreeMap;

use async_trait::async_trait;
use lf_core::{Topic, TopicError};
use thiserror::Error;

/// One poll result: reading name → value.
///
/// A `BTreeMap` keeps the keys sorted so the published JSON is stable from
/// one poll to the next.
pub type MachineData = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum MachineError {
    /// The controller did not answer.
    #[error("machine '{0}' is unreachable")]
    Unreachable(String),

    /// The controller answered with something that could not be parsed.
    #[error("malformed reading '{field}': {detail}")]
    MalformedReading { field: String, detail: String },
}

/// Adapter for one physical or simulated machine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MachineInterface: Send + Sync {
    /// Configured machine name, e.g. `haas-vf2`.
    fn name(&self) -> &str;

    /// Reads the machine's current state.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError`] if the machine cannot be read.
    async fn poll_machine(&self) -> Result<MachineData, MachineError>;
}

/// Turns a free-form machine name into a single topic segment.
///
/// Letters, digits, `_` and `-` are kept (letters lower-cased); every other
/// run of characters becomes one `-`.  `"Haas CNC"` becomes `haas-cnc`.
pub fn topic_segment(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// The topic a machine publishes its readings on: `machine.<name>.<suffix>`.
///
/// # Errors
///
/// Returns [`TopicError`] if the name has no usable characters or the
/// suffix is not a valid topic tail.
pub fn telemetry_topic(name: &str, suffix: &str) -> Result<Topic, TopicError> {
    Topic::parse(&format!("machine.{}.{suffix}", topic_segment(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_segment_lowercases_and_collapses_separators() {
        assert_eq!(topic_segment("Haas CNC"), "haas-cnc");
        assert_eq!(topic_segment("  CNC  Lathe #2 "), "cnc-lathe-2");
        assert_eq!(topic_segment("press_3-b"), "press_3-b");
    }

    #[test]
    fn test_telemetry_topic_uses_machine_prefix() {
        let topic = telemetry_topic("Haas CNC", "status").expect("topic");
        assert_eq!(topic.as_str(), "machine.haas-cnc.status");
    }

    #[test]
    fn test_telemetry_topic_accepts_nested_suffix() {
        let topic = telemetry_topic("lathe", "spindle/speed").expect("topic");
        assert_eq!(topic.as_str(), "machine.lathe.spindle.speed");
    }

    #[test]
    fn test_telemetry_topic_rejects_unusable_name() {
        assert_eq!(
            telemetry_topic("###", "status"),
            Err(TopicError::EmptySegment { position: 1 })
        );
    }
}
