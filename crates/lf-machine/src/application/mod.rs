//! Application layer use cases for the machine runtime.
//!
//! - **`publish_telemetry`** – Polls one machine and publishes the snapshot
//!   through an injected [`publish_telemetry::TelemetryPublisher`], which the
//!   binary backs with a hub connection and the tests back with a mock.

pub mod publish_telemetry;
