//! lf-machine library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does lf-machine do? (for beginners)
//!
//! Every piece of equipment on the Learning Factory floor (a Haas mill, a CNC
//! lathe…) is represented by a *machine interface*: an object that can be
//! asked "what are your current readings?".  This crate runs one interface
//! per configured machine and, on a fixed interval:
//!
//! 1. Polls the machine for a snapshot of named readings (spindle speed,
//!    coolant level, axis coordinates…).
//! 2. Encodes the snapshot as a JSON document.
//! 3. Publishes it to the hub on the topic `machine.<name>.status`, where
//!    dashboards and the Virtual Factory subscribe to it.
//!
//! Talking to physical controllers (serial macros, PLC protocols) is not
//! part of this crate; [`infrastructure::machines::SimulatedMachine`]
//! produces realistic readings for demos and tests.

/// Domain layer: the machine interface seam and its data types.
pub mod domain;

/// Application layer: the poll-and-publish use case.
pub mod application;

/// Infrastructure layer: hub connection, machine adapters, configuration.
pub mod infrastructure;
