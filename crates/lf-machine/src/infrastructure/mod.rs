//! Infrastructure layer for the machine runtime.
//!
//! Contains the hub connection, the machine adapters and configuration
//! storage.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain` and
//! `lf_core`, but MUST NOT be imported by them.

pub mod machines;
pub mod network;
pub mod storage;
