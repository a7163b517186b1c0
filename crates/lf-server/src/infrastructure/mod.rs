//! Infrastructure layer for the hub server.
//!
//! Contains OS-facing adapters: the TCP listener, outbound egress links and
//! file-system storage for the configuration.
//!
//! **Dependency rule**: this layer may depend on `application` and `lf_core`,
//! but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
