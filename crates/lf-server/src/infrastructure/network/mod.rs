//! Network infrastructure for the hub server.
//!
//! # Sub-modules
//!
//! - **`framing`** – Buffered frame reader and serialised frame writer over
//!   any async byte stream.
//!
//! - **`tcp_server`** – The accept loop, the per-connection handshake and
//!   session task, and the [`tcp_server::TcpDeliverySink`] that writes
//!   DELIVER frames back to the client.
//!
//! - **`egress`** – Outbound links to peers that listen for the hub instead of
//!   dialling it.

pub mod egress;
pub mod framing;
pub mod tcp_server;
