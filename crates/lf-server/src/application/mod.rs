//! Application layer of the hub.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure rules in `lf_core`) and the infrastructure (sockets, files).
//!
//! Components in this layer:
//!
//! - **Orchestrate** domain objects to serve a client request (e.g., "route
//!   this telemetry reading to every dashboard subscribed to `line1.*`").
//! - **Depend on abstractions** ([`dispatch::DeliverySink`],
//!   [`lf_core::AuthorizationPolicy`]) rather than concrete transports, so
//!   the TCP and WebSocket adapters can be swapped without touching this code.
//! - **Contain no socket I/O and no file system access**.
//!
//! # Sub-modules, leaves first
//!
//! - **`connection`** – The per-connection record and its lifecycle states.
//! - **`registry`**   – Every live connection, indexed by id and identity.
//! - **`router`**     – Subscriptions and the derived topic → subscriber index.
//! - **`queue`**      – Bounded per-connection outbound queue with
//!   backpressure.
//! - **`dispatch`**   – Sharded worker pool that fans envelopes out to
//!   subscriber queues.
//! - **`session`**    – Handshake, heartbeat, drain and close.
//! - **`hub`**        – The facade that transports talk to.
//! - **`error`**      – The aggregated [`error::HubError`].

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod queue;
pub mod registry;
pub mod router;
pub mod session;
