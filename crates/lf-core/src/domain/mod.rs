//! Domain rules for the Learning Factory hub.
//!
//! This module contains pure business logic with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! Clean Architecture organises code into concentric layers.  The innermost
//! layer is called the **domain**.  Domain code:
//!
//! - Contains the core rules of the application.
//! - Has **no** imports from OS APIs, network libraries, or async runtimes.
//! - Can be compiled and tested on any platform without any external setup.
//!
//! For the hub, the domain answers three questions:
//!
//! 1. *Who is talking?* – [`role::Role`] and [`role::ConnectionId`].
//! 2. *What are they talking about?* – [`topic::Topic`] and
//!    [`topic::TopicPattern`].
//! 3. *Are they allowed to?* – [`authorization::AuthorizationPolicy`].

/// Authorization policy over (role, topic, action).
pub mod authorization;
/// Participant roles and connection identifiers.
pub mod role;
/// Hierarchical topics and subscription patterns.
pub mod topic;
