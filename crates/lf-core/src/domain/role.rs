//! Participant roles and connection identifiers.
//!
//! A role is a closed set: every client that joins the hub declares exactly
//! one of [`Role::Machine`], [`Role::Dashboard`] or [`Role::VirtualFactory`]
//! during its handshake.  What a role may do is decided by an
//! [`AuthorizationPolicy`](crate::domain::authorization::AuthorizationPolicy),
//! never by the role type itself.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The class of participant on the other end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Role {
    /// Production-line equipment publishing telemetry.
    Machine = 0x01,
    /// Human-facing monitoring and control client.
    Dashboard = 0x02,
    /// Simulation / digital twin of the line.
    VirtualFactory = 0x03,
}

impl Role {
    /// All roles, in wire-code order.
    pub const ALL: [Role; 3] = [Role::Machine, Role::Dashboard, Role::VirtualFactory];

    /// Stable lowercase name used in logs, config files and the JSON bridge.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Machine => "machine",
            Role::Dashboard => "dashboard",
            Role::VirtualFactory => "virtual_factory",
        }
    }
}

impl TryFrom<u8> for Role {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Role::Machine),
            0x02 => Ok(Role::Dashboard),
            0x03 => Ok(Role::VirtualFactory),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "machine" => Ok(Role::Machine),
            "dashboard" => Ok(Role::Dashboard),
            "virtual_factory" | "virtualfactory" | "virtual-factory" => Ok(Role::VirtualFactory),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Opaque identifier assigned by the hub to each admitted connection.
///
/// Backed by a UUID v4, so ids are never reused within a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID (used by the wire codec).
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The nil id, used in replies sent before a connection was admitted.
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
