//! TOML configuration for the machine runtime.
//!
//! # Example
//!
//! ```toml
//! [hub]
//! address = "10.0.0.5:5560"
//! heartbeat_interval_ms = 5000
//!
//! [[machines]]
//! name = "Haas CNC"
//! kind = "haas"
//! poll_interval_ms = 500
//!
//! [[machines]]
//! name = "lathe-1"
//! kind = "cnc_lathe"
//! topic = "spindle"
//! ```
//!
//! Absent keys take their defaults; an absent file yields one simulated Haas
//! machine so the runtime can be tried without any setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::publish_telemetry::DEFAULT_TOPIC_SUFFIX;
use crate::infrastructure::machines::MachineKind;
use crate::infrastructure::network::HubConnectionConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("duplicate machine name '{0}'")]
    DuplicateMachine(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRuntimeConfig {
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub hub: HubSection,
    #[serde(default = "default_machines")]
    pub machines: Vec<MachineEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSection {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubSection {
    #[serde(default = "default_hub_address")]
    pub address: String,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

/// One `[[machines]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineEntry {
    pub name: String,
    #[serde(default)]
    pub kind: MachineKind,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Topic suffix after `machine.<name>.`.
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_hub_address() -> String {
    "127.0.0.1:5560".to_string()
}
fn default_heartbeat_interval_ms() -> u64 {
    5000
}
fn default_reconnect_interval_ms() -> u64 {
    5000
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_topic() -> String {
    DEFAULT_TOPIC_SUFFIX.to_string()
}
fn default_machines() -> Vec<MachineEntry> {
    vec![MachineEntry {
        name: "haas-vf2".to_string(),
        kind: MachineKind::Haas,
        poll_interval_ms: default_poll_interval_ms(),
        topic: default_topic(),
    }]
}

impl Default for MachineRuntimeConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeSection::default(),
            hub: HubSection::default(),
            machines: default_machines(),
        }
    }
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            address: default_hub_address(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl MachineEntry {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl MachineRuntimeConfig {
    /// Connection settings for one machine.
    pub fn connection_for(&self, machine: &MachineEntry) -> HubConnectionConfig {
        HubConnectionConfig {
            hub_addr: self.hub.address.clone(),
            identity: machine.name.clone(),
            heartbeat_interval: Duration::from_millis(self.hub.heartbeat_interval_ms.max(1)),
            reconnect_interval: Duration::from_millis(self.hub.reconnect_interval_ms),
        }
    }

    /// Rejects duplicate machine names; the hub would refuse the second
    /// `Hello` anyway.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateMachine`] naming the first repeat.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for machine in &self.machines {
            if !seen.insert(machine.name.as_str()) {
                return Err(ConfigError::DuplicateMachine(machine.name.clone()));
            }
        }
        Ok(())
    }
}

/// Loads and validates the config at `path`.  A missing file yields the
/// defaults.
///
/// # Errors
///
/// I/O errors other than "not found", TOML errors and validation errors.
pub fn load_config(path: &Path) -> Result<MachineRuntimeConfig, ConfigError> {
    let config = match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => MachineRuntimeConfig::default(),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    config.validate()?;
    Ok(config)
}
