//! TOML-based configuration for the hub.
//!
//! Reads `ServerConfig` from an explicit path or from the platform config
//! file:
//! - Windows:  `%APPDATA%\LFServer\config.toml`
//! - Linux:    `~/.config/lfserver/config.toml`
//! - macOS:    `~/Library/Application Support/LFServer/config.toml`
//!
//! # Example
//!
//! ```toml
//! [network]
//! bind_address = "0.0.0.0"
//! port = 5560
//!
//! [session]
//! heartbeat_interval_ms = 5000
//! missed_heartbeats = 3
//!
//! [dispatch]
//! backpressure = "drop_oldest"
//!
//! [authorization]
//! default_effect = "allow"
//! max_violations = 5
//!
//! [[authorization.rules]]
//! role = "dashboard"
//! action = "publish"
//! pattern = "machine.*"
//! effect = "deny"
//!
//! [[egress]]
//! identity = "digital-dashboard"
//! role = "dashboard"
//! address = "10.0.0.20:5570"
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "...")]`, so a file only needs the
//! keys it changes and an absent file means "all defaults".

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lf_core::protocol::EnvelopeLimits;
use lf_core::{AllowAll, AuthorizationPolicy, Effect, PolicyRule, Role, RulePolicy, TopicLimits};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::dispatch::DispatchConfig;
use crate::application::hub::HubConfig;
use crate::application::queue::BackpressurePolicy;
use crate::application::session::SessionConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level hub configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub envelope: EnvelopeSection,
    #[serde(default)]
    pub authorization: AuthorizationSection,
    /// Peers the hub dials out to at start-up.
    #[serde(default)]
    pub egress: Vec<EgressTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// IP address to bind the listener to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_missed_heartbeats")]
    pub missed_heartbeats: u32,
    #[serde(default = "default_drain_deadline_ms")]
    pub drain_deadline_ms: u64,
    #[serde(default)]
    pub allow_multiple_sessions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchSection {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_inbound_capacity")]
    pub inbound_queue_capacity: usize,
    #[serde(default = "default_outbound_capacity")]
    pub outbound_queue_capacity: usize,
    #[serde(default)]
    pub backpressure: BackpressurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvelopeSection {
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_max_topic_length")]
    pub max_topic_length: usize,
    #[serde(default = "default_max_topic_segments")]
    pub max_topic_segments: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationSection {
    /// Effect when no rule matches.
    #[serde(default)]
    pub default_effect: Effect,
    /// Violations tolerated before a connection is closed.  Absent: never.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_violations: Option<u32>,
    /// Evaluated in order; the first matching rule wins.
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

/// A peer the hub connects to and feeds, as if it had connected itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EgressTarget {
    pub identity: String,
    pub role: Role,
    /// `host:port` of the peer's hub-protocol listener.
    pub address: String,
    /// Patterns subscribed on the peer's behalf.
    #[serde(default = "default_egress_patterns")]
    pub subscribe: Vec<String>,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5560
}
fn default_handshake_timeout_ms() -> u64 {
    5_000
}
fn default_heartbeat_interval_ms() -> u64 {
    5_000
}
fn default_missed_heartbeats() -> u32 {
    3
}
fn default_drain_deadline_ms() -> u64 {
    5_000
}
fn default_workers() -> usize {
    4
}
fn default_inbound_capacity() -> usize {
    1024
}
fn default_outbound_capacity() -> usize {
    256
}
fn default_max_payload_bytes() -> usize {
    64 * 1024
}
fn default_max_topic_length() -> usize {
    256
}
fn default_max_topic_segments() -> usize {
    16
}
fn default_egress_patterns() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_retry_interval_ms() -> u64 {
    2_000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            missed_heartbeats: default_missed_heartbeats(),
            drain_deadline_ms: default_drain_deadline_ms(),
            allow_multiple_sessions: false,
        }
    }
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            inbound_queue_capacity: default_inbound_capacity(),
            outbound_queue_capacity: default_outbound_capacity(),
            backpressure: BackpressurePolicy::default(),
        }
    }
}

impl Default for EnvelopeSection {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            max_topic_length: default_max_topic_length(),
            max_topic_segments: default_max_topic_segments(),
        }
    }
}

// ── Conversion into runtime types ─────────────────────────────────────────────

impl ServerConfig {
    /// Builds the runtime [`HubConfig`].
    pub fn to_hub_config(&self) -> HubConfig {
        HubConfig {
            session: SessionConfig {
                handshake_timeout: Duration::from_millis(self.session.handshake_timeout_ms),
                heartbeat_interval: Duration::from_millis(self.session.heartbeat_interval_ms.max(1)),
                missed_heartbeats: self.session.missed_heartbeats,
                drain_deadline: Duration::from_millis(self.session.drain_deadline_ms),
                allow_multiple_sessions: self.session.allow_multiple_sessions,
                max_violations: self.authorization.max_violations,
                outbound_queue_capacity: self.dispatch.outbound_queue_capacity,
            },
            dispatch: DispatchConfig {
                workers: self.dispatch.workers,
                inbound_queue_capacity: self.dispatch.inbound_queue_capacity,
                backpressure: self.dispatch.backpressure,
            },
            envelope: EnvelopeLimits {
                max_payload_bytes: self.envelope.max_payload_bytes,
                topic: TopicLimits {
                    max_length: self.envelope.max_topic_length,
                    max_segments: self.envelope.max_topic_segments,
                },
            },
        }
    }

    /// Builds the authorization policy.  With no rules and an `allow`
    /// default this is [`AllowAll`].
    pub fn build_policy(&self) -> Arc<dyn AuthorizationPolicy> {
        let auth = &self.authorization;
        if auth.rules.is_empty() && auth.default_effect == Effect::Allow {
            Arc::new(AllowAll)
        } else {
            Arc::new(RulePolicy::new(auth.rules.clone(), auth.default_effect))
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the platform config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(platform_config_dir()
        .ok_or(ConfigError::NoPlatformConfigDir)?
        .join("config.toml"))
}

/// Loads `ServerConfig` from `path` (or the platform file), returning the
/// defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Writes `config` to `path` (or the platform file), creating the directory
/// if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &ServerConfig, path: Option<&Path>) -> Result<(), ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("LFServer"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("lfserver"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("LFServer")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
