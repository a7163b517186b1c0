//! Domain layer for lf-web-bridge.
//!
//! Message types (the JSON "language" between browser and bridge) and the
//! bridge configuration.  Nothing here touches a socket.

pub mod config;
pub mod messages;

pub use config::BridgeConfig;
pub use messages::{BrowserToHubMsg, HubToBrowserMsg};
