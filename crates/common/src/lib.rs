//! MeshWifi Common Library
//!
//! Mesh interface lifecycle, topology collection, and network state
//! publication shared by the daemon and its tests.

pub mod bridge;
pub mod config;
pub mod controller;
pub mod error;
pub mod shell;
pub mod topology;
pub mod tracker;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use bridge::{
    ChannelEvent, ChannelId, StateBridge, StateChange, SubscriberChannel, MAX_SIGNAL_STRENGTH,
};
pub use config::{MeshConfig, OutputCapture, ShellConfig};
pub use controller::{MeshController, MeshHandle, MeshListener};
pub use error::{Error, Result};
pub use shell::{CommandRunner, ShellExecutor};
pub use topology::TopologyCollector;
pub use tracker::{LinkProperties, NetworkTracker, SystemInterfaces, TrackerEvent};
pub use types::*;

/// MeshWifi version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".meshwifi")
}

/// Default daemon configuration path
pub fn default_config_path() -> std::path::PathBuf {
    default_store_path().join("config.toml")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
