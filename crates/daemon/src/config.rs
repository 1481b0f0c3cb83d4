//! Daemon configuration

use meshwifi_common::{MeshConfig, ShellConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// Boot settings file name, relative to the store
    pub settings_file: String,

    /// Start topology polling once the daemon is up
    pub poll_topology_at_start: bool,

    /// Mesh interface configuration
    pub mesh: MeshConfig,

    /// Command executor configuration
    pub shell: ShellConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_path: meshwifi_common::default_store_path(),
            settings_file: "settings.toml".to_string(),
            poll_topology_at_start: false,
            mesh: MeshConfig::default(),
            shell: ShellConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.mesh.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the boot settings path
    pub fn settings_path(&self) -> PathBuf {
        self.store_path.join(&self.settings_file)
    }
}
