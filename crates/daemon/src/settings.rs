//! Persisted boot settings
//!
//! A single integer, `mesh_on`, records whether the mesh should come up when
//! the daemon starts.

use meshwifi_common::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    mesh_on: Option<i64>,
}

/// Boot settings stored as TOML in the daemon's store directory
pub struct BootSettings {
    path: PathBuf,
}

impl BootSettings {
    /// Create a settings store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Whether the mesh should be on at boot; a missing setting is stored as off
    pub fn mesh_on(&self) -> Result<bool> {
        let mut file = self.read()?;
        match file.mesh_on {
            Some(value) => Ok(value == 1),
            None => {
                info!("No mesh_on setting in {}, storing 0", self.path.display());
                file.mesh_on = Some(0);
                self.write(&file)?;
                Ok(false)
            }
        }
    }

    /// Persist the boot setting
    pub fn set_mesh_on(&self, enabled: bool) -> Result<()> {
        let mut file = self.read()?;
        file.mesh_on = Some(i64::from(enabled));
        self.write(&file)?;
        debug!("Stored mesh_on={} in {}", enabled as u8, self.path.display());
        Ok(())
    }

    fn read(&self) -> Result<SettingsFile> {
        if !self.path.exists() {
            return Ok(SettingsFile::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }

    fn write(&self, file: &SettingsFile) -> Result<()> {
        let content = toml::to_string(file)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}
