//! User-facing mesh service
//!
//! Queues mesh requests on the controller and keeps the boot setting in step
//! with what the user last asked for.

use crate::settings::BootSettings;
use meshwifi_common::{CoarseState, MeshHandle, Result};
use tracing::{info, warn};

/// Mesh on/off request given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum MeshSwitch {
    On,
    Off,
}

impl MeshSwitch {
    pub fn enabled(self) -> bool {
        self == MeshSwitch::On
    }
}

/// Mesh service exposed to the user interface
pub struct MeshService {
    handle: MeshHandle,
    settings: BootSettings,
}

impl MeshService {
    /// Create a new service
    pub fn new(handle: MeshHandle, settings: BootSettings) -> Self {
        Self { handle, settings }
    }

    /// Queue enabling or disabling the mesh and remember the choice for boot
    ///
    /// Returns as soon as the request is queued. The outcome is reported to
    /// the controller's listeners.
    pub fn set_mesh_enabled(&self, enable: bool) -> Result<bool> {
        info!("Mesh {} requested", if enable { "enable" } else { "disable" });
        if enable {
            self.handle.request_enable()?;
        } else {
            self.handle.request_disable()?;
        }

        if let Err(e) = self.settings.set_mesh_on(enable) {
            warn!("Failed to persist mesh setting: {}", e);
        }
        Ok(true)
    }

    /// Apply the persisted boot setting
    pub fn check_and_start_mesh(&self) -> Result<()> {
        if self.settings.mesh_on()? {
            info!("Mesh enabled at boot");
            self.handle.request_enable()?;
        }
        Ok(())
    }

    /// Apply an explicit request, or the boot setting when there is none
    pub fn start(&self, request: Option<MeshSwitch>) -> Result<()> {
        match request {
            Some(switch) => self.set_mesh_enabled(switch.enabled()).map(|_| ()),
            None => self.check_and_start_mesh(),
        }
    }

    /// Queue starting or stopping topology polling
    pub fn set_topology_polling(&self, enabled: bool) -> Result<()> {
        self.handle.set_topology_polling(enabled)
    }

    pub fn mesh_enabled_state(&self) -> CoarseState {
        if self.handle.is_active() {
            CoarseState::Enabled
        } else {
            CoarseState::Disabled
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self.mesh_enabled_state() {
            CoarseState::Enabled => "enabled",
            CoarseState::Disabled => "disabled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshwifi_common::testing::ScriptedRunner;
    use meshwifi_common::{MeshConfig, MeshController, MeshEvent};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    const PROBE: &str = "ls /sys/kernel/debug/ieee80211/";
    const UP: &str = "mesh mesh0 up";
    const DOWN: &str = "mesh mesh0 down";

    fn start(dir: &TempDir) -> (MeshService, Arc<ScriptedRunner>, mpsc::UnboundedReceiver<MeshEvent>) {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(PROBE, "phy0\nphy1\n", 0).on(UP, "", 0).on(DOWN, "", 0);

        let (tx, rx) = mpsc::unbounded_channel();
        let (handle, _join) = MeshController::new(MeshConfig::default(), runner.clone())
            .with_listener(Arc::new(tx))
            .spawn();
        let settings = BootSettings::new(dir.path().join("settings.toml"));
        (MeshService::new(handle, settings), runner, rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<MeshEvent>) -> MeshEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_mesh_enabled_persists_and_queues() {
        let dir = TempDir::new().unwrap();
        let (service, runner, mut rx) = start(&dir);
        assert_eq!(service.state_name(), "disabled");

        assert!(service.set_mesh_enabled(true).unwrap());
        assert_eq!(next_event(&mut rx).await, MeshEvent::MeshEnabled);
        assert_eq!(service.mesh_enabled_state(), CoarseState::Enabled);
        assert_eq!(service.state_name(), "enabled");
        assert!(BootSettings::new(dir.path().join("settings.toml")).mesh_on().unwrap());

        assert!(service.set_mesh_enabled(false).unwrap());
        assert_eq!(next_event(&mut rx).await, MeshEvent::MeshDisabled);
        assert_eq!(service.state_name(), "disabled");
        assert!(!BootSettings::new(dir.path().join("settings.toml")).mesh_on().unwrap());

        assert_eq!(runner.count(UP), 1);
        assert_eq!(runner.count(DOWN), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_with_setting_on() {
        let dir = TempDir::new().unwrap();
        BootSettings::new(dir.path().join("settings.toml"))
            .set_mesh_on(true)
            .unwrap();
        let (service, _runner, mut rx) = start(&dir);

        service.check_and_start_mesh().unwrap();
        assert_eq!(next_event(&mut rx).await, MeshEvent::MeshEnabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_without_setting_stays_off() {
        let dir = TempDir::new().unwrap();
        let (service, runner, mut rx) = start(&dir);

        service.check_and_start_mesh().unwrap();
        service.set_topology_polling(false).unwrap();
        assert_eq!(next_event(&mut rx).await, MeshEvent::PollingDisabled);

        assert_eq!(runner.count(UP), 0);
        let content = std::fs::read_to_string(dir.path().join("settings.toml")).unwrap();
        assert_eq!(content.trim(), "mesh_on = 0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_off_overrides_boot_setting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        BootSettings::new(&path).set_mesh_on(true).unwrap();
        let (service, runner, mut rx) = start(&dir);

        service.start(Some(MeshSwitch::Off)).unwrap();
        service.set_topology_polling(false).unwrap();
        assert_eq!(next_event(&mut rx).await, MeshEvent::PollingDisabled);

        assert_eq!(runner.count(UP), 0);
        assert!(!BootSettings::new(&path).mesh_on().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_on_persists_setting() {
        let dir = TempDir::new().unwrap();
        let (service, _runner, mut rx) = start(&dir);

        service.start(Some(MeshSwitch::On)).unwrap();
        assert_eq!(next_event(&mut rx).await, MeshEvent::MeshEnabled);
        assert!(BootSettings::new(dir.path().join("settings.toml")).mesh_on().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_after_shutdown_fails() {
        let runner = Arc::new(ScriptedRunner::new());
        let (handle, join) = MeshController::new(MeshConfig::default(), runner).spawn();
        let dir = TempDir::new().unwrap();
        let service = MeshService::new(handle.clone(), BootSettings::new(dir.path().join("s.toml")));

        handle.shutdown().unwrap();
        join.await.unwrap();

        assert!(service.set_mesh_enabled(true).is_err());
    }
}
