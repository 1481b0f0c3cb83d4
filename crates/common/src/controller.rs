//! Mesh lifecycle controller
//!
//! A single worker task owns the mesh state and processes a strictly ordered
//! mailbox of actions. Every mesh-affecting command, including topology polls,
//! runs on that worker, so no two mesh commands ever race. Callers hold a
//! cheap [`MeshHandle`] and learn outcomes through [`MeshListener`]s.

use crate::config::MeshConfig;
use crate::shell::CommandRunner;
use crate::topology::TopologyCollector;
use crate::types::{CommandResult, MeshEvent};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Receives controller notifications, in order, on the worker task
pub trait MeshListener: Send + Sync {
    fn on_event(&self, event: &MeshEvent);
}

impl MeshListener for mpsc::UnboundedSender<MeshEvent> {
    fn on_event(&self, event: &MeshEvent) {
        let _ = self.send(event.clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MeshAction {
    Enable,
    Disable,
    SetPolling(bool),
    Shutdown,
}

/// Handle used to queue actions on a running controller
#[derive(Clone)]
pub struct MeshHandle {
    tx: mpsc::UnboundedSender<MeshAction>,
    active: Arc<AtomicBool>,
}

impl MeshHandle {
    /// Queue bringing the mesh interface up
    pub fn request_enable(&self) -> Result<()> {
        self.send(MeshAction::Enable)
    }

    /// Queue bringing the mesh interface down
    pub fn request_disable(&self) -> Result<()> {
        self.send(MeshAction::Disable)
    }

    /// Queue starting or stopping periodic topology polling
    pub fn set_topology_polling(&self, enabled: bool) -> Result<()> {
        self.send(MeshAction::SetPolling(enabled))
    }

    /// Stop the worker once the actions queued before this one are done
    pub fn shutdown(&self) -> Result<()> {
        self.send(MeshAction::Shutdown)
    }

    /// Last committed value of the mesh active flag
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn send(&self, action: MeshAction) -> Result<()> {
        self.tx.send(action).map_err(|_| Error::ControllerStopped)
    }
}

/// Mesh controller worker state
pub struct MeshController {
    config: MeshConfig,
    runner: Arc<dyn CommandRunner>,
    collector: TopologyCollector,
    listeners: Vec<Arc<dyn MeshListener>>,
    /// Written only by the worker
    active: Arc<AtomicBool>,
    /// When the next topology poll is due, if polling is scheduled
    next_poll: Option<Instant>,
}

impl MeshController {
    /// Create a new controller
    pub fn new(config: MeshConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            collector: TopologyCollector::new(config.clone(), runner.clone()),
            config,
            runner,
            listeners: Vec::new(),
            active: Arc::new(AtomicBool::new(false)),
            next_poll: None,
        }
    }

    /// Register a listener for controller notifications
    pub fn with_listener(mut self, listener: Arc<dyn MeshListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Start the worker task
    pub fn spawn(self) -> (MeshHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = MeshHandle {
            tx,
            active: self.active.clone(),
        };
        let join = tokio::spawn(self.run(rx));
        (handle, join)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<MeshAction>) {
        info!("Mesh controller started for {}", self.config.interface);

        loop {
            tokio::select! {
                // Queued actions win over a due poll so a disable can cancel it.
                biased;

                action = rx.recv() => match action {
                    Some(MeshAction::Shutdown) | None => break,
                    Some(action) => self.perform(action).await,
                },
                _ = poll_due(self.next_poll) => self.poll_cycle().await,
            }
        }

        info!("Mesh controller stopped");
    }

    async fn perform(&mut self, action: MeshAction) {
        debug!("Received action: {:?}", action);

        let result = match action {
            MeshAction::Enable => self.enable_mesh().await,
            MeshAction::Disable => self.disable_mesh().await,
            MeshAction::SetPolling(true) => {
                self.next_poll = Some(Instant::now());
                self.emit(MeshEvent::PollingEnabled);
                Ok(())
            }
            MeshAction::SetPolling(false) => {
                self.next_poll = None;
                self.emit(MeshEvent::PollingDisabled);
                Ok(())
            }
            MeshAction::Shutdown => Ok(()),
        };

        if let Err(e) = result {
            error!("Mesh action {:?} failed: {}", action, e);
            self.emit(MeshEvent::ShellFailure {
                reason: e.to_string(),
            });
        }
    }

    async fn enable_mesh(&mut self) -> Result<()> {
        if self.is_active() {
            debug!("Mesh already active, ignoring enable");
            return Ok(());
        }

        let found = self.count_devices().await?;
        if found < self.config.min_devices {
            warn!(
                "Only {} mesh device(s) present, need {}",
                found, self.config.min_devices
            );
            self.emit(MeshEvent::DeviceUnavailable {
                found,
                required: self.config.min_devices,
            });
            return Ok(());
        }

        let command = self.config.interface_up_command();
        let output = self.run_command(&command).await?;
        if output.success() {
            self.active.store(true, Ordering::Release);
            info!("Mesh interface {} is up", self.config.interface);
            self.emit(MeshEvent::MeshEnabled);
        } else {
            warn!("`{}` failed: {}", command, output.stderr);
            self.emit(MeshEvent::InterfaceFailure {
                command,
                stderr: output.stderr,
            });
        }

        Ok(())
    }

    async fn disable_mesh(&mut self) -> Result<()> {
        if !self.is_active() {
            debug!("Mesh already inactive, ignoring disable");
            return Ok(());
        }

        if self.next_poll.take().is_some() {
            debug!("Cancelled scheduled topology poll");
        }

        let command = self.config.interface_down_command();
        let output = self.run_command(&command).await?;
        if output.success() {
            self.active.store(false, Ordering::Release);
            info!("Mesh interface {} is down", self.config.interface);
            self.emit(MeshEvent::MeshDisabled);
        } else {
            warn!("`{}` failed: {}", command, output.stderr);
            self.emit(MeshEvent::InterfaceFailure {
                command,
                stderr: output.stderr,
            });
        }

        Ok(())
    }

    /// One polling cycle; the next one is scheduled from this cycle's end
    async fn poll_cycle(&mut self) {
        self.next_poll = None;

        match self.collector.collect().await {
            Ok(peers) => {
                for peer in peers {
                    self.emit(MeshEvent::PeerDiscovered(peer));
                }
            }
            Err(e) => {
                warn!("Topology poll failed: {}", e);
                self.emit(MeshEvent::ShellFailure {
                    reason: e.to_string(),
                });
            }
        }

        self.next_poll = Some(Instant::now() + self.config.poll_interval());
    }

    async fn count_devices(&self) -> Result<usize> {
        let output = self
            .run_command(&self.config.device_probe_command())
            .await?;
        Ok(output
            .stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count())
    }

    async fn run_command(&self, command_line: &str) -> Result<CommandResult> {
        if self.config.elevated {
            self.runner.execute_elevated(command_line).await
        } else {
            self.runner.execute(command_line).await
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn emit(&self, event: MeshEvent) {
        for listener in &self.listeners {
            listener.on_event(&event);
        }
    }
}

async fn poll_due(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use crate::types::PeerRecord;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const DEVICES: &str = "ls /sys/kernel/debug/ieee80211/";
    const UP: &str = "mesh mesh0 up";
    const DOWN: &str = "mesh mesh0 down";
    const STATIONS: &str = "mesh mesh0 stations";

    fn scripted_mesh() -> Arc<ScriptedRunner> {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on(DEVICES, "phy0\nphy1", 0)
            .on(UP, "", 0)
            .on(DOWN, "", 0)
            .on(STATIONS, "", 0);
        runner
    }

    fn start(runner: Arc<ScriptedRunner>) -> (MeshHandle, mpsc::UnboundedReceiver<MeshEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (handle, _join) = MeshController::new(MeshConfig::default(), runner)
            .with_listener(Arc::new(tx))
            .spawn();
        (handle, rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<MeshEvent>) -> MeshEvent {
        tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for mesh event")
            .expect("controller dropped its listener")
    }

    /// Wait until every action queued before this call has been processed
    async fn drain(handle: &MeshHandle, rx: &mut mpsc::UnboundedReceiver<MeshEvent>) -> Vec<MeshEvent> {
        handle.set_topology_polling(false).unwrap();
        let mut seen = Vec::new();
        loop {
            match next_event(rx).await {
                MeshEvent::PollingDisabled => return seen,
                other => seen.push(other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_twice_runs_up_once() {
        let runner = scripted_mesh();
        let (handle, mut rx) = start(runner.clone());

        handle.request_enable().unwrap();
        handle.request_enable().unwrap();
        let events = drain(&handle, &mut rx).await;

        assert_eq!(events, vec![MeshEvent::MeshEnabled]);
        assert_eq!(runner.count(UP), 1);
        assert!(handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_when_disabled_issues_no_command() {
        let runner = scripted_mesh();
        let (handle, mut rx) = start(runner.clone());

        handle.request_disable().unwrap();
        let events = drain(&handle, &mut rx).await;

        assert!(events.is_empty());
        assert!(runner.calls().is_empty());
        assert!(!handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_then_disable() {
        let runner = scripted_mesh();
        let (handle, mut rx) = start(runner.clone());

        handle.request_enable().unwrap();
        assert_eq!(next_event(&mut rx).await, MeshEvent::MeshEnabled);
        handle.request_disable().unwrap();
        assert_eq!(next_event(&mut rx).await, MeshEvent::MeshDisabled);

        assert_eq!(runner.count(DOWN), 1);
        assert!(!handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_device_unavailable() {
        let runner = scripted_mesh();
        runner.on(DEVICES, "phy0", 0);
        let (handle, mut rx) = start(runner.clone());

        handle.request_enable().unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            MeshEvent::DeviceUnavailable {
                found: 1,
                required: 2
            }
        );
        assert_eq!(runner.count(UP), 0);
        assert!(!handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_interface_failure_keeps_flag() {
        let runner = scripted_mesh();
        runner.on_stderr(UP, "mesh0: operation not supported", 1);
        let (handle, mut rx) = start(runner);

        handle.request_enable().unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            MeshEvent::InterfaceFailure {
                command: UP.to_string(),
                stderr: "mesh0: operation not supported".to_string(),
            }
        );
        assert!(!handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_failure_does_not_stop_worker() {
        let runner = scripted_mesh();
        runner.fail(UP, "spawn failed");
        let (handle, mut rx) = start(runner.clone());

        handle.request_enable().unwrap();
        let event = next_event(&mut rx).await;
        assert!(matches!(event, MeshEvent::ShellFailure { .. }));
        assert!(!handle.is_active());

        runner.on(UP, "", 0);
        handle.request_enable().unwrap();
        assert_eq!(next_event(&mut rx).await, MeshEvent::MeshEnabled);
        assert!(handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_delivers_peers() {
        let runner = scripted_mesh();
        runner
            .on(STATIONS, "02:00:00:01:02:03, x, y, up", 0)
            .on("ping -f -c 3 -W 2 10.1.2.3", "", 1)
            .on("mesh mesh0 02:00:00:01:02:03 nexthop", "02:00:00:01:02:03", 0);
        let (handle, mut rx) = start(runner);

        handle.set_topology_polling(true).unwrap();
        assert_eq!(next_event(&mut rx).await, MeshEvent::PollingEnabled);
        assert_eq!(
            next_event(&mut rx).await,
            MeshEvent::PeerDiscovered(PeerRecord {
                address: "02:00:00:01:02:03".to_string(),
                status: "up".to_string(),
                derived_address: Ipv4Addr::new(10, 1, 2, 3),
                next_hop: "02:00:00:01:02:03".to_string(),
                latency_millis: -1,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_keeps_polling() {
        let runner = scripted_mesh();
        runner.fail(STATIONS, "mesh tool missing");
        let (handle, mut rx) = start(runner.clone());

        handle.set_topology_polling(true).unwrap();
        assert_eq!(next_event(&mut rx).await, MeshEvent::PollingEnabled);
        assert!(matches!(next_event(&mut rx).await, MeshEvent::ShellFailure { .. }));
        assert!(matches!(next_event(&mut rx).await, MeshEvent::ShellFailure { .. }));
        assert!(runner.count(STATIONS) >= 2);
        assert!(!handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_period_measured_from_cycle_end() {
        let runner = scripted_mesh();
        runner.delay(STATIONS, Duration::from_millis(300));
        let (handle, _rx) = start(runner.clone());

        handle.set_topology_polling(true).unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        let starts = runner.started_at(STATIONS);
        assert!(starts.len() >= 3);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_cancels_scheduled_poll() {
        let runner = scripted_mesh();
        let (handle, mut rx) = start(runner.clone());

        handle.request_enable().unwrap();
        assert_eq!(next_event(&mut rx).await, MeshEvent::MeshEnabled);
        handle.set_topology_polling(true).unwrap();
        assert_eq!(next_event(&mut rx).await, MeshEvent::PollingEnabled);

        // First cycle runs immediately, the next one is due a second later
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(runner.count(STATIONS), 1);

        handle.request_disable().unwrap();
        assert_eq!(next_event(&mut rx).await, MeshEvent::MeshDisabled);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runner.count(STATIONS), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_lets_running_poll_finish() {
        let runner = scripted_mesh();
        runner.delay(STATIONS, Duration::from_millis(500));
        let (handle, mut rx) = start(runner.clone());

        handle.request_enable().unwrap();
        assert_eq!(next_event(&mut rx).await, MeshEvent::MeshEnabled);
        handle.set_topology_polling(true).unwrap();
        assert_eq!(next_event(&mut rx).await, MeshEvent::PollingEnabled);

        // Poll is mid-command when the disable is queued
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.request_disable().unwrap();
        assert_eq!(next_event(&mut rx).await, MeshEvent::MeshDisabled);

        let poll_start = runner.started_at(STATIONS)[0];
        let down_start = runner.started_at(DOWN)[0];
        assert!(down_start - poll_start >= Duration::from_millis(500));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runner.count(STATIONS), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elevated_commands() {
        let runner = scripted_mesh();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = MeshConfig {
            elevated: true,
            ..Default::default()
        };
        let (handle, _join) = MeshController::new(config, runner.clone())
            .with_listener(Arc::new(tx))
            .spawn();

        handle.request_enable().unwrap();
        assert_eq!(next_event(&mut rx).await, MeshEvent::MeshEnabled);
        assert!(runner.calls().iter().all(|c| c.elevated));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_worker() {
        let runner = scripted_mesh();
        let (handle, join) = MeshController::new(MeshConfig::default(), runner).spawn();

        handle.shutdown().unwrap();
        join.await.unwrap();
        assert!(matches!(handle.request_enable(), Err(Error::ControllerStopped)));
    }
}
