//! Console listeners for controller events

use meshwifi_common::{MeshEvent, MeshListener, PeerRecord, Prompt};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Logs user prompts raised by failed mesh requests
#[derive(Default)]
pub struct PromptLogger {
    last: Mutex<Option<Prompt>>,
}

impl PromptLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent prompt shown
    pub fn last_prompt(&self) -> Option<Prompt> {
        *self.last.lock()
    }
}

impl MeshListener for PromptLogger {
    fn on_event(&self, event: &MeshEvent) {
        let Some(prompt) = event.prompt() else {
            return;
        };

        match event {
            MeshEvent::DeviceUnavailable { found, required } => {
                warn!("{}: found {} devices, need {}", prompt, found, required);
            }
            MeshEvent::InterfaceFailure { command, stderr } => {
                warn!("{}: '{}' failed: {}", prompt, command, stderr);
            }
            MeshEvent::ShellFailure { reason } => {
                warn!("{}: {}", prompt, reason);
            }
            _ => warn!("{}", prompt),
        }
        *self.last.lock() = Some(prompt);
    }
}

/// Logs peers found by topology polling
#[derive(Default)]
pub struct PeerLogger;

impl PeerLogger {
    fn render(peer: &PeerRecord) -> String {
        match serde_json::to_string(peer) {
            Ok(json) => json,
            Err(e) => format!("<unrenderable peer {}: {}>", peer.address, e),
        }
    }
}

impl MeshListener for PeerLogger {
    fn on_event(&self, event: &MeshEvent) {
        match event {
            MeshEvent::PeerDiscovered(peer) => {
                info!(
                    "Peer {} ({}) via {}, latency {} ms, status {}",
                    peer.address, peer.derived_address, peer.next_hop, peer.latency_millis, peer.status
                );
                debug!("Peer record: {}", Self::render(peer));
            }
            MeshEvent::MeshEnabled => info!("Mesh enabled"),
            MeshEvent::MeshDisabled => info!("Mesh disabled"),
            MeshEvent::PollingEnabled => info!("Topology polling enabled"),
            MeshEvent::PollingDisabled => info!("Topology polling disabled"),
            _ => {}
        }
    }
}
