//! Core types for MeshWifi

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Latency reported when a peer could not be probed
pub const LATENCY_UNKNOWN: i32 = -1;

/// Next hop reported when the mesh tool could not resolve one
pub const NEXT_HOP_UNKNOWN: &str = "n/a";

/// Captured output of one external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    /// Whether the command exited with status zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One mesh peer as seen during a single polling cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Link-layer address reported by the mesh tool
    pub address: String,
    pub status: String,
    /// Network-layer address derived from the link-layer address
    pub derived_address: Ipv4Addr,
    pub next_hop: String,
    /// Average round trip in milliseconds, or [`LATENCY_UNKNOWN`]
    pub latency_millis: i32,
}

impl PeerRecord {
    pub fn latency_known(&self) -> bool {
        self.latency_millis != LATENCY_UNKNOWN
    }
}

/// Coarse on/off state of the mesh-backed network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoarseState {
    #[default]
    Disabled,
    Enabled,
}

impl std::fmt::Display for CoarseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoarseState::Disabled => write!(f, "disabled"),
            CoarseState::Enabled => write!(f, "enabled"),
        }
    }
}

/// Detailed connectivity state of the mesh-backed network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetailedState {
    #[default]
    Disconnected,
    Connected,
}

impl std::fmt::Display for DetailedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetailedState::Disconnected => write!(f, "disconnected"),
            DetailedState::Connected => write!(f, "connected"),
        }
    }
}

/// Generic two-level network state published to the platform.
///
/// `detailed == Connected` always implies `coarse == Enabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NetworkState {
    pub coarse: CoarseState,
    pub detailed: DetailedState,
}

impl NetworkState {
    pub fn is_connected(&self) -> bool {
        self.detailed == DetailedState::Connected
    }

    /// Whether the pair respects the connected-implies-enabled rule
    pub fn is_consistent(&self) -> bool {
        !(self.detailed == DetailedState::Connected && self.coarse == CoarseState::Disabled)
    }
}

impl std::fmt::Display for NetworkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.coarse, self.detailed)
    }
}

/// User-facing prompt categories for failed mesh requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Hardware not ready
    DeviceUnavailable,
    /// The mesh tool rejected the command
    InterfaceFailure,
    /// The tool could not be run at all
    ShellFailure,
}

impl std::fmt::Display for Prompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Prompt::DeviceUnavailable => write!(f, "mesh device unavailable"),
            Prompt::InterfaceFailure => write!(f, "mesh interface error"),
            Prompt::ShellFailure => write!(f, "shell error"),
        }
    }
}

/// Notification emitted by the mesh controller worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    MeshEnabled,
    MeshDisabled,
    PollingEnabled,
    PollingDisabled,
    DeviceUnavailable { found: usize, required: usize },
    InterfaceFailure { command: String, stderr: String },
    ShellFailure { reason: String },
    PeerDiscovered(PeerRecord),
}

impl MeshEvent {
    /// Prompt category to surface for this event, if any
    pub fn prompt(&self) -> Option<Prompt> {
        match self {
            MeshEvent::DeviceUnavailable { .. } => Some(Prompt::DeviceUnavailable),
            MeshEvent::InterfaceFailure { .. } => Some(Prompt::InterfaceFailure),
            MeshEvent::ShellFailure { .. } => Some(Prompt::ShellFailure),
            _ => None,
        }
    }
}
