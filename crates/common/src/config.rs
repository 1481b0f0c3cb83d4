//! Mesh and shell configuration
//!
//! Renders the exact command lines the mesh tool and ping expect.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Mesh interface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Mesh network interface name
    pub interface: String,

    /// Mesh tool binary
    pub tool: String,

    /// Directory listing one entry per wireless device
    pub device_path: String,

    /// Minimum number of listed devices before the mesh may come up
    pub min_devices: usize,

    /// Delay between the end of one topology poll and the start of the next
    pub poll_interval_ms: u64,

    /// Latency probe binary
    pub ping_binary: String,

    /// Packets sent per latency probe
    pub ping_count: u32,

    /// Seconds to wait for each probe reply
    pub ping_wait_secs: u32,

    /// Run mesh commands through the elevation shell
    pub elevated: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            interface: "mesh0".to_string(),
            tool: "mesh".to_string(),
            device_path: "/sys/kernel/debug/ieee80211/".to_string(),
            min_devices: 2,
            poll_interval_ms: 1000,
            ping_binary: "ping".to_string(),
            ping_count: 3,
            ping_wait_secs: 2,
            elevated: false,
        }
    }
}

impl MeshConfig {
    /// Check values that would otherwise produce unusable command lines
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("interface", &self.interface),
            ("tool", &self.tool),
            ("device_path", &self.device_path),
            ("ping_binary", &self.ping_binary),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("{} must not be empty", field)));
            }
            if value.split_whitespace().count() > 1 {
                return Err(Error::InvalidConfig(format!(
                    "{} must not contain whitespace: {:?}",
                    field, value
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// `ls <device_path>`
    pub fn device_probe_command(&self) -> String {
        format!("ls {}", self.device_path)
    }

    /// `mesh <ifname> up`
    pub fn interface_up_command(&self) -> String {
        format!("{} {} up", self.tool, self.interface)
    }

    /// `mesh <ifname> down`
    pub fn interface_down_command(&self) -> String {
        format!("{} {} down", self.tool, self.interface)
    }

    /// `mesh <ifname> stations`
    pub fn stations_command(&self) -> String {
        format!("{} {} stations", self.tool, self.interface)
    }

    /// `ping -f -c 3 -W 2 <address>`
    pub fn ping_command(&self, address: Ipv4Addr) -> String {
        format!(
            "{} -f -c {} -W {} {}",
            self.ping_binary, self.ping_count, self.ping_wait_secs, address
        )
    }

    /// `mesh <ifname> <address> nexthop`
    pub fn nexthop_command(&self, address: &str) -> String {
        format!("{} {} {} nexthop", self.tool, self.interface, address)
    }
}

/// Which process streams are kept after draining
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputCapture {
    None,
    Stdout,
    Stderr,
    #[default]
    Both,
}

impl OutputCapture {
    pub fn keeps_stdout(self) -> bool {
        matches!(self, OutputCapture::Stdout | OutputCapture::Both)
    }

    pub fn keeps_stderr(self) -> bool {
        matches!(self, OutputCapture::Stderr | OutputCapture::Both)
    }
}

/// Command executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Streams to keep in each command result
    pub capture: OutputCapture,

    /// Elevation binaries, probed in order
    pub su_candidates: Vec<String>,

    /// Identity commands run through each elevation candidate
    pub id_candidates: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            capture: OutputCapture::Both,
            su_candidates: vec![
                "su".to_string(),
                "/system/bin/su".to_string(),
                "/system/xbin/su".to_string(),
            ],
            id_candidates: vec![
                "id".to_string(),
                "/system/bin/id".to_string(),
                "/system/xbin/id".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_lines() {
        let config = MeshConfig::default();
        assert_eq!(config.device_probe_command(), "ls /sys/kernel/debug/ieee80211/");
        assert_eq!(config.interface_up_command(), "mesh mesh0 up");
        assert_eq!(config.interface_down_command(), "mesh mesh0 down");
        assert_eq!(config.stations_command(), "mesh mesh0 stations");
        assert_eq!(
            config.ping_command(Ipv4Addr::new(10, 1, 2, 3)),
            "ping -f -c 3 -W 2 10.1.2.3"
        );
        assert_eq!(
            config.nexthop_command("02:00:00:01:02:03"),
            "mesh mesh0 02:00:00:01:02:03 nexthop"
        );
    }

    #[test]
    fn test_validate_rejects_whitespace() {
        let config = MeshConfig {
            interface: "mesh 0".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        assert!(MeshConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: MeshConfig = toml::from_str("interface = \"mesh1\"").unwrap();
        assert_eq!(config.interface, "mesh1");
        assert_eq!(config.min_devices, 2);
        assert_eq!(config.poll_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn test_capture_modes() {
        assert!(OutputCapture::Both.keeps_stdout() && OutputCapture::Both.keeps_stderr());
        assert!(!OutputCapture::None.keeps_stdout());
        assert!(OutputCapture::Stderr.keeps_stderr() && !OutputCapture::Stderr.keeps_stdout());
    }
}
