//! Mesh topology collection
//!
//! One collection lists the mesh stations, derives a network address for each
//! peer, probes its latency and resolves its next hop. Latency and next hop
//! degrade to sentinel values per peer; anything else aborts the whole
//! collection and no partial records are returned.

use crate::config::MeshConfig;
use crate::shell::CommandRunner;
use crate::types::{CommandResult, PeerRecord, LATENCY_UNKNOWN, NEXT_HOP_UNKNOWN};
use crate::{Error, Result};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, trace};

/// Marker of the ping summary line
const RTT_SUMMARY: &str = "min/avg/max/mdev";

/// A station line from the peer listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Station {
    pub address: String,
    pub status: String,
}

/// Collects peer records through the mesh tool
pub struct TopologyCollector {
    config: MeshConfig,
    runner: Arc<dyn CommandRunner>,
}

impl TopologyCollector {
    /// Create a new collector
    pub fn new(config: MeshConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Collect one snapshot of the mesh peers
    pub async fn collect(&self) -> Result<Vec<PeerRecord>> {
        self.collect_peers().await.map_err(Error::collection)
    }

    async fn collect_peers(&self) -> Result<Vec<PeerRecord>> {
        let command = self.config.stations_command();
        let output = self.run(&command).await?;

        if !output.success() {
            return Err(Error::InterfaceFailure {
                command,
                stderr: output.stderr,
            });
        }
        if output.stdout.is_empty() {
            return Ok(Vec::new());
        }

        let stations = parse_stations(&output.stdout)?;
        let mut peers = Vec::with_capacity(stations.len());

        for station in stations {
            let derived_address = derive_network_address(&station.address)?;
            // The latency probe creates the mesh path the nexthop query reads.
            let latency_millis = self.probe_latency(derived_address).await?;
            let next_hop = self.resolve_next_hop(&station.address).await?;

            trace!(
                "Peer {} ({}) status={} latency={} next_hop={}",
                station.address,
                derived_address,
                station.status,
                latency_millis,
                next_hop
            );

            peers.push(PeerRecord {
                address: station.address,
                status: station.status,
                derived_address,
                next_hop,
                latency_millis,
            });
        }

        debug!("Collected {} mesh peer(s)", peers.len());
        Ok(peers)
    }

    async fn probe_latency(&self, address: Ipv4Addr) -> Result<i32> {
        if address.is_unspecified() {
            return Ok(LATENCY_UNKNOWN);
        }

        let output = self.run(&self.config.ping_command(address)).await?;
        Ok(parse_latency(&output))
    }

    async fn resolve_next_hop(&self, address: &str) -> Result<String> {
        if address.is_empty() {
            return Ok(NEXT_HOP_UNKNOWN.to_string());
        }

        let output = self.run(&self.config.nexthop_command(address)).await?;
        if output.success() {
            Ok(output.stdout.trim().to_string())
        } else {
            Ok(NEXT_HOP_UNKNOWN.to_string())
        }
    }

    async fn run(&self, command_line: &str) -> Result<CommandResult> {
        if self.config.elevated {
            self.runner.execute_elevated(command_line).await
        } else {
            self.runner.execute(command_line).await
        }
    }
}

/// Parse the peer listing: field 0 is the address, field 3 the status
pub fn parse_stations(stdout: &str) -> Result<Vec<Station>> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() < 4 {
                return Err(Error::MalformedOutput {
                    line: line.to_string(),
                    reason: format!("expected at least 4 fields, found {}", fields.len()),
                });
            }
            Ok(Station {
                address: fields[0].trim().to_string(),
                status: fields[3].trim().to_string(),
            })
        })
        .collect()
}

/// Map a link-layer address onto `10.<h3>.<h4>.<h5>`.
///
/// The 4th to 6th hextets are read as hex octets. An empty address maps to
/// `0.0.0.0`.
pub fn derive_network_address(address: &str) -> Result<Ipv4Addr> {
    if address.is_empty() {
        return Ok(Ipv4Addr::UNSPECIFIED);
    }

    let hextets: Vec<&str> = address.split(':').collect();
    if hextets.len() < 6 {
        return Err(Error::MalformedOutput {
            line: address.to_string(),
            reason: format!("expected 6 hextets, found {}", hextets.len()),
        });
    }

    let octet = |idx: usize| {
        u8::from_str_radix(hextets[idx], 16).map_err(|e| Error::MalformedOutput {
            line: address.to_string(),
            reason: format!("hextet {} ({:?}): {}", idx, hextets[idx], e),
        })
    };

    Ok(Ipv4Addr::new(10, octet(3)?, octet(4)?, octet(5)?))
}

/// Average round trip from ping output, truncated to whole milliseconds
pub fn parse_latency(output: &CommandResult) -> i32 {
    if !output.success() {
        return LATENCY_UNKNOWN;
    }

    // rtt min/avg/max/mdev = 79.969/87.795/95.622/7.832 ms
    output
        .stdout
        .lines()
        .last()
        .filter(|line| line.contains(RTT_SUMMARY))
        .and_then(|line| line.split('/').nth(4))
        .and_then(|avg| avg.trim().parse::<f32>().ok())
        .map(|avg| avg as i32)
        .unwrap_or(LATENCY_UNKNOWN)
}
