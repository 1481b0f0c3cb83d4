//! Network availability tracker
//!
//! Follows the bridge's latest-value publication on behalf of a connectivity
//! service. Redundant detailed states are dropped, and the mesh interface's
//! IPv4 address is attached to the link properties once connected.

use crate::types::{CoarseState, DetailedState, NetworkState};
use ipnetwork::{IpNetwork, Ipv4Network};
use nix::net::if_::InterfaceFlags;
use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Prefix length recorded for the mesh link address
pub const LINK_PREFIX_LEN: u8 = 8;

/// Looks up the IPv4 address assigned to an interface
pub trait LinkAddressSource: Send + Sync {
    fn ipv4_address(&self, interface: &str) -> Option<Ipv4Addr>;
}

/// Reads interface addresses from the running system
pub struct SystemInterfaces;

impl LinkAddressSource for SystemInterfaces {
    fn ipv4_address(&self, interface: &str) -> Option<Ipv4Addr> {
        let addrs = match nix::ifaddrs::getifaddrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!("Failed to list interface addresses: {}", e);
                return None;
            }
        };

        addrs
            .filter(|ifa| ifa.interface_name == interface)
            .filter(|ifa| ifa.flags.contains(InterfaceFlags::IFF_UP))
            .filter_map(|ifa| ifa.address)
            .find_map(|addr| addr.as_sockaddr_in().map(|sin| *SocketAddrV4::from(*sin).ip()))
    }
}

/// Addresses bound to the tracked link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkProperties {
    pub interface: String,
    pub addresses: Vec<IpNetwork>,
}

/// Message sent to the connectivity service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    StateChanged {
        state: NetworkState,
        link: LinkProperties,
    },
}

struct Tracked {
    network: NetworkState,
    last_detailed: Option<DetailedState>,
    link: LinkProperties,
}

/// Tracks mesh network availability for the connectivity service
pub struct NetworkTracker {
    interface: String,
    source: Arc<dyn LinkAddressSource>,
    tracked: Mutex<Tracked>,
    target: mpsc::UnboundedSender<TrackerEvent>,
}

impl NetworkTracker {
    /// Create a new tracker for `interface`
    pub fn new(
        interface: impl Into<String>,
        source: Arc<dyn LinkAddressSource>,
        target: mpsc::UnboundedSender<TrackerEvent>,
    ) -> Self {
        let interface = interface.into();
        Self {
            tracked: Mutex::new(Tracked {
                network: NetworkState::default(),
                last_detailed: None,
                link: LinkProperties {
                    interface: interface.clone(),
                    addresses: Vec::new(),
                },
            }),
            interface,
            source,
            target,
        }
    }

    pub fn network_state(&self) -> NetworkState {
        self.tracked.lock().network
    }

    pub fn link_properties(&self) -> LinkProperties {
        self.tracked.lock().link.clone()
    }

    /// Whether mesh connections are possible at all
    pub fn is_available(&self) -> bool {
        self.tracked.lock().network.coarse == CoarseState::Enabled
    }

    /// Follow published states until the publisher goes away
    pub async fn run(self: Arc<Self>, mut states: watch::Receiver<NetworkState>) {
        info!("Network tracker following {}", self.interface);
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            self.handle_state(state);
        }
        debug!("Network state publisher closed");
    }

    /// Record a published state; returns whether it was forwarded
    pub fn handle_state(&self, state: NetworkState) -> bool {
        let event = {
            let mut tracked = self.tracked.lock();
            tracked.network = state;

            if tracked.last_detailed == Some(state.detailed) {
                return false;
            }
            tracked.last_detailed = Some(state.detailed);

            if state.is_connected() && tracked.link.addresses.is_empty() {
                if let Some(address) = self.link_address() {
                    tracked.link.addresses.push(address);
                }
            } else if !state.is_connected() {
                tracked.link.addresses.clear();
            }

            TrackerEvent::StateChanged {
                state,
                link: tracked.link.clone(),
            }
        };

        if self.target.send(event).is_err() {
            debug!("Connectivity target closed, dropping state {}", state);
        }
        true
    }

    fn link_address(&self) -> Option<IpNetwork> {
        let Some(ip) = self.source.ipv4_address(&self.interface) else {
            warn!("No IPv4 address on {}", self.interface);
            return None;
        };

        match Ipv4Network::new(ip, LINK_PREFIX_LEN) {
            Ok(net) => Some(IpNetwork::V4(net)),
            Err(e) => {
                warn!("Invalid link address {}: {}", ip, e);
                None
            }
        }
    }
}
