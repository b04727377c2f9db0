//! Peering configuration for the gobgp daemon

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;

use crate::error::{GobgpError, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BgpConfig {
    /// AS number of the cluster
    pub cluster_as: u32,
    /// AS number of every neighbor
    pub neighbor_as: u32,
    pub neighbor_addresses: Vec<Ipv4Addr>,
    pub neighbor_ipv6_addresses: Vec<Ipv6Addr>,
    /// Router id; falls back to the pod IPv4 address
    pub router_id: Option<Ipv4Addr>,
    pub next_hop_v4: Option<Ipv4Addr>,
    pub next_hop_v6: Option<Ipv6Addr>,
    /// Peer from the pod address instead of letting the kernel pick one
    pub peer_with_local: bool,
    pub pod_ipv4: Option<Ipv4Addr>,
    pub pod_ipv6: Option<Ipv6Addr>,
}

impl BgpConfig {
    /// Local address to peer from for the given family. Only set when
    /// `peer_with_local` is enabled and the pod has an address of that family.
    pub fn local_address(&self, ipv4: bool) -> Option<IpAddr> {
        if !self.peer_with_local {
            return None;
        }
        if ipv4 {
            self.pod_ipv4.map(IpAddr::V4)
        } else {
            self.pod_ipv6.map(IpAddr::V6)
        }
    }

    /// Next hop to attach to an announcement of `prefix`
    pub fn next_hop(&self, prefix: &IpNetwork) -> Option<IpAddr> {
        match prefix {
            IpNetwork::V4(_) => self.next_hop_v4.map(IpAddr::V4),
            IpNetwork::V6(_) => self.next_hop_v6.map(IpAddr::V6),
        }
    }

    pub fn neighbors(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.neighbor_addresses
            .iter()
            .copied()
            .map(IpAddr::V4)
            .chain(self.neighbor_ipv6_addresses.iter().copied().map(IpAddr::V6))
    }

    pub fn effective_router_id(&self) -> Result<Ipv4Addr> {
        self.router_id
            .or(self.pod_ipv4)
            .ok_or_else(|| {
                GobgpError::InvalidConfig(
                    "router id is not set and pod has no IPv4 address".to_string(),
                )
            })
    }
}
