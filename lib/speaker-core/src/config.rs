//! Controller configuration

use std::fmt;
use std::time::Duration;

use speaker_api::annotations::DEFAULT_VPC_NAT_GW_NAMESPACE;

use crate::{Result, SpeakerError};

/// What the speaker announces
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// Subnet CIDRs, pod IPs and optionally service cluster IPs
    #[default]
    SubnetRoutes,
    /// EIPs of the NAT gateway this speaker runs inside of
    NatGwEip,
    /// EIPs of NAT gateway pods scheduled on this node, from the host network
    NodeRouteEip,
}

impl Mode {
    /// Mode selected by the two mutually exclusive mode flags
    pub fn from_flags(nat_gw_mode: bool, node_route_eip_mode: bool) -> Result<Self> {
        match (nat_gw_mode, node_route_eip_mode) {
            (true, true) => Err(SpeakerError::InvalidConfiguration(
                "--nat-gw-mode and --node-route-eip-mode are mutually exclusive".to_string(),
            )),
            (true, false) => Ok(Mode::NatGwEip),
            (false, true) => Ok(Mode::NodeRouteEip),
            (false, false) => Ok(Mode::SubnetRoutes),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::SubnetRoutes => "subnet-routes",
            Mode::NatGwEip => "nat-gw-eip",
            Mode::NodeRouteEip => "node-route-eip",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct SpeakerConfig {
    pub mode: Mode,
    /// Name of the node this speaker runs on
    pub node_name: String,
    /// Namespace the NAT gateway pods run in
    pub vpc_nat_gw_namespace: String,
    /// NAT gateway hosting this speaker (NatGwEip mode)
    pub gateway_name: String,
    /// Announce cluster IPs of annotated services (SubnetRoutes mode)
    pub announce_cluster_ip: bool,
    /// Number of EIP queue workers
    pub workers: usize,
    /// Period of the full reconciliation pass
    pub reconcile_interval: Duration,
    /// How long to wait for the initial cache sync before giving up
    pub cache_sync_timeout: Duration,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            node_name: String::new(),
            vpc_nat_gw_namespace: DEFAULT_VPC_NAT_GW_NAMESPACE.to_string(),
            gateway_name: String::new(),
            announce_cluster_ip: false,
            workers: 1,
            reconcile_interval: Duration::from_secs(5),
            cache_sync_timeout: Duration::from_secs(300),
        }
    }
}

impl SpeakerConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SpeakerError::InvalidConfiguration(msg.to_string()));
        match self.mode {
            Mode::NodeRouteEip if self.node_name.is_empty() => {
                return invalid("--node-route-eip-mode requires --node-name to be specified")
            }
            Mode::NodeRouteEip if self.vpc_nat_gw_namespace.is_empty() => {
                return invalid("--node-route-eip-mode requires a NAT gateway namespace")
            }
            Mode::NatGwEip if self.gateway_name.is_empty() => {
                return invalid("--nat-gw-mode requires the gateway name to be set")
            }
            _ => {}
        }
        if self.workers == 0 {
            return invalid("at least one worker is required");
        }
        if self.reconcile_interval.is_zero() {
            return invalid("reconcile interval must be positive");
        }
        Ok(())
    }
}
