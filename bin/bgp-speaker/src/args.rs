//! Command line flags

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use speaker_core::{Mode, Result, SpeakerConfig, SpeakerError};
use speaker_gobgp::{BgpConfig, GobgpCli};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Announce Kubernetes-managed addresses to BGP peers
#[derive(Parser, Debug, Clone)]
#[command(name = "bgp-speaker", version, about, long_about = None)]
pub struct Args {
    /// Name of the node this speaker runs on
    #[arg(long, env = "NODE_NAME", default_value = "")]
    pub node_name: String,

    /// Addresses of this pod, one per family
    #[arg(long, env = "POD_IPS", value_delimiter = ',')]
    pub pod_ips: Vec<IpAddr>,

    #[arg(long, value_delimiter = ',')]
    pub neighbor_address: Vec<Ipv4Addr>,

    #[arg(long, value_delimiter = ',')]
    pub neighbor_ipv6_address: Vec<Ipv6Addr>,

    #[arg(long, default_value_t = 65000)]
    pub cluster_as: u32,

    #[arg(long, default_value_t = 65001)]
    pub neighbor_as: u32,

    /// Router id, defaults to the pod IPv4 address
    #[arg(long)]
    pub router_id: Option<Ipv4Addr>,

    /// Next hop for announced IPv4 routes
    #[arg(long)]
    pub nexthop_address: Option<Ipv4Addr>,

    /// Next hop for announced IPv6 routes
    #[arg(long)]
    pub nexthop_ipv6_address: Option<Ipv6Addr>,

    /// Peer from the pod address of the neighbor's family
    #[arg(long)]
    pub peer_with_local: bool,

    /// Announce cluster IPs of annotated services
    #[arg(long)]
    pub announce_cluster_ip: bool,

    /// Announce the EIPs of the NAT gateway this speaker runs in
    #[arg(long)]
    pub nat_gw_mode: bool,

    /// Announce the EIPs of NAT gateways scheduled on this node
    #[arg(long)]
    pub node_route_eip_mode: bool,

    #[arg(long, env = "GATEWAY_NAME", default_value = "")]
    pub gateway_name: String,

    #[arg(long, env = "VPC_NAT_GW_NAMESPACE", default_value = "kube-system")]
    pub vpc_nat_gw_namespace: String,

    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Seconds between full reconciliation passes
    #[arg(long, default_value_t = 5)]
    pub reconcile_interval: u64,

    /// Seconds to wait for the initial cache sync
    #[arg(long, default_value_t = 300)]
    pub cache_sync_timeout: u64,

    #[arg(long, env = "GOBGP_BIN", default_value = "gobgp")]
    pub gobgp_bin: String,

    #[arg(long, default_value = "127.0.0.1")]
    pub gobgp_host: String,

    #[arg(long, default_value_t = 50051)]
    pub gobgp_port: u16,

    /// Address of the /metrics and /healthz endpoints
    #[arg(long, default_value = "0.0.0.0:10165")]
    pub metrics_addr: SocketAddr,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Keep routes in memory instead of driving gobgp
    #[arg(long)]
    pub dry_run: bool,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SpeakerError::InvalidConfiguration(msg.to_string()));

        let mode = self.mode()?;
        if self.neighbor_address.is_empty() && self.neighbor_ipv6_address.is_empty() {
            return invalid(
                "at least one of --neighbor-address or --neighbor-ipv6-address must be specified",
            );
        }
        if self.cluster_as == 0 {
            return invalid("--cluster-as must be specified");
        }
        if self.neighbor_as == 0 {
            return invalid("--neighbor-as must be specified");
        }
        if mode == Mode::NodeRouteEip && self.node_name.is_empty() {
            return invalid("--node-route-eip-mode requires --node-name to be specified");
        }
        Ok(())
    }

    pub fn mode(&self) -> Result<Mode> {
        Mode::from_flags(self.nat_gw_mode, self.node_route_eip_mode)
    }

    pub fn speaker_config(&self) -> Result<SpeakerConfig> {
        Ok(SpeakerConfig {
            mode: self.mode()?,
            node_name: self.node_name.clone(),
            vpc_nat_gw_namespace: self.vpc_nat_gw_namespace.clone(),
            gateway_name: self.gateway_name.clone(),
            announce_cluster_ip: self.announce_cluster_ip,
            workers: self.workers,
            reconcile_interval: Duration::from_secs(self.reconcile_interval),
            cache_sync_timeout: Duration::from_secs(self.cache_sync_timeout),
        })
    }

    pub fn bgp_config(&self) -> BgpConfig {
        let pod_ipv4 = self.pod_ips.iter().find_map(|ip| match ip {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        });
        let pod_ipv6 = self.pod_ips.iter().find_map(|ip| match ip {
            IpAddr::V6(v6) => Some(*v6),
            IpAddr::V4(_) => None,
        });

        BgpConfig {
            cluster_as: self.cluster_as,
            neighbor_as: self.neighbor_as,
            neighbor_addresses: self.neighbor_address.clone(),
            neighbor_ipv6_addresses: self.neighbor_ipv6_address.clone(),
            router_id: self.router_id,
            next_hop_v4: self.nexthop_address,
            next_hop_v6: self.nexthop_ipv6_address,
            peer_with_local: self.peer_with_local,
            pod_ipv4,
            pod_ipv6,
        }
    }

    pub fn gobgp_cli(&self) -> GobgpCli {
        GobgpCli::new(self.gobgp_bin.clone(), self.gobgp_host.clone(), self.gobgp_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(flags: &[&str]) -> Args {
        let argv = std::iter::once("bgp-speaker").chain(flags.iter().copied());
        Args::try_parse_from(argv).expect("flags should parse")
    }

    #[test]
    fn test_validate_required_flags() {
        let cases: &[(&str, &[&str], Option<&str>)] = &[
            (
                "valid node route mode",
                &[
                    "--neighbor-address",
                    "10.0.0.1",
                    "--cluster-as",
                    "65001",
                    "--neighbor-as",
                    "65002",
                    "--node-name",
                    "node1",
                    "--node-route-eip-mode",
                ],
                None,
            ),
            (
                "valid with peer-with-local",
                &[
                    "--neighbor-address",
                    "10.0.0.1",
                    "--node-name",
                    "node1",
                    "--node-route-eip-mode",
                    "--peer-with-local",
                ],
                None,
            ),
            (
                "mutually exclusive modes",
                &["--neighbor-address", "10.0.0.1", "--nat-gw-mode", "--node-route-eip-mode"],
                Some("--nat-gw-mode and --node-route-eip-mode are mutually exclusive"),
            ),
            (
                "missing neighbor address",
                &[],
                Some(
                    "at least one of --neighbor-address or --neighbor-ipv6-address must be specified",
                ),
            ),
            (
                "missing cluster-as",
                &["--neighbor-address", "10.0.0.1", "--cluster-as", "0"],
                Some("--cluster-as must be specified"),
            ),
            (
                "missing neighbor-as",
                &["--neighbor-address", "10.0.0.1", "--neighbor-as", "0"],
                Some("--neighbor-as must be specified"),
            ),
            (
                "node-route-eip-mode without node-name",
                &["--neighbor-ipv6-address", "fd00::1", "--node-route-eip-mode"],
                Some("--node-route-eip-mode requires --node-name to be specified"),
            ),
        ];

        for (name, flags, want) in cases {
            let mut args = parse(flags);
            // NODE_NAME may be set in the environment
            if !flags.contains(&"--node-name") {
                args.node_name.clear();
            }

            let result = args.validate();
            match want {
                None => assert!(result.is_ok(), "{}: {:?}", name, result),
                Some(msg) => {
                    let err = result.expect_err(name).to_string();
                    assert!(err.contains(msg), "{}: {}", name, err);
                }
            }
        }
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["--neighbor-address", "10.0.0.1"]);
        assert_eq!(args.cluster_as, 65000);
        assert_eq!(args.neighbor_as, 65001);
        assert_eq!(args.log_format, LogFormat::Text);

        let config = args.speaker_config().unwrap();
        assert_eq!(config.mode, Mode::SubnetRoutes);
        assert_eq!(config.reconcile_interval, Duration::from_secs(5));
        assert_eq!(config.cache_sync_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_bgp_config_splits_pod_ips() {
        let args = parse(&[
            "--neighbor-address",
            "10.0.0.1,10.0.0.2",
            "--pod-ips",
            "fd00::5,10.244.0.5",
            "--peer-with-local",
        ]);
        let bgp = args.bgp_config();
        assert_eq!(bgp.neighbor_addresses.len(), 2);
        assert_eq!(bgp.pod_ipv4, Some(Ipv4Addr::new(10, 244, 0, 5)));
        assert_eq!(bgp.local_address(false), Some("fd00::5".parse().unwrap()));
    }

    #[test]
    fn test_log_format_json() {
        let args = parse(&["--log-format", "json"]);
        assert_eq!(args.log_format, LogFormat::Json);
    }
}
