//! Expected-state computation, one function per [`Mode`]

use std::collections::HashSet;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Pod, Service};
use speaker_api::annotations::{
    is_host_network, is_pod_alive, pod_ips, pod_node_name, service_cluster_ips, BgpPolicy,
    LOGICAL_SWITCH_ANNOTATION,
};
use speaker_api::{IptablesEIP, Subnet, VpcNatGateway};
use tracing::debug;

use crate::cache::{MemoryCache, ResourceCache};
use crate::config::{Mode, SpeakerConfig};
use crate::placement::PlacementResolver;
use crate::prefix::PrefixSet;
use crate::Result;

/// Caches the expected-state computers read from. Kinds a mode does not
/// need can be left as empty [`MemoryCache`]s.
#[derive(Clone)]
pub struct Caches {
    pub subnets: Arc<dyn ResourceCache<Subnet>>,
    /// Non host-network pods in all namespaces
    pub pods: Arc<dyn ResourceCache<Pod>>,
    pub services: Arc<dyn ResourceCache<Service>>,
    pub eips: Arc<dyn ResourceCache<IptablesEIP>>,
    pub nat_gateways: Arc<dyn ResourceCache<VpcNatGateway>>,
    /// Pods in the NAT gateway namespace
    pub gateway_pods: Arc<dyn ResourceCache<Pod>>,
}

impl Default for Caches {
    fn default() -> Self {
        Self {
            subnets: Arc::new(MemoryCache::new()),
            pods: Arc::new(MemoryCache::new()),
            services: Arc::new(MemoryCache::new()),
            eips: Arc::new(MemoryCache::new()),
            nat_gateways: Arc::new(MemoryCache::new()),
            gateway_pods: Arc::new(MemoryCache::new()),
        }
    }
}

impl Caches {
    /// Wait until every cache has completed its initial list
    pub async fn wait_for_sync(&self) -> Result<()> {
        self.subnets.wait_for_sync().await?;
        self.pods.wait_for_sync().await?;
        self.services.wait_for_sync().await?;
        self.eips.wait_for_sync().await?;
        self.nat_gateways.wait_for_sync().await?;
        self.gateway_pods.wait_for_sync().await?;
        Ok(())
    }
}

/// Compute the prefixes `mode` should announce right now
pub fn expected_prefixes(
    mode: Mode,
    config: &SpeakerConfig,
    caches: &Caches,
    placement: &PlacementResolver,
) -> Result<PrefixSet> {
    match mode {
        Mode::SubnetRoutes => subnet_route_prefixes(config, caches),
        Mode::NatGwEip => nat_gw_eip_prefixes(&config.gateway_name, caches),
        Mode::NodeRouteEip => node_route_eip_prefixes(caches, placement),
    }
}

/// Subnets, pods and services selected by their BGP annotation.
///
/// Cluster-wide subnets contribute their CIDRs. Pods contribute their IPs
/// when annotated cluster-wide, or when annotated `local` (directly or via
/// their subnet) and scheduled on this node.
pub fn subnet_route_prefixes(config: &SpeakerConfig, caches: &Caches) -> Result<PrefixSet> {
    let mut expected = PrefixSet::new();

    if config.announce_cluster_ip {
        for svc in caches.services.list()? {
            if BgpPolicy::from_annotations(svc.metadata.annotations.as_ref())
                != Some(BgpPolicy::Cluster)
            {
                continue;
            }
            for ip in service_cluster_ips(&svc) {
                expected.add(ip);
            }
        }
    }

    let mut local_subnets = HashSet::new();
    for subnet in caches.subnets.list()? {
        if !subnet.is_validated() {
            continue;
        }
        match BgpPolicy::from_annotations(subnet.metadata.annotations.as_ref()) {
            Some(BgpPolicy::Cluster) => {
                for cidr in subnet.cidrs() {
                    expected.add(cidr);
                }
            }
            Some(BgpPolicy::Local) => {
                if let Some(name) = subnet.metadata.name.clone() {
                    local_subnets.insert(name);
                }
            }
            None => {}
        }
    }

    for pod in caches.pods.list()? {
        if !is_pod_alive(&pod) || is_host_network(&pod) {
            continue;
        }
        let on_this_node = pod_node_name(&pod) == Some(config.node_name.as_str());
        let in_local_subnet = pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(LOGICAL_SWITCH_ANNOTATION))
            .map(|s| local_subnets.contains(s))
            .unwrap_or(false);

        let announce = match BgpPolicy::from_annotations(pod.metadata.annotations.as_ref()) {
            Some(BgpPolicy::Cluster) => true,
            Some(BgpPolicy::Local) => on_this_node,
            None => in_local_subnet && on_this_node,
        };
        if announce {
            for ip in pod_ips(&pod) {
                expected.add(ip);
            }
        }
    }

    debug!("Subnet route mode expects {} prefixes", expected.len());
    Ok(expected)
}

/// EIPs of the NAT gateway hosting this speaker. A gateway that does not
/// exist, or whose BGP speaker is disabled, announces nothing.
pub fn nat_gw_eip_prefixes(gateway_name: &str, caches: &Caches) -> Result<PrefixSet> {
    let mut expected = PrefixSet::new();

    let gateway = match caches.nat_gateways.get(None, gateway_name) {
        Ok(gw) => gw,
        Err(e) if e.is_not_found() => {
            debug!("NAT gateway {} not found, expecting no routes", gateway_name);
            return Ok(expected);
        }
        Err(e) => return Err(e),
    };
    if !gateway.spec.bgp_speaker.enabled {
        debug!("BGP speaker disabled on NAT gateway {}", gateway_name);
        return Ok(expected);
    }

    for eip in caches.eips.list()? {
        if !eip.is_ready() || !eip.bgp_enabled() || !eip.belongs_to_gateway(gateway_name) {
            continue;
        }
        for ip in eip.addresses() {
            expected.add(ip);
        }
    }

    Ok(expected)
}

/// Ready, annotated EIPs whose NAT gateway pod runs on this node
pub fn node_route_eip_prefixes(
    caches: &Caches,
    placement: &PlacementResolver,
) -> Result<PrefixSet> {
    let mut expected = PrefixSet::new();

    for eip in caches.eips.list()? {
        if !eip.bgp_enabled() || !eip.is_ready() {
            continue;
        }
        if !placement.is_local(&eip) {
            continue;
        }
        for ip in eip.addresses() {
            expected.add(ip);
        }
    }

    Ok(expected)
}
