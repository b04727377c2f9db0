//! Well-known annotations and labels, and the naming convention of NAT
//! gateway pods.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Pod, Service};

/// Annotation requesting BGP announcement of a resource
pub const BGP_ANNOTATION: &str = "ovn.kubernetes.io/bgp";

/// Annotation naming the subnet a pod got its address from
pub const LOGICAL_SWITCH_ANNOTATION: &str = "ovn.kubernetes.io/logical_switch";

/// Label carrying the NAT gateway name on EIPs and gateway pods
pub const VPC_NAT_GW_NAME_LABEL: &str = "ovn.kubernetes.io/vpc-nat-gw-name";

/// Namespace NAT gateway pods run in unless configured otherwise
pub const DEFAULT_VPC_NAT_GW_NAMESPACE: &str = "kube-system";

/// Name of the pod backing NAT gateway deployment `dp`.
pub fn nat_gw_pod_name(dp: &str) -> String {
    format!("vpc-nat-gw-{}-0", dp)
}

/// Scope of a BGP announcement requested through [`BGP_ANNOTATION`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BgpPolicy {
    /// `"true"` or `"cluster"`: every speaker announces the address
    Cluster,
    /// `"local"`: only the speaker on the node hosting the address announces it
    Local,
}

impl BgpPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "true" | "cluster" => Some(BgpPolicy::Cluster),
            "local" => Some(BgpPolicy::Local),
            _ => None,
        }
    }

    pub fn from_annotations(annotations: Option<&BTreeMap<String, String>>) -> Option<Self> {
        annotations
            .and_then(|a| a.get(BGP_ANNOTATION))
            .and_then(|v| Self::parse(v))
    }
}

/// A pod is alive while it is neither terminating nor finished.
pub fn is_pod_alive(pod: &Pod) -> bool {
    if pod.metadata.deletion_timestamp.is_some() {
        return false;
    }
    !matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

pub fn is_host_network(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.host_network)
        .unwrap_or(false)
}

pub fn pod_node_name(pod: &Pod) -> Option<&str> {
    pod.spec.as_ref().and_then(|s| s.node_name.as_deref())
}

pub fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

/// All IPs of a pod, falling back to `status.podIP` on old API servers
pub fn pod_ips(pod: &Pod) -> Vec<&str> {
    let Some(status) = pod.status.as_ref() else {
        return Vec::new();
    };
    let ips: Vec<&str> = status
        .pod_ips
        .iter()
        .flatten()
        .map(|ip| ip.ip.as_str())
        .filter(|ip| !ip.is_empty())
        .collect();
    if !ips.is_empty() {
        return ips;
    }
    status.pod_ip.as_deref().into_iter().collect()
}

/// Cluster IPs of a service, excluding headless services
pub fn service_cluster_ips(svc: &Service) -> Vec<&str> {
    let Some(spec) = svc.spec.as_ref() else {
        return Vec::new();
    };
    spec.cluster_ips
        .iter()
        .flatten()
        .map(String::as_str)
        .filter(|ip| !ip.is_empty() && *ip != "None")
        .collect()
}
