//! Placement of NAT gateway workloads

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use speaker_api::annotations::{nat_gw_pod_name, pod_node_name, pod_phase};
use speaker_api::IptablesEIP;
use tracing::{debug, error};

use crate::cache::ResourceCache;

/// Decides whether the workload owning an EIP runs on this node
pub struct PlacementResolver {
    node_name: String,
    namespace: String,
    pods: Arc<dyn ResourceCache<Pod>>,
}

impl PlacementResolver {
    /// `pods` must cover the NAT gateway pods in `namespace`
    pub fn new(
        node_name: impl Into<String>,
        namespace: impl Into<String>,
        pods: Arc<dyn ResourceCache<Pod>>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            namespace: namespace.into(),
            pods,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// True only when the gateway pod exists, is Running and is scheduled
    /// on this node. A missing pod is an ordinary answer, not an error.
    pub fn is_local(&self, eip: &IptablesEIP) -> bool {
        if eip.spec.nat_gw_dp.is_empty() {
            error!(eip = %eip.name(), "IptablesEIP has empty natGwDp field");
            return false;
        }

        let pod_name = nat_gw_pod_name(&eip.spec.nat_gw_dp);
        let pod = match self.pods.get(Some(&self.namespace), &pod_name) {
            Ok(pod) => pod,
            Err(e) => {
                debug!(
                    eip = %eip.name(),
                    "Failed to get NAT GW pod {}/{}: {}",
                    self.namespace, pod_name, e
                );
                return false;
            }
        };

        pod_node_name(&pod) == Some(self.node_name.as_str()) && pod_phase(&pod) == Some("Running")
    }
}
