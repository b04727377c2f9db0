use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::annotations::{BGP_ANNOTATION, VPC_NAT_GW_NAME_LABEL};

/// IptablesEIP is an externally reachable address bound to a VPC NAT gateway.
/// The gateway pod that owns the address decides which node announces it.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kubeovn.io",
    version = "v1",
    kind = "IptablesEIP",
    plural = "iptables-eips",
    derive = "Default",
    status = "IptablesEIPStatus",
)]
#[serde(rename_all = "camelCase")]
pub struct IptablesEIPSpec {
    /// IPv4 address, empty when the EIP is IPv6 only
    #[serde(default)]
    pub v4ip: String,

    /// IPv6 address, empty when the EIP is IPv4 only
    #[serde(default)]
    pub v6ip: String,

    #[serde(default)]
    pub mac_address: String,

    /// Name of the NAT gateway deployment owning this EIP
    #[serde(default)]
    pub nat_gw_dp: String,

    #[serde(default)]
    pub qos_policy: String,

    /// External subnet the address was allocated from
    #[serde(default)]
    pub external_subnet: String,
}

/// Status of an IptablesEIP
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IptablesEIPStatus {
    /// Whether the address has been programmed on the gateway
    #[serde(default)]
    pub ready: bool,

    #[serde(default)]
    pub ip: String,

    #[serde(default)]
    pub nat: String,

    #[serde(default)]
    pub qos_policy: String,
}

impl IptablesEIP {
    /// Name of the object, empty if unset
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn is_ready(&self) -> bool {
        self.status.as_ref().map(|s| s.ready).unwrap_or(false)
    }

    /// EIPs are only announced with an explicit `"true"` BGP annotation.
    pub fn bgp_enabled(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(BGP_ANNOTATION))
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Non-empty addresses of this EIP, IPv4 first
    pub fn addresses(&self) -> Vec<&str> {
        [self.spec.v4ip.as_str(), self.spec.v6ip.as_str()]
            .into_iter()
            .filter(|ip| !ip.is_empty())
            .collect()
    }

    /// Whether this EIP is attached to the given NAT gateway, either through
    /// its spec or through the gateway name label.
    pub fn belongs_to_gateway(&self, gateway: &str) -> bool {
        if self.spec.nat_gw_dp == gateway {
            return true;
        }
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(VPC_NAT_GW_NAME_LABEL))
            .map(|v| v == gateway)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn eip(v4: &str, v6: &str, annotation: Option<&str>) -> IptablesEIP {
        let mut eip = IptablesEIP::new(
            "eip-1",
            IptablesEIPSpec {
                v4ip: v4.to_string(),
                v6ip: v6.to_string(),
                nat_gw_dp: "gw1".to_string(),
                ..Default::default()
            },
        );
        if let Some(value) = annotation {
            eip.metadata.annotations = Some(BTreeMap::from([(
                BGP_ANNOTATION.to_string(),
                value.to_string(),
            )]));
        }
        eip
    }

    #[test]
    fn test_addresses_skip_empty() {
        assert_eq!(eip("10.0.0.1", "", None).addresses(), vec!["10.0.0.1"]);
        assert_eq!(eip("", "fd00::1", None).addresses(), vec!["fd00::1"]);
        assert_eq!(
            eip("10.0.0.1", "fd00::1", None).addresses(),
            vec!["10.0.0.1", "fd00::1"]
        );
        assert!(eip("", "", None).addresses().is_empty());
    }

    #[test]
    fn test_bgp_enabled_requires_true() {
        assert!(eip("10.0.0.1", "", Some("true")).bgp_enabled());
        assert!(!eip("10.0.0.1", "", Some("cluster")).bgp_enabled());
        assert!(!eip("10.0.0.1", "", Some("false")).bgp_enabled());
        assert!(!eip("10.0.0.1", "", None).bgp_enabled());
    }

    #[test]
    fn test_ready_defaults_false() {
        let mut e = eip("10.0.0.1", "", None);
        assert!(!e.is_ready());
        e.status = Some(IptablesEIPStatus {
            ready: true,
            ..Default::default()
        });
        assert!(e.is_ready());
    }

    #[test]
    fn test_belongs_to_gateway() {
        let mut e = eip("10.0.0.1", "", None);
        assert!(e.belongs_to_gateway("gw1"));
        assert!(!e.belongs_to_gateway("gw2"));

        e.metadata.labels = Some(BTreeMap::from([(
            VPC_NAT_GW_NAME_LABEL.to_string(),
            "gw2".to_string(),
        )]));
        assert!(e.belongs_to_gateway("gw2"));
    }

    #[test]
    fn test_deserialize_camel_case() {
        let e: IptablesEIP = serde_json::from_value(serde_json::json!({
            "apiVersion": "kubeovn.io/v1",
            "kind": "IptablesEIP",
            "metadata": { "name": "eip-1" },
            "spec": { "v4ip": "172.18.0.10", "natGwDp": "gw1" },
            "status": { "ready": true, "ip": "172.18.0.10" }
        }))
        .unwrap();
        assert_eq!(e.name(), "eip-1");
        assert_eq!(e.spec.nat_gw_dp, "gw1");
        assert!(e.is_ready());
        assert_eq!(e.addresses(), vec!["172.18.0.10"]);
    }
}
