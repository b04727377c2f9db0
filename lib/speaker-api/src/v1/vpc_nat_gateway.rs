use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// VpcNatGateway runs a NAT gateway pod for a VPC. When its BGP speaker is
/// enabled the speaker runs inside the gateway pod and announces the EIPs of
/// that gateway.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kubeovn.io",
    version = "v1",
    kind = "VpcNatGateway",
    plural = "vpc-nat-gateways",
    derive = "Default",
)]
#[serde(rename_all = "camelCase")]
pub struct VpcNatGatewaySpec {
    #[serde(default)]
    pub vpc: String,

    #[serde(default)]
    pub subnet: String,

    #[serde(default)]
    pub lan_ip: String,

    /// In-pod BGP speaker settings
    #[serde(default)]
    pub bgp_speaker: VpcBgpSpeaker,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VpcBgpSpeaker {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub asn: u32,

    #[serde(default)]
    pub remote_asn: u32,

    #[serde(default)]
    pub neighbors: Vec<String>,
}
