use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Subnet is a logical switch with one CIDR per address family
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kubeovn.io",
    version = "v1",
    kind = "Subnet",
    plural = "subnets",
    derive = "Default",
    status = "SubnetStatus",
)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Comma-separated CIDRs, e.g. "10.16.0.0/16,fd00:10:16::/64"
    #[serde(default)]
    pub cidr_block: String,

    #[serde(default)]
    pub protocol: String,

    #[serde(default)]
    pub gateway: String,

    #[serde(default)]
    pub vpc: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubnetStatus {
    #[serde(default)]
    pub conditions: Vec<SubnetCondition>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubnetCondition {
    pub r#type: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl Subnet {
    /// A subnet is only announced once the controller has validated it
    pub fn is_validated(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| {
                s.conditions
                    .iter()
                    .any(|c| c.r#type == "Validated" && c.status == "True")
            })
            .unwrap_or(false)
    }

    pub fn cidrs(&self) -> impl Iterator<Item = &str> {
        self.spec
            .cidr_block
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}
