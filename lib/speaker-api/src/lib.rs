//! Kubernetes API types consumed by the BGP speaker
//!
//! This library defines bindings to the kube-ovn custom resources the speaker
//! watches, together with the annotations that drive announcement:
//! - IptablesEIP: externally reachable addresses owned by NAT gateways
//! - Subnet: logical switches whose CIDRs may be announced
//! - VpcNatGateway: NAT gateways, optionally running an in-pod speaker

pub mod annotations;
pub mod v1;

pub use annotations::{BgpPolicy, BGP_ANNOTATION, VPC_NAT_GW_NAME_LABEL, nat_gw_pod_name};
pub use v1::{IptablesEIP, Subnet, VpcNatGateway};
