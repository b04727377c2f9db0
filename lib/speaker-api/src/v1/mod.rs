/// API version v1 of the kubeovn.io resources consumed by the speaker

pub mod iptables_eip;
pub mod subnet;
pub mod vpc_nat_gateway;

pub use iptables_eip::{IptablesEIP, IptablesEIPSpec, IptablesEIPStatus};
pub use subnet::{Subnet, SubnetCondition, SubnetSpec, SubnetStatus};
pub use vpc_nat_gateway::{VpcBgpSpeaker, VpcNatGateway, VpcNatGatewaySpec};
