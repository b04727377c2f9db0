//! Kubernetes client wiring the watches each mode needs

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{Api, Client};
use kube_runtime::watcher;
use speaker_api::{IptablesEIP, Subnet, VpcNatGateway};
use speaker_core::{Caches, Mode, ResourceEvent, Result, SpeakerConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::watch::watch_resource;

/// Caches for one mode plus the tasks keeping them current
pub struct Watches {
    pub caches: Caches,
    /// IptablesEIP changes, only in node-route mode
    pub eip_events: Option<mpsc::UnboundedReceiver<ResourceEvent<IptablesEIP>>>,
    pub tasks: Vec<JoinHandle<()>>,
}

/// SpeakerClient wraps the Kubernetes client used by the speaker
pub struct SpeakerClient {
    client: Client,
}

impl SpeakerClient {
    /// Connect using the in-cluster or kubeconfig configuration
    pub async fn new() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Start the watches `config.mode` reads from. Kinds the mode does not
    /// use are served by empty caches.
    pub fn start_watches(&self, config: &SpeakerConfig, token: &CancellationToken) -> Watches {
        let mut caches = Caches::default();
        let mut tasks = Vec::new();
        let mut eip_events = None;

        match config.mode {
            Mode::SubnetRoutes => {
                let (subnets, task) = watch_resource(
                    Api::<Subnet>::all(self.client.clone()),
                    watcher::Config::default(),
                    None,
                    token.clone(),
                );
                caches.subnets = Arc::new(subnets);
                tasks.push(task);

                let (pods, task) = watch_resource(
                    Api::<Pod>::all(self.client.clone()),
                    watcher::Config::default().fields("spec.hostNetwork=false"),
                    None,
                    token.clone(),
                );
                caches.pods = Arc::new(pods);
                tasks.push(task);

                if config.announce_cluster_ip {
                    let (services, task) = watch_resource(
                        Api::<Service>::all(self.client.clone()),
                        watcher::Config::default(),
                        None,
                        token.clone(),
                    );
                    caches.services = Arc::new(services);
                    tasks.push(task);
                }
            }
            Mode::NatGwEip => {
                let (eips, task) = watch_resource(
                    Api::<IptablesEIP>::all(self.client.clone()),
                    watcher::Config::default(),
                    None,
                    token.clone(),
                );
                caches.eips = Arc::new(eips);
                tasks.push(task);

                let (gateways, task) = watch_resource(
                    Api::<VpcNatGateway>::all(self.client.clone()),
                    watcher::Config::default(),
                    None,
                    token.clone(),
                );
                caches.nat_gateways = Arc::new(gateways);
                tasks.push(task);
            }
            Mode::NodeRouteEip => {
                let (tx, rx) = mpsc::unbounded_channel();
                let (eips, task) = watch_resource(
                    Api::<IptablesEIP>::all(self.client.clone()),
                    watcher::Config::default(),
                    Some(tx),
                    token.clone(),
                );
                caches.eips = Arc::new(eips);
                tasks.push(task);
                eip_events = Some(rx);

                let (pods, task) = watch_resource(
                    Api::<Pod>::namespaced(self.client.clone(), &config.vpc_nat_gw_namespace),
                    watcher::Config::default(),
                    None,
                    token.clone(),
                );
                caches.gateway_pods = Arc::new(pods);
                tasks.push(task);
            }
        }

        info!(mode = %config.mode, watches = tasks.len(), "Started resource watches");
        Watches {
            caches,
            eip_events,
            tasks,
        }
    }
}
