use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use ipnetwork::IpNetwork;
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodStatus};
use kube::api::ObjectMeta;
use speaker_api::annotations::{nat_gw_pod_name, BGP_ANNOTATION};
use speaker_api::v1::{IptablesEIPSpec, IptablesEIPStatus};
use speaker_api::IptablesEIP;
use speaker_core::{
    parse_prefix, Caches, MemoryCache, MemorySpeaker, Mode, ResourceEvent, SpeakerConfig,
    SpeakerController, SpeakerMetrics,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Cluster {
    eips: Arc<MemoryCache<IptablesEIP>>,
    gateway_pods: Arc<MemoryCache<Pod>>,
    speaker: Arc<MemorySpeaker>,
    controller: Arc<SpeakerController>,
}

fn cluster() -> Cluster {
    let eips = Arc::new(MemoryCache::new());
    let gateway_pods = Arc::new(MemoryCache::new());
    let speaker = Arc::new(MemorySpeaker::new());
    let caches = Caches {
        eips: eips.clone(),
        gateway_pods: gateway_pods.clone(),
        ..Default::default()
    };
    let config = SpeakerConfig {
        mode: Mode::NodeRouteEip,
        node_name: "node1".to_string(),
        ..Default::default()
    };
    let controller = SpeakerController::new(
        config,
        caches,
        speaker.clone(),
        SpeakerMetrics::new().unwrap(),
    )
    .unwrap();

    Cluster {
        eips,
        gateway_pods,
        speaker,
        controller: Arc::new(controller),
    }
}

fn eip(name: &str, gw: &str, v4: &str, v6: &str, ready: bool, bgp: bool) -> IptablesEIP {
    let mut e = IptablesEIP::new(
        name,
        IptablesEIPSpec {
            v4ip: v4.to_string(),
            v6ip: v6.to_string(),
            nat_gw_dp: gw.to_string(),
            ..Default::default()
        },
    );
    if bgp {
        e.metadata.annotations = Some(BTreeMap::from([(
            BGP_ANNOTATION.to_string(),
            "true".to_string(),
        )]));
    }
    e.status = Some(IptablesEIPStatus {
        ready,
        ..Default::default()
    });
    e
}

fn gw_pod(gw: &str, node: &str, phase: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(nat_gw_pod_name(gw)),
            namespace: Some("kube-system".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    }
}

fn routes(items: &[&str]) -> BTreeSet<IpNetwork> {
    items.iter().map(|s| parse_prefix(s).unwrap()).collect()
}

#[tokio::test]
async fn eip_lifecycle_follows_readiness_and_placement() {
    let c = cluster();
    let handler = c.controller.handler();
    c.gateway_pods.insert(gw_pod("gw1", "node1", "Running"));

    // Created but not ready: nothing is queued
    let created = eip("eip-1", "gw1", "172.18.0.10", "", false, true);
    c.eips.insert(created.clone());
    handler.handle_event(ResourceEvent::Added(Arc::new(created.clone()))).await;
    assert!(handler.queue().is_empty());

    // Becomes ready and eligible: announced by the worker
    let ready = eip("eip-1", "gw1", "172.18.0.10", "", true, true);
    c.eips.insert(ready.clone());
    handler
        .handle_event(ResourceEvent::Updated {
            old: Arc::new(created),
            new: Arc::new(ready.clone()),
        })
        .await;
    assert!(handler.process_next_item().await);
    assert_eq!(c.speaker.routes(), routes(&["172.18.0.10/32"]));

    // Gateway pod restarting, then the EIP is resynced: the worker withdraws
    c.gateway_pods.insert(gw_pod("gw1", "node1", "Pending"));
    handler
        .handle_event(ResourceEvent::Updated {
            old: Arc::new(ready.clone()),
            new: Arc::new(ready.clone()),
        })
        .await;
    assert!(handler.process_next_item().await);
    assert!(c.speaker.routes().is_empty());
    assert_eq!(c.speaker.withdraw_calls(), 1);

    // Back to Running, then deleted
    c.gateway_pods.insert(gw_pod("gw1", "node1", "Running"));
    handler
        .handle_event(ResourceEvent::Updated {
            old: Arc::new(ready.clone()),
            new: Arc::new(ready.clone()),
        })
        .await;
    assert!(handler.process_next_item().await);
    assert_eq!(c.speaker.routes(), routes(&["172.18.0.10"]));

    c.eips.remove(None, "eip-1");
    handler.handle_event(ResourceEvent::Deleted(Arc::new(ready))).await;
    assert!(c.speaker.routes().is_empty());
    assert!(c.controller.reconcile_once().await.unwrap().is_noop());
}

#[tokio::test]
async fn startup_enqueues_and_announces_every_eligible_eip() {
    let c = cluster();
    let handler = c.controller.handler();
    c.gateway_pods.insert(gw_pod("gw1", "node1", "Running"));
    c.gateway_pods.insert(gw_pod("gw2", "node1", "Running"));
    c.eips.insert(eip("eip-1", "gw1", "172.18.0.10", "fd00::10", true, true));
    c.eips.insert(eip("eip-2", "gw2", "172.18.0.11", "fd00::11", true, true));
    c.eips.insert(eip("eip-3", "gw1", "172.18.0.12", "", false, true));
    c.eips.insert(eip("eip-4", "gw2", "172.18.0.13", "", true, false));

    assert_eq!(handler.enqueue_all_ready().unwrap(), 2);
    assert_eq!(handler.queue().len(), 2);

    assert!(handler.process_next_item().await);
    assert!(handler.process_next_item().await);
    assert!(handler.queue().is_empty());

    assert_eq!(
        c.speaker.routes(),
        routes(&["172.18.0.10", "fd00::10", "172.18.0.11", "fd00::11"])
    );
    assert_eq!(c.speaker.announce_calls(), 4);
    assert_eq!(c.speaker.withdraw_calls(), 0);
}

#[tokio::test]
async fn event_and_periodic_paths_agree_on_eligibility() {
    let cases = [
        // (ready, annotated, pod node, pod phase, announced)
        (true, true, "node1", "Running", true),
        (false, true, "node1", "Running", false),
        (true, false, "node1", "Running", false),
        (true, true, "node2", "Running", false),
        (true, true, "node1", "Pending", false),
    ];

    for (ready, bgp, node, phase, announced) in cases {
        let expected = if announced {
            routes(&["172.18.0.10"])
        } else {
            BTreeSet::new()
        };

        let event_path = cluster();
        event_path.gateway_pods.insert(gw_pod("gw1", node, phase));
        let e = eip("eip-1", "gw1", "172.18.0.10", "", ready, bgp);
        event_path.eips.insert(e.clone());
        let handler = event_path.controller.handler();
        handler.handle_event(ResourceEvent::Added(Arc::new(e.clone()))).await;
        if !handler.queue().is_empty() {
            assert!(handler.process_next_item().await);
        }
        let case = (ready, bgp, node, phase);
        assert_eq!(event_path.speaker.routes(), expected, "event path {:?}", case);

        let periodic = cluster();
        periodic.gateway_pods.insert(gw_pod("gw1", node, phase));
        periodic.eips.insert(e);
        periodic.controller.reconcile_once().await.unwrap();
        assert_eq!(periodic.speaker.routes(), expected, "periodic path {:?}", case);
    }
}

#[tokio::test(start_paused = true)]
async fn watch_events_drive_the_workers() {
    let c = cluster();
    c.gateway_pods.insert(gw_pod("gw1", "node1", "Running"));
    let (tx, rx) = mpsc::unbounded_channel();
    let token = CancellationToken::new();
    let run = {
        let controller = c.controller.clone();
        let token = token.clone();
        tokio::spawn(async move { controller.run(Some(rx), token).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let e = eip("eip-1", "gw1", "172.18.0.10", "", true, true);
    c.eips.insert(e.clone());
    tx.send(ResourceEvent::Added(Arc::new(e.clone()))).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(c.speaker.routes(), routes(&["172.18.0.10"]));

    c.eips.remove(None, "eip-1");
    tx.send(ResourceEvent::Deleted(Arc::new(e))).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(c.speaker.routes().is_empty());

    token.cancel();
    run.await.unwrap().unwrap();
}
