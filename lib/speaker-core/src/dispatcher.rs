//! IptablesEIP change handling for node-route mode
//!
//! Watch events are turned into queue keys (the EIP name). A worker then
//! re-reads the EIP from the cache and announces or withdraws its addresses
//! depending on readiness, annotation and placement at that moment, so the
//! handler never acts on a stale event payload.

use std::sync::Arc;

use speaker_api::IptablesEIP;
use tracing::{debug, error, info, warn};

use crate::cache::{ResourceCache, ResourceEvent};
use crate::metrics::SpeakerMetrics;
use crate::placement::PlacementResolver;
use crate::queue::RetryQueue;
use crate::reconcile::{announce_addresses, withdraw_addresses, AppliedRoutes};
use crate::speaker::RouteSpeaker;
use crate::Result;

pub struct EipEventHandler {
    eips: Arc<dyn ResourceCache<IptablesEIP>>,
    placement: Arc<PlacementResolver>,
    speaker: Arc<dyn RouteSpeaker>,
    queue: RetryQueue<String>,
    metrics: SpeakerMetrics,
}

impl EipEventHandler {
    pub fn new(
        eips: Arc<dyn ResourceCache<IptablesEIP>>,
        placement: Arc<PlacementResolver>,
        speaker: Arc<dyn RouteSpeaker>,
        queue: RetryQueue<String>,
        metrics: SpeakerMetrics,
    ) -> Self {
        Self {
            eips,
            placement,
            speaker,
            queue,
            metrics,
        }
    }

    pub fn queue(&self) -> &RetryQueue<String> {
        &self.queue
    }

    pub fn on_add(&self, eip: &IptablesEIP) {
        if !eip.is_ready() {
            debug!(eip = %eip.name(), "IptablesEIP not ready, skipping add");
            return;
        }
        debug!(eip = %eip.name(), "Enqueue add IptablesEIP");
        self.queue.add(eip.name().to_string());
    }

    pub fn on_update(&self, _old: &IptablesEIP, new: &IptablesEIP) {
        if new.is_deleting() {
            debug!(eip = %new.name(), "IptablesEIP is being deleted, skipping update");
            return;
        }
        debug!(eip = %new.name(), "Enqueue update IptablesEIP");
        self.queue.add(new.name().to_string());
    }

    /// Withdraw the addresses of a deleted EIP right away. The object is
    /// gone from the cache, so this cannot go through the queue. Failures
    /// are only logged; the periodic pass withdraws whatever is left.
    pub async fn on_delete(&self, eip: &IptablesEIP) {
        info!(eip = %eip.name(), "IptablesEIP deleted, withdrawing BGP routes");
        let applied =
            withdraw_addresses(self.speaker.as_ref(), eip.name(), &eip.addresses()).await;
        if let Err(e) = self.record("withdraw", applied) {
            error!(
                eip = %eip.name(),
                "Failed to withdraw BGP routes for deleted IptablesEIP: {}",
                e
            );
        }
    }

    pub async fn handle_event(&self, event: ResourceEvent<IptablesEIP>) {
        match event {
            ResourceEvent::Added(eip) => self.on_add(&eip),
            ResourceEvent::Updated { old, new } => self.on_update(&old, &new),
            ResourceEvent::Deleted(eip) => self.on_delete(&eip).await,
        }
        self.metrics.queue_depth.set(self.queue.len() as f64);
    }

    /// Bring the routes of one EIP in line with its current state
    pub async fn handle_eip(&self, name: &str) -> Result<()> {
        let eip = match self.eips.get(None, name) {
            Ok(eip) => eip,
            Err(e) if e.is_not_found() => {
                debug!(eip = %name, "IptablesEIP no longer exists");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if !eip.is_ready() {
            debug!(eip = %name, "IptablesEIP not ready, skipping");
            return Ok(());
        }

        let addresses = eip.addresses();
        if !eip.bgp_enabled() {
            debug!(eip = %name, "BGP annotation not set, withdrawing routes");
            let applied = withdraw_addresses(self.speaker.as_ref(), name, &addresses).await;
            return self.record("withdraw", applied);
        }

        if !self.placement.is_local(&eip) {
            debug!(
                eip = %name,
                node = %self.placement.node_name(),
                "NAT gateway pod not on this node, withdrawing routes"
            );
            let applied = withdraw_addresses(self.speaker.as_ref(), name, &addresses).await;
            return self.record("withdraw", applied);
        }

        let applied = announce_addresses(self.speaker.as_ref(), name, &addresses).await;
        self.record("announce", applied)
    }

    fn record(&self, op: &str, applied: AppliedRoutes) -> Result<()> {
        let counter = if op == "announce" {
            &self.metrics.routes_announced_total
        } else {
            &self.metrics.routes_withdrawn_total
        };
        counter.inc_by(applied.changed.len() as f64);
        for _ in &applied.errors {
            self.metrics.record_route_error(op);
        }
        applied.into_result().map(|_| ())
    }

    /// Take one key off the queue and handle it. Returns false once the
    /// queue is shut down and drained.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        match self.handle_eip(&key).await {
            Ok(()) => self.queue.forget(&key),
            Err(e) => {
                warn!(
                    eip = %key,
                    requeues = self.queue.num_requeues(&key),
                    "Error syncing IptablesEIP, requeuing: {}",
                    e
                );
                self.queue.add_rate_limited(key.clone());
            }
        }
        self.queue.done(&key);
        self.metrics.queue_depth.set(self.queue.len() as f64);
        true
    }

    pub async fn run_worker(&self) {
        while self.process_next_item().await {}
        debug!(queue = %self.queue.name(), "Worker stopped");
    }

    /// Enqueue every ready, annotated EIP once
    pub fn enqueue_all_ready(&self) -> Result<usize> {
        let mut count = 0;
        for eip in self.eips.list()? {
            if eip.is_ready() && eip.bgp_enabled() {
                self.queue.add(eip.name().to_string());
                count += 1;
            }
        }
        Ok(count)
    }
}
