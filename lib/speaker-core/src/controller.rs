//! The speaker controller: periodic reconciliation plus, in node-route mode,
//! event-driven handling of IptablesEIP changes.

use std::sync::Arc;

use speaker_api::IptablesEIP;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::ResourceEvent;
use crate::config::{Mode, SpeakerConfig};
use crate::dispatcher::EipEventHandler;
use crate::metrics::SpeakerMetrics;
use crate::modes::{expected_prefixes, Caches};
use crate::placement::PlacementResolver;
use crate::prefix::PrefixSet;
use crate::queue::RetryQueue;
use crate::reconcile::{reconcile_routes, ReconcileSummary};
use crate::speaker::RouteSpeaker;
use crate::{Result, SpeakerError};

pub struct SpeakerController {
    config: SpeakerConfig,
    caches: Caches,
    speaker: Arc<dyn RouteSpeaker>,
    placement: Arc<PlacementResolver>,
    handler: Arc<EipEventHandler>,
    metrics: SpeakerMetrics,
}

impl SpeakerController {
    pub fn new(
        config: SpeakerConfig,
        caches: Caches,
        speaker: Arc<dyn RouteSpeaker>,
        metrics: SpeakerMetrics,
    ) -> Result<Self> {
        config.validate()?;

        let placement = Arc::new(PlacementResolver::new(
            config.node_name.clone(),
            config.vpc_nat_gw_namespace.clone(),
            caches.gateway_pods.clone(),
        ));
        let handler = Arc::new(EipEventHandler::new(
            caches.eips.clone(),
            placement.clone(),
            speaker.clone(),
            RetryQueue::new("iptables-eip"),
            metrics.clone(),
        ));

        Ok(Self {
            config,
            caches,
            speaker,
            placement,
            handler,
            metrics,
        })
    }

    pub fn config(&self) -> &SpeakerConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<EipEventHandler> {
        &self.handler
    }

    pub fn expected_prefixes(&self) -> Result<PrefixSet> {
        expected_prefixes(self.config.mode, &self.config, &self.caches, &self.placement)
    }

    /// One full pass: compute the expected set and make the speaker match it
    pub async fn reconcile_once(&self) -> Result<ReconcileSummary> {
        let result = self.try_reconcile().await;
        self.metrics.record_reconcile(result.is_ok());
        result
    }

    async fn try_reconcile(&self) -> Result<ReconcileSummary> {
        let expected = self.expected_prefixes()?;
        self.metrics.expected_prefixes.set(expected.len() as f64);

        let result = reconcile_routes(self.speaker.as_ref(), &expected).await;
        match &result {
            Ok(summary) => {
                self.metrics.routes_announced_total.inc_by(summary.announced as f64);
                self.metrics.routes_withdrawn_total.inc_by(summary.withdrawn as f64);
                if !summary.is_noop() {
                    info!(
                        mode = %self.config.mode,
                        announced = summary.announced,
                        withdrawn = summary.withdrawn,
                        "Reconciled BGP routes"
                    );
                }
            }
            Err(SpeakerError::Batch(errors)) => {
                for e in errors {
                    self.record_route_error(e);
                }
            }
            Err(e) => self.record_route_error(e),
        }
        result
    }

    fn record_route_error(&self, err: &SpeakerError) {
        match err {
            SpeakerError::Announce { .. } => self.metrics.record_route_error("announce"),
            SpeakerError::Withdraw { .. } => self.metrics.record_route_error("withdraw"),
            _ => {}
        }
    }

    /// Run until `token` is cancelled.
    ///
    /// Waits for every cache to sync first; a cache that does not sync within
    /// the configured timeout is fatal. `events` feeds IptablesEIP changes to
    /// the queue workers and is only consumed in node-route mode.
    pub async fn run(
        &self,
        events: Option<mpsc::UnboundedReceiver<ResourceEvent<IptablesEIP>>>,
        token: CancellationToken,
    ) -> Result<()> {
        info!(mode = %self.config.mode, "Starting BGP speaker controller");

        // Initial list events arrive before the caches report synced; they
        // are queued now and handled once the workers start.
        let mut tasks = JoinSet::new();
        if self.config.mode == Mode::NodeRouteEip {
            if let Some(events) = events {
                tasks.spawn(pump_events(self.handler.clone(), events, token.clone()));
            }
        }

        let synced = tokio::select! {
            _ = token.cancelled() => {
                info!("Shutdown requested before caches synced");
                self.shut_down(tasks).await;
                return Ok(());
            }
            synced = tokio::time::timeout(
                self.config.cache_sync_timeout,
                self.caches.wait_for_sync(),
            ) => {
                synced.unwrap_or_else(|_| {
                    Err(SpeakerError::CacheSync(format!(
                        "caches not synced after {:?}",
                        self.config.cache_sync_timeout
                    )))
                })
            }
        };
        if let Err(e) = synced {
            tasks.abort_all();
            self.shut_down(tasks).await;
            return Err(e);
        }
        info!("Caches synced");

        if self.config.mode == Mode::NodeRouteEip {
            for _ in 0..self.config.workers {
                let handler = self.handler.clone();
                tasks.spawn(async move { handler.run_worker().await });
            }

            match self.handler.enqueue_all_ready() {
                Ok(count) => info!("Enqueued {} IptablesEIPs for startup sync", count),
                Err(e) => error!("Failed to list IptablesEIPs for startup sync: {}", e),
            }
        }

        let mut ticker = tokio::time::interval(self.config.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        error!(mode = %self.config.mode, "Failed to reconcile BGP routes: {}", e);
                    }
                }
            }
        }

        info!("Shutting down BGP speaker controller");
        self.shut_down(tasks).await;
        Ok(())
    }

    async fn shut_down(&self, mut tasks: JoinSet<()>) {
        self.handler.queue().shut_down();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Err(e) if !e.is_cancelled() => warn!("Controller task failed: {}", e),
                _ => {}
            }
        }
    }
}

async fn pump_events(
    handler: Arc<EipEventHandler>,
    mut events: mpsc::UnboundedReceiver<ResourceEvent<IptablesEIP>>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => handler.handle_event(event).await,
                None => {
                    debug!("IptablesEIP event stream closed");
                    break;
                }
            },
        }
    }
}
