//! Prometheus metrics for the speaker

use std::sync::Arc;

use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};

use crate::{Result, SpeakerError};

/// Route and reconciliation metrics, cheap to clone
#[derive(Clone)]
pub struct SpeakerMetrics {
    /// Routes announced by passes and event handlers
    pub routes_announced_total: Counter,
    /// Routes withdrawn by passes and event handlers
    pub routes_withdrawn_total: Counter,
    /// Failed announce/withdraw calls by operation
    pub route_errors_total: CounterVec,
    /// Reconciliation passes by result
    pub reconcile_total: CounterVec,
    /// Size of the last computed expected set
    pub expected_prefixes: Gauge,
    /// Keys waiting in the EIP queue
    pub queue_depth: Gauge,
    pub registry: Arc<Registry>,
}

impl SpeakerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let routes_announced_total = Counter::new(
            "bgp_routes_announced_total",
            "Total BGP routes announced",
        )?;
        let routes_withdrawn_total = Counter::new(
            "bgp_routes_withdrawn_total",
            "Total BGP routes withdrawn",
        )?;
        let route_errors_total = CounterVec::new(
            Opts::new("bgp_route_errors_total", "Failed BGP route operations"),
            &["op"],
        )?;
        let reconcile_total = CounterVec::new(
            Opts::new("bgp_reconcile_total", "Reconciliation passes by result"),
            &["result"],
        )?;
        let expected_prefixes = Gauge::new(
            "bgp_expected_prefixes",
            "Prefixes expected at the last reconciliation pass",
        )?;
        let queue_depth =
            Gauge::new("eip_queue_depth", "IptablesEIP keys waiting to be processed")?;

        registry.register(Box::new(routes_announced_total.clone()))?;
        registry.register(Box::new(routes_withdrawn_total.clone()))?;
        registry.register(Box::new(route_errors_total.clone()))?;
        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(expected_prefixes.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            routes_announced_total,
            routes_withdrawn_total,
            route_errors_total,
            reconcile_total,
            expected_prefixes,
            queue_depth,
            registry,
        })
    }

    pub fn record_route_error(&self, op: &str) {
        self.route_errors_total.with_label_values(&[op]).inc();
    }

    pub fn record_reconcile(&self, ok: bool) {
        let result = if ok { "success" } else { "error" };
        self.reconcile_total.with_label_values(&[result]).inc();
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| SpeakerError::Internal(e.to_string()))
    }
}
