//! Prometheus metrics for the reconcile loops.

use crate::error::ControllerError;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Reconcile counters and latencies, labelled by controller.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    reconcile_duration: HistogramVec,
}

impl Metrics {
    /// Create the metric families and register them on a fresh registry.
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();
        let reconcile_total = IntCounterVec::new(
            Opts::new("easylb_reconcile_total", "Reconciliations by controller and result"),
            &["controller", "result"],
        )?;
        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new("easylb_reconcile_duration_seconds", "Reconciliation latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
            &["controller"],
        )?;
        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_duration,
        })
    }

    /// Record one reconcile pass. `result` is `success` or an error kind.
    pub fn observe(&self, controller: &str, result: &str, elapsed: Duration) {
        self.reconcile_total.with_label_values(&[controller, result]).inc();
        self.reconcile_duration
            .with_label_values(&[controller])
            .observe(elapsed.as_secs_f64());
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()).into())
    }
}
