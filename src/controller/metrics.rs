//! Prometheus metrics of the reconcilers

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

use crate::error::{Error, Result};

pub const RESULT_SUCCESS: &str = "success";
pub const RESULT_ERROR: &str = "error";

/// Operator metrics, registered in an owned registry
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciles: IntCounterVec,
    reconcile_duration: HistogramVec,
    evacuation_blocked: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("piraeus_operator".to_string()), None)?;

        let reconciles = IntCounterVec::new(
            Opts::new("reconciles_total", "Reconciliations grouped by kind and result"),
            &["kind", "result"],
        )?;
        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new("reconcile_duration_seconds", "Duration of reconciliations")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["kind"],
        )?;
        let evacuation_blocked = IntGaugeVec::new(
            Opts::new(
                "evacuation_blocked_resources",
                "Resources still placed on a satellite being removed",
            ),
            &["node"],
        )?;

        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(evacuation_blocked.clone()))?;

        Ok(Self {
            registry,
            reconciles,
            reconcile_duration,
            evacuation_blocked,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record one finished reconciliation
    pub fn reconciled(&self, kind: &str, elapsed: Duration, success: bool) {
        let result = if success { RESULT_SUCCESS } else { RESULT_ERROR };
        self.reconciles.with_label_values(&[kind, result]).inc();
        self.reconcile_duration
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
    }

    /// Track the resources blocking removal of `node`; zero clears the series
    pub fn set_evacuation_blocked(&self, node: &str, resources: usize) {
        if resources == 0 {
            let _ = self.evacuation_blocked.remove_label_values(&[node]);
        } else {
            self.evacuation_blocked
                .with_label_values(&[node])
                .set(resources as i64);
        }
    }

    /// Text exposition of all metrics
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics not UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.reconciled("LinstorSatellite", Duration::from_millis(20), true);
        metrics.reconciled("LinstorSatellite", Duration::from_millis(20), false);

        let text = metrics.encode().unwrap();
        assert!(text.contains(
            r#"piraeus_operator_reconciles_total{kind="LinstorSatellite",result="success"} 1"#
        ));
        assert!(text.contains("piraeus_operator_reconcile_duration_seconds_count"));
    }

    #[test]
    fn test_evacuation_gauge() {
        let metrics = Metrics::new().unwrap();
        metrics.set_evacuation_blocked("node-a", 2);
        assert!(metrics
            .encode()
            .unwrap()
            .contains(r#"piraeus_operator_evacuation_blocked_resources{node="node-a"} 2"#));

        metrics.set_evacuation_blocked("node-a", 0);
        assert!(!metrics.encode().unwrap().contains(r#"node="node-a""#));
    }
}
