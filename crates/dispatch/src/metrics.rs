//! Reconcile error accounting.

use metrics::counter;
use sluice_core::WorkKey;

/// Receives one call per failed sync.
pub trait ReconcileMetrics: Send + Sync {
    fn record_error(&self, controller: &str, key: &WorkKey);
}

/// Publishes `controller_reconcile_errors_total` through the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

impl ReconcileMetrics for PrometheusMetrics {
    fn record_error(&self, controller: &str, key: &WorkKey) {
        counter!(
            "controller_reconcile_errors_total",
            1u64,
            "controller" => controller.to_string(),
            "namespace" => key.namespace().unwrap_or_default().to_string(),
            "name" => key.name().to_string()
        );
    }
}
