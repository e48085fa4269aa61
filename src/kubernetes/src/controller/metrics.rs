use kube::{Resource, ResourceExt};
use prometheus::{histogram_opts, opts, HistogramVec, IntCounterVec};
use prometheus::{IntGaugeVec, Registry};
use tokio::time::Instant;

use egressd_ipam::{allocator::Usage, range::Family};
use egressd_trace::error::TraceableError;

#[derive(Debug, Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub pool_total: IntGaugeVec,
    pub pool_free: IntGaugeVec,
    pub eip_groups: IntGaugeVec,
    pub ownership_transfers: IntCounterVec,
    pub conflict_retries: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "egressd_controller_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &[],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!(
                "egressd_controller_reconciliation_errors_total",
                "Total count of reconciliation errors",
            ),
            &["resource", "instance", "error"],
        )
        .unwrap();
        let reconciliations = IntCounterVec::new(
            opts!(
                "egressd_controller_reconciliation_total",
                "Total count of reconciliations",
            ),
            &["resource", "instance"],
        )
        .unwrap();
        let pool_total = IntGaugeVec::new(
            opts!(
                "egressd_controller_pool_addresses_total",
                "The number of addresses in the egress gateway pool"
            ),
            &["gateway", "family"],
        )
        .unwrap();
        let pool_free = IntGaugeVec::new(
            opts!(
                "egressd_controller_pool_addresses_free",
                "The number of free addresses in the egress gateway pool"
            ),
            &["gateway", "family"],
        )
        .unwrap();
        let eip_groups = IntGaugeVec::new(
            opts!(
                "egressd_controller_eip_groups",
                "The number of Eip groups of the egress gateway"
            ),
            &["gateway"],
        )
        .unwrap();
        let ownership_transfers = IntCounterVec::new(
            opts!(
                "egressd_controller_ownership_transfers_total",
                "Total count of Eip group ownership transfers"
            ),
            &["gateway"],
        )
        .unwrap();
        let conflict_retries = IntCounterVec::new(
            opts!(
                "egressd_controller_conflict_retries_total",
                "Total count of status writes retried after a conflict"
            ),
            &["resource"],
        )
        .unwrap();

        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            pool_total,
            pool_free,
            eip_groups,
            ownership_transfers,
            conflict_retries,
        }
    }
}

impl Metrics {
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.pool_total.clone()))?;
        registry.register(Box::new(self.pool_free.clone()))?;
        registry.register(Box::new(self.eip_groups.clone()))?;
        registry.register(Box::new(self.ownership_transfers.clone()))?;
        registry.register(Box::new(self.conflict_retries.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure<T: Resource<DynamicType = ()>, E: TraceableError>(
        &self,
        resource: &T,
        error: &E,
    ) {
        self.failures
            .with_label_values(&[
                &T::kind(&()),
                &resource.name_any(),
                &error.metric_label(),
            ])
            .inc()
    }

    pub fn reconciliation<T: Resource<DynamicType = ()>>(&self, resource: &T) {
        self.reconciliations
            .with_label_values(&[&T::kind(&()), &resource.name_any()])
            .inc()
    }

    pub fn measure(&self) -> ReconcileMeasurer {
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
        }
    }

    pub fn pool_usage(&self, gateway: &str, family: Family, usage: Usage) {
        let family = family.to_string();
        self.pool_total
            .with_label_values(&[gateway, &family])
            .set(usage.total as i64);
        self.pool_free
            .with_label_values(&[gateway, &family])
            .set(usage.free as i64);
    }

    pub fn eip_groups_set(&self, gateway: &str, val: i64) {
        self.eip_groups.with_label_values(&[gateway]).set(val)
    }

    pub fn ownership_transfers_inc_by(&self, gateway: &str, val: u64) {
        self.ownership_transfers
            .with_label_values(&[gateway])
            .inc_by(val)
    }

    pub fn conflict_retry(&self, resource: &str) {
        self.conflict_retries.with_label_values(&[resource]).inc()
    }

    /// Drops the per gateway series of a deleted gateway.
    pub fn forget_gateway(&self, gateway: &str) {
        for family in [Family::V4, Family::V6] {
            let family = family.to_string();
            let _ = self.pool_total.remove_label_values(&[gateway, &family]);
            let _ = self.pool_free.remove_label_values(&[gateway, &family]);
        }
        let _ = self.eip_groups.remove_label_values(&[gateway]);
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.with_label_values(&[]).observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn works_pool_usage() {
        let registry = Registry::default();
        let metrics = Metrics::default().register(&registry).unwrap();
        metrics.pool_usage("egw", Family::V4, Usage { total: 2, free: 1 });
        assert_eq!(
            metrics.pool_free.with_label_values(&["egw", "ipv4"]).get(),
            1
        );
        metrics.forget_gateway("egw");
        let families = registry.gather();
        assert!(families
            .iter()
            .filter(|f| f.get_name() == "egressd_controller_pool_addresses_free")
            .all(|f| f.get_metric().is_empty()));
    }
}
