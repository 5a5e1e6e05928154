//! Sync Metrics
//!
//! Prometheus counters for the reconcile loop.

use crate::error::Result;
use crate::hardware::discovery::DiskAction;
use prometheus::{IntCounterVec, Opts, Registry};

/// Counters describing what the reconciler received and did
#[derive(Clone)]
pub struct SyncMetrics {
    /// Updates received, by action
    updates: IntCounterVec,
    /// Sync results, by outcome
    syncs: IntCounterVec,
}

impl SyncMetrics {
    /// Create the counters and register them in `registry`
    pub fn new(registry: &Registry) -> Result<Self> {
        let updates = IntCounterVec::new(
            Opts::new(
                "disk_inventory_updates_total",
                "Disk updates received from the monitor",
            ),
            &["action"],
        )?;
        let syncs = IntCounterVec::new(
            Opts::new(
                "disk_inventory_syncs_total",
                "Disk sync results by outcome",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(updates.clone()))?;
        registry.register(Box::new(syncs.clone()))?;

        Ok(Self { updates, syncs })
    }

    pub fn observe_update(&self, action: DiskAction) {
        self.updates
            .with_label_values(&[&action.to_string()])
            .inc();
    }

    pub fn observe_sync(&self, outcome: &str) {
        self.syncs.with_label_values(&[outcome]).inc();
    }

    pub fn updates(&self, action: DiskAction) -> u64 {
        self.updates
            .with_label_values(&[&action.to_string()])
            .get()
    }

    pub fn syncs(&self, outcome: &str) -> u64 {
        self.syncs.with_label_values(&[outcome]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_registered() {
        let registry = Registry::new();
        let metrics = SyncMetrics::new(&registry).unwrap();

        metrics.observe_update(DiskAction::Insert);
        metrics.observe_update(DiskAction::Insert);
        metrics.observe_sync("created");

        assert_eq!(metrics.updates(DiskAction::Insert), 2);
        assert_eq!(metrics.updates(DiskAction::NoOp), 0);
        assert_eq!(metrics.syncs("created"), 1);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"disk_inventory_updates_total".to_string()));
        assert!(names.contains(&"disk_inventory_syncs_total".to_string()));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        SyncMetrics::new(&registry).unwrap();
        assert!(SyncMetrics::new(&registry).is_err());
    }
}
