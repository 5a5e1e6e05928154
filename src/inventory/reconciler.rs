//! Reconciler
//!
//! Keeps one inventory record per disk in step with what the monitor
//! observes. Every update is an idempotent upsert:
//!
//! 1. build a candidate record from the disk
//! 2. try to create it
//! 3. if it already exists, fetch the stored record and compare the
//!    observed fields; when they differ, carry the stored metadata, status
//!    and enablement onto the candidate and replace the stored record
//!
//! Updates are handled one at a time, in arrival order.

use crate::crd::{Disk as DiskResource, DiskStatus};
use crate::domain::ports::DiskStore;
use crate::error::{Error, Result};
use crate::hardware::discovery::{Disk, DiskUpdate};
use crate::inventory::SyncMetrics;
use kube::ResourceExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Reconciler configuration
#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    /// Host the disks are attached to
    pub node_name: String,
    /// Mark newly created records as enabled
    pub enable_disks: bool,
}

/// Result of syncing one disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No record existed; one was created
    Created,
    /// The stored record already matched
    Unchanged,
    /// The stored record was brought up to date
    Updated,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Created => "created",
            SyncOutcome::Unchanged => "unchanged",
            SyncOutcome::Updated => "updated",
        }
    }
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Upserts inventory records for observed disks
pub struct Reconciler<S: DiskStore> {
    store: Arc<S>,
    config: ReconcilerConfig,
    metrics: Option<SyncMetrics>,
}

impl<S: DiskStore> Reconciler<S> {
    pub fn new(store: Arc<S>, config: ReconcilerConfig) -> Self {
        Self {
            store,
            config,
            metrics: None,
        }
    }

    /// Count received updates and sync outcomes
    pub fn with_metrics(mut self, metrics: SyncMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Build the candidate record for a disk.
    ///
    /// Fails with `MissingIdentity` when the disk has no WWN.
    pub fn build_resource(&self, disk: &Disk) -> Result<DiskResource> {
        let name = disk.name().ok_or_else(|| Error::MissingIdentity {
            device: disk.dev_name().to_string(),
        })?;

        let mut resource = DiskResource::init(&name);
        resource.spec.enabled = self.config.enable_disks;
        resource.spec.info.update_info(
            disk.wwn(),
            disk.model(),
            disk.serial_number(),
            &disk.capacity_bytes().to_string(),
        );
        resource.spec.info.udev_attributes = disk.attributes().clone();
        resource.spec.info.udev_properties = disk.properties().clone();
        resource.spec.location.update_location(
            &self.config.node_name,
            disk.backplane(),
            disk.slot(),
            disk.driver(),
        );
        resource.status = Some(DiskStatus::discovered());
        resource.update_labels();

        Ok(resource)
    }

    /// Create or converge the record for one disk
    #[instrument(skip(self, disk), fields(dev = %disk.dev_name()))]
    pub async fn sync_disk(&self, disk: &Disk) -> Result<SyncOutcome> {
        let candidate = self.build_resource(disk)?;
        let name = candidate.name_any();

        match self.store.create(&candidate).await {
            Ok(_) => {
                info!(
                    "Created Disk {} ({} at {}/{})",
                    name,
                    disk.dev_name(),
                    disk.backplane(),
                    disk.slot()
                );
                return Ok(SyncOutcome::Created);
            }
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(sync_failed(&name, "create", e)),
        }

        let existing = self
            .store
            .get(&name)
            .await
            .map_err(|e| sync_failed(&name, "get", e))?;

        if candidate.observed_eq(&existing) {
            debug!("Disk {} unchanged", name);
            return Ok(SyncOutcome::Unchanged);
        }

        let merged = merge_into_existing(candidate, existing);
        self.store
            .replace(&merged)
            .await
            .map_err(|e| sync_failed(&name, "update", e))?;

        info!(
            "Updated Disk {} ({} at {}/{})",
            name,
            disk.dev_name(),
            disk.backplane(),
            disk.slot()
        );
        Ok(SyncOutcome::Updated)
    }

    /// Handle one update from the monitor; failures are logged
    pub async fn handle_update(&self, update: &DiskUpdate) -> Option<SyncOutcome> {
        debug!("Disk {}: {}", update.action, update.disk.dev_name());
        if let Some(metrics) = &self.metrics {
            metrics.observe_update(update.action);
        }

        let result = self.sync_disk(&update.disk).await;
        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(Error::MissingIdentity { .. }) => "skipped",
            Err(_) => "failed",
        };
        if let Some(metrics) = &self.metrics {
            metrics.observe_sync(outcome);
        }

        match result {
            Ok(outcome) => Some(outcome),
            Err(e @ Error::MissingIdentity { .. }) => {
                warn!("{}", e);
                None
            }
            // a record deleted between get and replace is recreated on the next rescan
            Err(e) if e.is_transient() || e.is_not_found() => {
                warn!("{}", e);
                None
            }
            Err(e) => {
                error!("{}", e);
                None
            }
        }
    }

    /// Consume updates until the stream closes or `cancel` fires
    pub async fn run(&self, mut updates: mpsc::Receiver<DiskUpdate>, cancel: CancellationToken) {
        info!("Reconciling disks for node {}", self.config.node_name);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Reconciler shutting down");
                    break;
                }
                update = updates.recv() => match update {
                    Some(update) => {
                        self.handle_update(&update).await;
                    }
                    None => {
                        info!("Disk update stream closed");
                        break;
                    }
                }
            }
        }
    }
}

/// Carry store-managed state from `existing` onto `candidate`
fn merge_into_existing(mut candidate: DiskResource, existing: DiskResource) -> DiskResource {
    candidate.metadata = existing.metadata;
    candidate.status = existing.status;
    candidate.spec.enabled = existing.spec.enabled;
    candidate.update_labels();
    candidate
}

fn sync_failed(name: &str, operation: &str, err: Error) -> Error {
    match err {
        Error::Io(_) | Error::Kube(_) => Error::SyncFailed {
            name: name.to_string(),
            reason: format!("{} failed: {}", operation, err),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{PreparePhase, LABEL_PREFIX};
    use crate::hardware::discovery::{DiskAction, PROP_DEVNAME, PROP_MODEL, PROP_SERIAL, PROP_WWN};
    use crate::hardware::location::Location;
    use crate::inventory::MemoryDiskStore;
    use assert_matches::assert_matches;
    use prometheus::Registry;
    use std::collections::BTreeMap;

    fn disk(wwn: &str, location: Location) -> Disk {
        let mut properties = BTreeMap::new();
        properties.insert(PROP_DEVNAME.to_string(), "/dev/sdb".to_string());
        properties.insert(PROP_MODEL.to_string(), "ST4000NM0023".to_string());
        properties.insert(PROP_SERIAL.to_string(), "Z1Z0ABCD".to_string());
        if !wwn.is_empty() {
            properties.insert(PROP_WWN.to_string(), wwn.to_string());
        }
        let mut attributes = BTreeMap::new();
        attributes.insert("size".to_string(), "7814037168".to_string());
        Disk::new("mpt3sas", location, properties, attributes)
    }

    fn reconciler(store: &Arc<MemoryDiskStore>) -> Reconciler<MemoryDiskStore> {
        Reconciler::new(
            store.clone(),
            ReconcilerConfig {
                node_name: "node-a".to_string(),
                enable_disks: false,
            },
        )
    }

    #[test]
    fn test_build_resource() {
        let store = Arc::new(MemoryDiskStore::new());
        let resource = reconciler(&store)
            .build_resource(&disk("0x5000CCA2", Location::new("Front", "7")))
            .unwrap();

        assert_eq!(resource.name_any(), "wwn-0x5000cca2");
        assert!(!resource.spec.enabled);
        assert_eq!(resource.spec.info.wwn, "0x5000CCA2");
        assert_eq!(resource.spec.info.capacity, "4000787030016");
        assert_eq!(resource.spec.location.node, "node-a");
        assert_eq!(resource.spec.location.backplane, "Front");
        assert_eq!(resource.spec.location.slot, "7");
        assert_eq!(resource.spec.location.driver, "mpt3sas");
        assert_eq!(
            resource.status.as_ref().map(|s| s.prepare_phase),
            Some(PreparePhase::Discovered)
        );
        assert_eq!(
            resource.labels().get(&format!("{}/slot", LABEL_PREFIX)).map(String::as_str),
            Some("7")
        );
    }

    #[test]
    fn test_enable_disks() {
        let store = Arc::new(MemoryDiskStore::new());
        let reconciler = Reconciler::new(
            store,
            ReconcilerConfig {
                node_name: "node-a".to_string(),
                enable_disks: true,
            },
        );
        let resource = reconciler
            .build_resource(&disk("0x1", Location::default()))
            .unwrap();
        assert!(resource.spec.enabled);
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let store = Arc::new(MemoryDiskStore::new());
        let reconciler = reconciler(&store);
        let disk = disk("0x5000cca2", Location::new("Front", "7"));

        assert_eq!(reconciler.sync_disk(&disk).await.unwrap(), SyncOutcome::Created);
        assert_eq!(reconciler.sync_disk(&disk).await.unwrap(), SyncOutcome::Unchanged);

        assert_eq!(store.len(), 1);
        assert_eq!(store.replaces(), 0);
        assert_eq!(store.creates(), 2);
    }

    #[tokio::test]
    async fn test_sync_converges_preserving_operator_state() {
        let store = Arc::new(MemoryDiskStore::new());
        let reconciler = reconciler(&store);

        let mut existing = reconciler
            .build_resource(&disk("0x5000cca2", Location::new("Front", "7")))
            .unwrap();
        existing.spec.enabled = true;
        existing.status = Some(DiskStatus {
            prepare_phase: PreparePhase::Prepared,
            last_discovered_time: None,
        });
        existing
            .labels_mut()
            .insert("team".to_string(), "storage".to_string());
        store.insert(existing);

        let moved = disk("0x5000cca2", Location::new("Rear", "2"));
        assert_eq!(reconciler.sync_disk(&moved).await.unwrap(), SyncOutcome::Updated);
        assert_eq!(store.replaces(), 1);

        let sent = store.last_replaced().unwrap();
        assert!(sent.spec.enabled);
        assert_eq!(
            sent.status.as_ref().map(|s| s.prepare_phase),
            Some(PreparePhase::Prepared)
        );
        assert_eq!(sent.metadata.resource_version.as_deref(), Some("1"));
        assert_eq!(sent.labels().get("team").map(String::as_str), Some("storage"));
        assert_eq!(
            sent.labels().get(&format!("{}/backplane", LABEL_PREFIX)).map(String::as_str),
            Some("Rear")
        );

        let stored = store.record("wwn-0x5000cca2").unwrap();
        assert_eq!(stored.spec.location.slot, "2");
        assert_eq!(reconciler.sync_disk(&moved).await.unwrap(), SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_missing_identity_never_reaches_store() {
        let store = Arc::new(MemoryDiskStore::new());
        let reconciler = reconciler(&store);

        assert_matches!(
            reconciler.sync_disk(&disk("", Location::new("SATA", "1"))).await,
            Err(Error::MissingIdentity { .. })
        );
        assert_eq!(store.creates(), 0);
        assert_eq!(store.replaces(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_surfaced() {
        let store = Arc::new(MemoryDiskStore::new());
        store.set_failing(true);
        let reconciler = reconciler(&store);

        let err = reconciler
            .sync_disk(&disk("0x1", Location::default()))
            .await
            .unwrap_err();
        assert_matches!(&err, Error::SyncFailed { name, .. } if name == "wwn-0x1");
        assert!(err.is_transient());
    }

    /// Reports every record as existing, then loses it before the fetch
    struct DeletedConcurrently;

    #[async_trait::async_trait]
    impl DiskStore for DeletedConcurrently {
        async fn create(&self, disk: &DiskResource) -> Result<DiskResource> {
            Err(Error::ResourceExists {
                kind: "Disk".into(),
                name: disk.name_any(),
            })
        }

        async fn get(&self, name: &str) -> Result<DiskResource> {
            Err(Error::ResourceNotFound {
                kind: "Disk".into(),
                name: name.to_string(),
            })
        }

        async fn replace(&self, disk: &DiskResource) -> Result<DiskResource> {
            self.get(&disk.name_any()).await
        }
    }

    #[tokio::test]
    async fn test_record_deleted_mid_sync() {
        let registry = Registry::new();
        let metrics = SyncMetrics::new(&registry).unwrap();
        let reconciler = Reconciler::new(Arc::new(DeletedConcurrently), ReconcilerConfig::default())
            .with_metrics(metrics.clone());
        let disk = disk("0x1", Location::default());

        let err = reconciler.sync_disk(&disk).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_transient());

        let update = DiskUpdate {
            disk,
            action: DiskAction::NoOp,
        };
        assert_eq!(reconciler.handle_update(&update).await, None);
        assert_eq!(metrics.syncs("failed"), 1);
    }

    #[tokio::test]
    async fn test_run_processes_in_order_and_counts() {
        let store = Arc::new(MemoryDiskStore::new());
        let registry = Registry::new();
        let metrics = SyncMetrics::new(&registry).unwrap();
        let reconciler = reconciler(&store).with_metrics(metrics.clone());

        let (tx, rx) = mpsc::channel(8);
        let first = disk("0x1", Location::new("SATA", "1"));
        let moved = disk("0x1", Location::new("SATA", "2"));
        for (disk, action) in [
            (first.clone(), DiskAction::NoOp),
            (first, DiskAction::NoOp),
            (moved, DiskAction::Insert),
            (disk("", Location::default()), DiskAction::Insert),
        ] {
            tx.send(DiskUpdate { disk, action }).await.unwrap();
        }
        drop(tx);

        reconciler.run(rx, CancellationToken::new()).await;

        assert_eq!(store.record("wwn-0x1").unwrap().spec.location.slot, "2");
        assert_eq!(metrics.updates(DiskAction::NoOp), 2);
        assert_eq!(metrics.updates(DiskAction::Insert), 2);
        assert_eq!(metrics.syncs("created"), 1);
        assert_eq!(metrics.syncs("unchanged"), 1);
        assert_eq!(metrics.syncs("updated"), 1);
        assert_eq!(metrics.syncs("skipped"), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let store = Arc::new(MemoryDiskStore::new());
        let reconciler = reconciler(&store);
        let (_tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio_test::assert_ok!(
            tokio::time::timeout(std::time::Duration::from_secs(5), reconciler.run(rx, cancel)).await
        );
    }
}
