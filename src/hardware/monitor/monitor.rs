//! Disk Monitor
//!
//! Merges three sources of disk observations into one stream of
//! [`DiskUpdate`]s:
//!
//! - live add/remove notifications relayed by udev
//! - a full rescan on a fixed period
//! - full rescans requested through a [`ScanTrigger`]
//!
//! Rescan requests coalesce: while one is pending, further requests are
//! absorbed by it.

use crate::config::DEFAULT_SCAN_INTERVAL;
use crate::domain::ports::{DeviceAction, DeviceEvent, DeviceNode, Topology};
use crate::hardware::discovery::{DiskAction, DiskScanner, DiskUpdate};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Buffered updates between the monitor and its consumer
pub const UPDATE_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Configuration
// =============================================================================

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Period between full rescans
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SCAN_INTERVAL,
        }
    }
}

// =============================================================================
// Scan Trigger
// =============================================================================

/// Requests a full rescan from a running monitor
#[derive(Debug, Clone)]
pub struct ScanTrigger {
    tx: mpsc::Sender<()>,
}

impl ScanTrigger {
    /// Request a rescan without blocking.
    ///
    /// Returns false once the monitor has stopped.
    pub fn trigger(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                debug!("Rescan already pending");
                true
            }
            Err(TrySendError::Closed(())) => false,
        }
    }
}

// =============================================================================
// Disk Monitor
// =============================================================================

/// Watches the device tree and reports supported disks
pub struct DiskMonitor<T: Topology> {
    scanner: DiskScanner<T>,
    config: MonitorConfig,
    trigger: ScanTrigger,
    scan_rx: mpsc::Receiver<()>,
}

impl<T: Topology> DiskMonitor<T> {
    pub fn new(scanner: DiskScanner<T>, config: MonitorConfig) -> Self {
        let (tx, scan_rx) = mpsc::channel(1);
        Self {
            scanner,
            config,
            trigger: ScanTrigger { tx },
            scan_rx,
        }
    }

    /// Handle for requesting rescans, valid before and after `start`
    pub fn trigger(&self) -> ScanTrigger {
        self.trigger.clone()
    }

    /// Start monitoring.
    ///
    /// Subscribes to live notifications, requests the initial full scan and
    /// spawns the monitor loop. The loop exits and closes the returned
    /// stream when `cancel` fires or the consumer goes away.
    pub fn start(self, cancel: CancellationToken) -> (mpsc::Receiver<DiskUpdate>, JoinHandle<()>) {
        let events = match self.scanner.topology().subscribe(cancel.child_token()) {
            Ok(events) => Some(events),
            Err(e) => {
                warn!("Live device notifications unavailable, relying on rescans: {}", e);
                None
            }
        };

        self.trigger.trigger();

        let (tx, rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let handle = tokio::spawn(self.run(events, tx, cancel));
        (rx, handle)
    }

    async fn run(
        self,
        mut events: Option<mpsc::Receiver<DeviceEvent<T::Device>>>,
        tx: mpsc::Sender<DiskUpdate>,
        cancel: CancellationToken,
    ) {
        let DiskMonitor {
            scanner,
            config,
            mut scan_rx,
            ..
        } = self;

        info!("Starting disk monitor, rescan every {:?}", config.interval);

        let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let keep_running = tokio::select! {
                _ = cancel.cancelled() => false,

                event = next_event(&mut events), if events.is_some() => match event {
                    Some(event) => handle_event(&scanner, event, &tx, &cancel).await,
                    None => {
                        warn!("Device notification stream closed, relying on rescans");
                        events = None;
                        true
                    }
                },

                Some(()) = scan_rx.recv() => {
                    debug!("Manual rescan requested");
                    full_scan(&scanner, &tx, &cancel).await
                }

                _ = ticker.tick() => {
                    debug!("Periodic rescan");
                    full_scan(&scanner, &tx, &cancel).await
                }
            };

            if !keep_running {
                break;
            }
        }

        info!("Disk monitor stopped");
    }
}

async fn next_event<D>(events: &mut Option<mpsc::Receiver<DeviceEvent<D>>>) -> Option<DeviceEvent<D>> {
    match events {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

/// Translate a live notification. Returns false when the loop must stop.
async fn handle_event<T: Topology>(
    scanner: &DiskScanner<T>,
    event: DeviceEvent<T::Device>,
    tx: &mpsc::Sender<DiskUpdate>,
    cancel: &CancellationToken,
) -> bool {
    let action = match event.action {
        DeviceAction::Add => DiskAction::Insert,
        DeviceAction::Remove => DiskAction::Remove,
        DeviceAction::Other(other) => {
            debug!(syspath = event.device.syspath(), "Ignoring '{}' event", other);
            return true;
        }
    };

    let syspath = event.device.syspath().to_string();
    let worker = scanner.clone();
    let device = event.device;
    let disk = match tokio::task::spawn_blocking(move || worker.disk_for(&device)).await {
        Ok(disk) => disk,
        Err(e) => {
            error!(syspath = %syspath, "Device classification task failed: {}", e);
            return true;
        }
    };

    match disk {
        Some(disk) => {
            debug!(syspath = %syspath, "Disk {}: {}", action, disk.dev_name());
            publish(DiskUpdate { disk, action }, tx, cancel).await
        }
        None => {
            debug!(syspath = %syspath, "Dropping {} event for unsupported device", action);
            true
        }
    }
}

/// Enumerate every disk and report each one as `NoOp`
async fn full_scan<T: Topology>(
    scanner: &DiskScanner<T>,
    tx: &mpsc::Sender<DiskUpdate>,
    cancel: &CancellationToken,
) -> bool {
    let worker = scanner.clone();
    let disks = match tokio::task::spawn_blocking(move || worker.scan()).await {
        Ok(disks) => disks,
        Err(e) => {
            error!("Disk scan task failed: {}", e);
            return true;
        }
    };

    for disk in disks {
        let update = DiskUpdate {
            disk,
            action: DiskAction::NoOp,
        };
        if !publish(update, tx, cancel).await {
            return false;
        }
    }
    true
}

/// Send an update unless the monitor is cancelled first
async fn publish(update: DiskUpdate, tx: &mpsc::Sender<DiskUpdate>, cancel: &CancellationToken) -> bool {
    tokio::select! {
        result = tx.send(update) => result.is_ok(),
        _ = cancel.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::classification::DeviceClassifier;
    use crate::hardware::topology::MockTopology;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn monitor(topology: &MockTopology, interval: Duration) -> DiskMonitor<MockTopology> {
        let scanner = DiskScanner::new(Arc::new(topology.clone()), Arc::new(DeviceClassifier::new()));
        DiskMonitor::new(scanner, MonitorConfig { interval })
    }

    async fn next(rx: &mut mpsc::Receiver<DiskUpdate>) -> DiskUpdate {
        timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for update")
            .expect("update stream closed")
    }

    #[tokio::test]
    async fn test_initial_scan_reports_noop() {
        let topology = MockTopology::new();
        topology.add_ahci_disk("sda", 0, "0x1");
        topology.add_megaraid_disk("sdb", "1:2:3:4", "0x2");
        topology.add_disk_with_driver("sdc", "unknown-raid", "0x3");

        let cancel = CancellationToken::new();
        let (mut rx, handle) = monitor(&topology, Duration::from_secs(3600)).start(cancel.clone());

        let mut seen = vec![next(&mut rx).await, next(&mut rx).await];
        seen.sort_by(|a, b| a.disk.wwn().cmp(b.disk.wwn()));
        assert!(seen.iter().all(|u| u.action == DiskAction::NoOp));
        assert_eq!(seen[0].disk.wwn(), "0x1");
        assert_eq!(seen[1].disk.wwn(), "0x2");

        cancel.cancel();
        timeout(WAIT, handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_live_events() {
        let topology = MockTopology::new();
        topology.add_ahci_disk("sda", 0, "0x1");

        let cancel = CancellationToken::new();
        let (mut rx, _handle) = monitor(&topology, Duration::from_secs(3600)).start(cancel.clone());
        assert_eq!(next(&mut rx).await.action, DiskAction::NoOp);

        let unsupported = topology.add_disk_with_driver("sdx", "unknown-raid", "0x9");
        let gone = topology.add_ahci_disk("sdy", 3, "0x8");
        topology.remove("/sys/devices/pci0000:00/0000:00:1f.2/ata4");
        let added = topology.add_megaraid_disk("sdb", "0:2:7:0", "0x2");

        assert!(topology.emit(DeviceAction::Add, &unsupported).await);
        assert!(topology.emit(DeviceAction::Remove, &gone).await);
        assert!(topology.emit(DeviceAction::Other("change".into()), &added).await);
        assert!(topology.emit(DeviceAction::Add, &added).await);

        let update = next(&mut rx).await;
        assert_eq!(update.action, DiskAction::Insert);
        assert_eq!(update.disk.wwn(), "0x2");
        assert_eq!(update.disk.slot(), "7");

        assert!(topology.emit(DeviceAction::Remove, &added).await);
        let update = next(&mut rx).await;
        assert_eq!(update.action, DiskAction::Remove);
        assert_eq!(update.disk.wwn(), "0x2");

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_pending_triggers_coalesce() {
        let topology = MockTopology::new();
        topology.add_ahci_disk("sda", 0, "0x1");

        let monitor = monitor(&topology, Duration::from_secs(3600));
        let trigger = monitor.trigger();
        assert!(trigger.trigger());
        assert!(trigger.trigger());
        assert!(trigger.trigger());

        let cancel = CancellationToken::new();
        let (mut rx, handle) = monitor.start(cancel.clone());

        assert_eq!(next(&mut rx).await.action, DiskAction::NoOp);
        assert_matches!(timeout(Duration::from_millis(200), rx.recv()).await, Err(_));

        assert!(trigger.trigger());
        assert_eq!(next(&mut rx).await.disk.wwn(), "0x1");

        cancel.cancel();
        timeout(WAIT, handle).await.unwrap().unwrap();
        assert!(!trigger.trigger());
    }

    #[tokio::test]
    async fn test_periodic_rescan() {
        let topology = MockTopology::new();
        topology.add_ahci_disk("sda", 0, "0x1");

        let cancel = CancellationToken::new();
        let (mut rx, _handle) = monitor(&topology, Duration::from_millis(20)).start(cancel.clone());

        for _ in 0..3 {
            assert_eq!(next(&mut rx).await.action, DiskAction::NoOp);
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_cancellation_closes_stream() {
        let topology = MockTopology::new();
        let cancel = CancellationToken::new();
        let (mut rx, handle) = monitor(&topology, Duration::from_secs(3600)).start(cancel.clone());

        cancel.cancel();
        timeout(WAIT, handle).await.unwrap().unwrap();
        assert_matches!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_cancel_drops_blocked_send() {
        let topology = MockTopology::new();
        let total = UPDATE_CHANNEL_CAPACITY as u32 + 6;
        for host in 0..total {
            topology.add_ahci_disk(&format!("sd{}", host), host, &format!("0x{:x}", host + 1));
        }

        let cancel = CancellationToken::new();
        let (mut rx, handle) = monitor(&topology, Duration::from_secs(3600)).start(cancel.clone());

        // nobody reads, so the initial scan stalls on a full channel
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        timeout(WAIT, handle).await.unwrap().unwrap();

        let mut delivered = 0;
        while rx.recv().await.is_some() {
            delivered += 1;
        }
        assert!(delivered <= UPDATE_CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn test_survives_failures() {
        let topology = MockTopology::new();
        topology.add_ahci_disk("sda", 0, "0x1");
        topology.set_subscription_failure(true);
        topology.set_enumeration_failure(true);

        let monitor = monitor(&topology, Duration::from_secs(3600));
        let trigger = monitor.trigger();
        let cancel = CancellationToken::new();
        let (mut rx, _handle) = monitor.start(cancel.clone());
        assert!(!topology.has_subscriber());

        // the failed initial scan yields nothing; a later rescan recovers
        assert_matches!(timeout(Duration::from_millis(200), rx.recv()).await, Err(_));
        topology.set_enumeration_failure(false);
        assert!(trigger.trigger());
        assert_eq!(next(&mut rx).await.disk.wwn(), "0x1");

        cancel.cancel();
    }
}
