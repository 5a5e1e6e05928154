//! In-memory topology for tests and benchmarks.
//!
//! Nodes are keyed by sysfs-style paths and parents are found the way sysfs
//! does it: strip path components until a known node is reached.

use crate::domain::ports::{DeviceAction, DeviceEvent, DeviceNode, Topology};
use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Sector count used for fixture disks (4 TB)
pub const FIXTURE_SECTORS: u64 = 7_814_037_168;

/// Data held for one synthetic node
#[derive(Debug, Clone, Default)]
pub struct MockNode {
    pub subsystem: Option<String>,
    pub devtype: Option<String>,
    pub driver: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub properties: BTreeMap<String, String>,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subsystem(mut self, subsystem: &str, devtype: &str) -> Self {
        self.subsystem = Some(subsystem.to_string());
        self.devtype = Some(devtype.to_string());
        self
    }

    pub fn driver(mut self, driver: &str) -> Self {
        self.driver = Some(driver.to_string());
        self
    }

    pub fn attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn property(mut self, name: &str, value: &str) -> Self {
        self.properties.insert(name.to_string(), value.to_string());
        self
    }
}

#[derive(Default)]
struct MockTree {
    nodes: RwLock<BTreeMap<String, MockNode>>,
    subscriber: Mutex<Option<mpsc::Sender<DeviceEvent<MockDevice>>>>,
    fail_enumeration: AtomicBool,
    fail_subscription: AtomicBool,
}

/// A synthetic device tree
#[derive(Clone, Default)]
pub struct MockTopology {
    tree: Arc<MockTree>,
}

/// Handle to a node of a [`MockTopology`]
#[derive(Clone)]
pub struct MockDevice {
    tree: Arc<MockTree>,
    syspath: String,
}

impl std::fmt::Debug for MockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDevice")
            .field("syspath", &self.syspath)
            .finish()
    }
}

impl MockDevice {
    fn node(&self) -> Option<MockNode> {
        self.tree.nodes.read().get(&self.syspath).cloned()
    }
}

impl MockTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node
    pub fn insert(&self, syspath: &str, node: MockNode) {
        self.tree.nodes.write().insert(syspath.to_string(), node);
    }

    /// Remove a node and everything below it
    pub fn remove(&self, syspath: &str) {
        let prefix = format!("{}/", syspath);
        self.tree
            .nodes
            .write()
            .retain(|path, _| path != syspath && !path.starts_with(&prefix));
    }

    /// Make the next enumerations fail
    pub fn set_enumeration_failure(&self, fail: bool) {
        self.tree.fail_enumeration.store(fail, Ordering::SeqCst);
    }

    /// Make subscriptions fail
    pub fn set_subscription_failure(&self, fail: bool) {
        self.tree.fail_subscription.store(fail, Ordering::SeqCst);
    }

    /// Handle for a path, whether or not the node still exists
    pub fn handle(&self, syspath: &str) -> MockDevice {
        MockDevice {
            tree: self.tree.clone(),
            syspath: syspath.to_string(),
        }
    }

    /// Deliver a live event to the current subscriber.
    ///
    /// Returns false when nobody is listening.
    pub async fn emit(&self, action: DeviceAction, syspath: &str) -> bool {
        let sender = self.tree.subscriber.lock().clone();
        match sender {
            Some(sender) => sender
                .send(DeviceEvent {
                    action,
                    device: self.handle(syspath),
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Whether a subscriber is attached
    pub fn has_subscriber(&self) -> bool {
        self.tree.subscriber.lock().is_some()
    }

    // =========================================================================
    // Fixtures
    // =========================================================================

    fn insert_disk(&self, syspath: &str, name: &str, wwn: &str) {
        let mut disk = MockNode::new()
            .subsystem("block", "disk")
            .attribute("size", &FIXTURE_SECTORS.to_string())
            .attribute("ro", "0")
            .property("DEVNAME", &format!("/dev/{}", name))
            .property("DEVTYPE", "disk")
            .property("ID_MODEL", "ST4000NM0023")
            .property("ID_SERIAL_SHORT", &format!("Z1Z0{}", name.to_uppercase()));
        if !wwn.is_empty() {
            disk = disk.property("ID_WWN_WITH_EXTENSION", wwn);
        }
        self.insert(syspath, disk);
    }

    /// Add a disk behind an AHCI controller on SCSI host `host`.
    ///
    /// Returns the disk's syspath.
    pub fn add_ahci_disk(&self, name: &str, host: u32, wwn: &str) -> String {
        let pci = "/sys/devices/pci0000:00/0000:00:1f.2";
        let host_path = format!("{}/ata{}/host{}", pci, host + 1, host);
        let target = format!("{}/target{}:0:0", host_path, host);
        let scsi_dev = format!("{}/{}:0:0:0", target, host);
        let disk = format!("{}/block/{}", scsi_dev, name);

        self.insert(pci, MockNode::new().subsystem("pci", "").driver("ahci"));
        self.insert(&host_path, MockNode::new().subsystem("scsi", "scsi_host"));
        self.insert(&target, MockNode::new().subsystem("scsi", "scsi_target"));
        self.insert(&scsi_dev, MockNode::new().subsystem("scsi", "scsi_device").driver("sd"));
        self.insert_disk(&disk, name, wwn);
        disk
    }

    /// Add a disk behind a MegaRAID controller at `address`
    /// (`host:channel:target:lun`).
    pub fn add_megaraid_disk(&self, name: &str, address: &str, wwn: &str) -> String {
        let pci = "/sys/devices/pci0000:00/0000:00:02.0/0000:03:00.0";
        let host = address.split(':').next().unwrap_or("0");
        let host_path = format!("{}/host{}", pci, host);
        let target_id = address.rsplit_once(':').map(|(t, _)| t).unwrap_or(address);
        let target = format!("{}/target{}", host_path, target_id);
        let scsi_dev = format!("{}/{}", target, address);
        let disk = format!("{}/block/{}", scsi_dev, name);

        self.insert(pci, MockNode::new().subsystem("pci", "").driver("megaraid_sas"));
        self.insert(&host_path, MockNode::new().subsystem("scsi", "scsi_host"));
        self.insert(&target, MockNode::new().subsystem("scsi", "scsi_target"));
        self.insert(&scsi_dev, MockNode::new().subsystem("scsi", "scsi_device").driver("sd"));
        self.insert_disk(&disk, name, wwn);
        disk
    }

    /// Add a disk behind an mpt3sas HBA, optionally through an expander.
    pub fn add_sas_disk(&self, name: &str, wwn: &str, slot: SasSlot<'_>) -> String {
        let pci = "/sys/devices/pci0000:00/0000:00:03.0/0000:05:00.0";
        let host_path = format!("{}/host0", pci);
        let port = format!("{}/port-0:0", host_path);

        self.insert(pci, MockNode::new().subsystem("pci", "").driver("mpt3sas"));
        self.insert(&host_path, MockNode::new().subsystem("scsi", "scsi_host"));
        self.insert(&port, MockNode::new());

        let parent = match slot.expander {
            Some(product_id) => {
                let expander = format!("{}/expander-0:0", port);
                self.insert(&expander, MockNode::new());
                self.insert(
                    &format!("{}/sas_expander/expander-0:0", expander),
                    MockNode::new()
                        .subsystem("sas_expander", "")
                        .attribute("product_id", product_id)
                        .attribute("vendor_id", "LSI     "),
                );
                let expander_port = format!("{}/port-0:0:{}", expander, slot.phy);
                self.insert(&expander_port, MockNode::new());
                expander_port
            }
            None => port,
        };

        let end_device_name = format!("end_device-0:0:{}", slot.phy);
        let end_device = format!("{}/{}", parent, end_device_name);
        self.insert(&end_device, MockNode::new());
        self.insert(
            &format!("{}/sas_device/{}", end_device, end_device_name),
            MockNode::new()
                .subsystem("sas_device", "")
                .attribute("enclosure_identifier", slot.enclosure)
                .attribute("bay_identifier", slot.bay),
        );

        let target = format!("{}/target0:0:{}", end_device, slot.phy);
        let scsi_dev = format!("{}/0:0:{}:0", target, slot.phy);
        let disk = format!("{}/block/{}", scsi_dev, name);
        self.insert(&target, MockNode::new().subsystem("scsi", "scsi_target"));
        self.insert(&scsi_dev, MockNode::new().subsystem("scsi", "scsi_device").driver("sd"));
        self.insert_disk(&disk, name, wwn);
        disk
    }

    /// Add a disk with a controller driver nothing resolves
    pub fn add_disk_with_driver(&self, name: &str, driver: &str, wwn: &str) -> String {
        let pci = format!("/sys/devices/pci0000:00/0000:00:04.0/{}", driver);
        let host_path = format!("{}/host9", pci);
        let scsi_dev = format!("{}/target9:0:0/9:0:0:0", host_path);
        let disk = format!("{}/block/{}", scsi_dev, name);

        self.insert(&pci, MockNode::new().subsystem("pci", "").driver(driver));
        self.insert(&host_path, MockNode::new().subsystem("scsi", "scsi_host"));
        self.insert(&scsi_dev, MockNode::new().subsystem("scsi", "scsi_device"));
        self.insert_disk(&disk, name, wwn);
        disk
    }

    /// Add a virtual disk with no SCSI ancestry
    pub fn add_virtual_disk(&self, name: &str) -> String {
        let disk = format!("/sys/devices/virtual/block/{}", name);
        self.insert_disk(&disk, name, "");
        disk
    }
}

/// Placement of a fixture SAS disk
#[derive(Debug, Clone, Copy)]
pub struct SasSlot<'a> {
    /// Expander product id, or `None` for a directly attached disk
    pub expander: Option<&'a str>,
    pub enclosure: &'a str,
    pub bay: &'a str,
    /// Phy number, distinct per disk
    pub phy: u32,
}

impl Topology for MockTopology {
    type Device = MockDevice;

    fn enumerate(&self) -> Result<Vec<MockDevice>> {
        if self.tree.fail_enumeration.load(Ordering::SeqCst) {
            return Err(Error::HardwareDiscovery("mock enumeration failure".into()));
        }

        let nodes = self.tree.nodes.read();
        Ok(nodes
            .iter()
            .filter(|(_, node)| {
                node.subsystem.as_deref() == Some("block") && node.devtype.as_deref() == Some("disk")
            })
            .map(|(path, _)| self.handle(path))
            .collect())
    }

    fn device_from_syspath(&self, syspath: &str) -> Option<MockDevice> {
        if self.tree.nodes.read().contains_key(syspath) {
            Some(self.handle(syspath))
        } else {
            None
        }
    }

    fn subscribe(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<DeviceEvent<MockDevice>>> {
        if self.tree.fail_subscription.load(Ordering::SeqCst) {
            return Err(Error::Subscription("mock subscription failure".into()));
        }

        let (tx, rx) = mpsc::channel(16);
        *self.tree.subscriber.lock() = Some(tx);

        let tree = self.tree.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            tree.subscriber.lock().take();
        });

        Ok(rx)
    }
}

impl DeviceNode for MockDevice {
    fn syspath(&self) -> &str {
        &self.syspath
    }

    fn subsystem(&self) -> Option<String> {
        self.node()?.subsystem.filter(|s| !s.is_empty())
    }

    fn devtype(&self) -> Option<String> {
        self.node()?.devtype.filter(|s| !s.is_empty())
    }

    fn driver(&self) -> Option<String> {
        self.node()?.driver
    }

    fn parent(&self) -> Option<Self> {
        let nodes = self.tree.nodes.read();
        let mut path = self.syspath.as_str();
        while let Some((parent, _)) = path.rsplit_once('/') {
            if parent.is_empty() {
                return None;
            }
            if nodes.contains_key(parent) {
                return Some(MockDevice {
                    tree: self.tree.clone(),
                    syspath: parent.to_string(),
                });
            }
            path = parent;
        }
        None
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.node()?.attributes.get(name).cloned()
    }

    fn attributes(&self) -> BTreeMap<String, String> {
        self.node().map(|n| n.attributes).unwrap_or_default()
    }

    fn properties(&self) -> BTreeMap<String, String> {
        self.node().map(|n| n.properties).unwrap_or_default()
    }
}
