//! Domain Ports - Core trait definitions for the disk inventory agent
//!
//! These traits define the boundaries between the location/reconcile logic
//! and the systems it observes or writes to. Adapters implement these
//! traits to provide concrete functionality.

use crate::crd::Disk as DiskResource;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Device Topology
// =============================================================================

/// A read-only view of one node in the kernel device tree.
///
/// Handles are cheap, owned snapshots of a path into the tree. The tree
/// itself is live and externally owned, so a handle should not be kept
/// past the resolution pass that produced it.
pub trait DeviceNode: Sized + Send + 'static {
    /// Full topology path of the node (e.g. `/sys/devices/.../block/sda`)
    fn syspath(&self) -> &str;

    /// Last component of the topology path
    fn sysname(&self) -> &str {
        let path = self.syspath().trim_end_matches('/');
        path.rsplit('/').next().unwrap_or(path)
    }

    /// Subsystem the node belongs to (`block`, `scsi`, `pci`, ...)
    fn subsystem(&self) -> Option<String>;

    /// Device type within the subsystem (`disk`, `scsi_host`, ...)
    fn devtype(&self) -> Option<String>;

    /// Name of the driver bound to the node, if any
    fn driver(&self) -> Option<String>;

    /// Nearest ancestor node
    fn parent(&self) -> Option<Self>;

    /// Nearest ancestor with the given subsystem and device type
    fn parent_with_subsystem_devtype(&self, subsystem: &str, devtype: &str) -> Option<Self> {
        let mut current = self.parent();
        while let Some(node) = current {
            if node.subsystem().as_deref() == Some(subsystem)
                && node.devtype().as_deref() == Some(devtype)
            {
                return Some(node);
            }
            current = node.parent();
        }
        None
    }

    /// Value of a single attribute
    fn attribute(&self, name: &str) -> Option<String>;

    /// All readable attributes of the node
    fn attributes(&self) -> BTreeMap<String, String>;

    /// Device properties (identity data reported by the kernel and udev)
    fn properties(&self) -> BTreeMap<String, String>;
}

/// Kind of a live device notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAction {
    Add,
    Remove,
    Other(String),
}

impl DeviceAction {
    /// Parse a kernel action string
    pub fn parse(action: &str) -> Self {
        match action {
            "add" => DeviceAction::Add,
            "remove" => DeviceAction::Remove,
            other => DeviceAction::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceAction::Add => write!(f, "add"),
            DeviceAction::Remove => write!(f, "remove"),
            DeviceAction::Other(action) => write!(f, "{}", action),
        }
    }
}

/// A live device notification
#[derive(Debug)]
pub struct DeviceEvent<D> {
    pub action: DeviceAction,
    pub device: D,
}

/// Read access to the kernel device tree
pub trait Topology: Send + Sync + 'static {
    type Device: DeviceNode;

    /// List every whole-disk block device currently present
    fn enumerate(&self) -> Result<Vec<Self::Device>>;

    /// Open the node at a known topology path, if it exists
    fn device_from_syspath(&self, syspath: &str) -> Option<Self::Device>;

    /// Subscribe to add/remove notifications for whole-disk block devices.
    ///
    /// The stream ends when `cancel` fires.
    fn subscribe(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<DeviceEvent<Self::Device>>>;
}

// =============================================================================
// Inventory Store
// =============================================================================

/// Persistence for inventory records
#[async_trait]
pub trait DiskStore: Send + Sync {
    /// Create a record; fails with `ResourceExists` if the name is taken
    async fn create(&self, disk: &DiskResource) -> Result<DiskResource>;

    /// Fetch a record by name; fails with `ResourceNotFound` if absent
    async fn get(&self, name: &str) -> Result<DiskResource>;

    /// Replace an existing record, carrying its resource version
    async fn replace(&self, disk: &DiskResource) -> Result<DiskResource>;
}
