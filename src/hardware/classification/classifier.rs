//! Device Classifier
//!
//! Decides which controller driver owns a block device and whether the
//! agent inventories it, then hands supported devices to the matching
//! location resolver.

use crate::domain::ports::{DeviceNode, Topology};
use crate::hardware::discovery::Disk;
use crate::hardware::location::{LocationResolver, ResolverRegistry};
use tracing::{trace, warn};

// =============================================================================
// Classification Result
// =============================================================================

/// A device the agent inventories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceClassification {
    /// Controller driver that owns the device
    pub driver: String,
    /// Resolver registered for the driver
    pub resolver: LocationResolver,
}

// =============================================================================
// Device Classifier
// =============================================================================

/// Classifies block devices by controller driver
#[derive(Debug, Clone)]
pub struct DeviceClassifier {
    registry: ResolverRegistry,
}

impl Default for DeviceClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceClassifier {
    /// Create a classifier for the built-in drivers
    pub fn new() -> Self {
        Self::with_registry(ResolverRegistry::builtin())
    }

    /// Create a classifier over a custom registry
    pub fn with_registry(registry: ResolverRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ResolverRegistry {
        &self.registry
    }

    /// Classify a device, or `None` if its driver is unknown or unsupported
    pub fn classify<D: DeviceNode>(&self, device: &D) -> Option<DeviceClassification> {
        let driver = find_scsi_driver(device).unwrap_or_default();

        match self.registry.get(&driver) {
            Some(resolver) => Some(DeviceClassification { driver, resolver }),
            None => {
                trace!(syspath = device.syspath(), driver = %driver, "Ignoring unsupported device");
                None
            }
        }
    }

    /// Classify, locate and record a device.
    ///
    /// Unsupported devices yield `None`. A device whose location cannot be
    /// resolved still yields a disk, with an empty location.
    pub fn disk_from_device<T: Topology>(&self, topology: &T, device: &T::Device) -> Option<Disk> {
        let classification = self.classify(device)?;

        let location = classification.resolver.resolve(topology, device);
        if let Err(e) = &location {
            warn!(
                syspath = device.syspath(),
                driver = %classification.driver,
                "{}", e
            );
        }

        Some(Disk::from_device(&classification.driver, location, device))
    }
}

/// Find the driver of the controller above the device's SCSI host.
///
/// Walks up from the host's parent until some ancestor has a driver bound.
pub fn find_scsi_driver<D: DeviceNode>(device: &D) -> Option<String> {
    let host = device.parent_with_subsystem_devtype("scsi", "scsi_host")?;

    let mut current = host.parent();
    while let Some(node) = current {
        if let Some(driver) = node.driver().filter(|d| !d.is_empty()) {
            return Some(driver);
        }
        current = node.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::location::Location;
    use crate::hardware::topology::{MockNode, MockTopology, SasSlot};

    #[test]
    fn test_find_scsi_driver() {
        let topology = MockTopology::new();
        let ahci = topology.add_ahci_disk("sda", 0, "0x1");
        let mega = topology.add_megaraid_disk("sdb", "0:2:5:0", "0x2");
        let virt = topology.add_virtual_disk("vda");

        assert_eq!(
            find_scsi_driver(&topology.device_from_syspath(&ahci).unwrap()).as_deref(),
            Some("ahci")
        );
        assert_eq!(
            find_scsi_driver(&topology.device_from_syspath(&mega).unwrap()).as_deref(),
            Some("megaraid_sas")
        );
        assert_eq!(find_scsi_driver(&topology.device_from_syspath(&virt).unwrap()), None);
    }

    #[test]
    fn test_driver_on_scsi_device_is_ignored() {
        // the sd driver is bound below the host; only the chain above counts
        let topology = MockTopology::new();
        topology.insert("/sys/devices/platform/host3", MockNode::new().subsystem("scsi", "scsi_host"));
        topology.insert(
            "/sys/devices/platform/host3/target3:0:0/3:0:0:0",
            MockNode::new().subsystem("scsi", "scsi_device").driver("sd"),
        );
        topology.insert(
            "/sys/devices/platform/host3/target3:0:0/3:0:0:0/block/sdd",
            MockNode::new().subsystem("block", "disk"),
        );
        let disk = topology
            .device_from_syspath("/sys/devices/platform/host3/target3:0:0/3:0:0:0/block/sdd")
            .unwrap();
        assert_eq!(find_scsi_driver(&disk), None);
    }

    #[test]
    fn test_classify_unsupported() {
        let classifier = DeviceClassifier::new();
        let topology = MockTopology::new();
        let path = topology.add_disk_with_driver("sde", "unknown-raid", "0x5");
        let disk = topology.device_from_syspath(&path).unwrap();

        assert!(classifier.classify(&disk).is_none());
        assert!(classifier.disk_from_device(&topology, &disk).is_none());
    }

    #[test]
    fn test_classify_supported() {
        let classifier = DeviceClassifier::new();
        let topology = MockTopology::new();
        let path = topology.add_sas_disk(
            "sdf",
            "0x5000cca2",
            SasSlot {
                expander: Some("SAS2X28"),
                enclosure: "500304801",
                bay: "2",
                phy: 2,
            },
        );
        let device = topology.device_from_syspath(&path).unwrap();

        let classification = classifier.classify(&device).unwrap();
        assert_eq!(classification.driver, "mpt3sas");
        assert_eq!(classification.resolver, LocationResolver::ExpanderTopology);

        let disk = classifier.disk_from_device(&topology, &device).unwrap();
        assert_eq!(disk.location(), &Location::new("Rear", "2"));
    }

    #[test]
    fn test_custom_registry() {
        let registry = ResolverRegistry::default().with("hpsa", LocationResolver::RaidControllerAddressed);
        let classifier = DeviceClassifier::with_registry(registry);
        let topology = MockTopology::new();
        let ahci = topology.add_ahci_disk("sda", 0, "0x1");

        assert!(classifier
            .classify(&topology.device_from_syspath(&ahci).unwrap())
            .is_none());
    }
}
