//! Disk Scanner
//!
//! Runs a full enumeration of whole-disk block devices and turns every
//! supported one into a [`Disk`].

use crate::domain::ports::Topology;
use crate::hardware::classification::DeviceClassifier;
use crate::hardware::discovery::Disk;
use std::sync::Arc;
use tracing::{debug, error};

/// Enumerates the disks currently attached to the host
pub struct DiskScanner<T: Topology> {
    topology: Arc<T>,
    classifier: Arc<DeviceClassifier>,
}

impl<T: Topology> Clone for DiskScanner<T> {
    fn clone(&self) -> Self {
        Self {
            topology: self.topology.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

impl<T: Topology> DiskScanner<T> {
    pub fn new(topology: Arc<T>, classifier: Arc<DeviceClassifier>) -> Self {
        Self {
            topology,
            classifier,
        }
    }

    pub fn topology(&self) -> &T {
        &self.topology
    }

    pub fn classifier(&self) -> &DeviceClassifier {
        &self.classifier
    }

    /// Every supported disk currently present.
    ///
    /// An enumeration failure is logged and yields no disks.
    pub fn scan(&self) -> Vec<Disk> {
        let devices = match self.topology.enumerate() {
            Ok(devices) => devices,
            Err(e) => {
                error!("Error enumerating disks: {}", e);
                return Vec::new();
            }
        };

        let total = devices.len();
        let disks: Vec<Disk> = devices
            .iter()
            .filter_map(|device| self.classifier.disk_from_device(self.topology.as_ref(), device))
            .collect();

        debug!("Enumerated {} block devices, {} supported disks", total, disks.len());
        disks
    }

    /// Build the disk for a single device, if it is supported
    pub fn disk_for(&self, device: &T::Device) -> Option<Disk> {
        self.classifier.disk_from_device(self.topology.as_ref(), device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::location::Location;
    use crate::hardware::topology::{MockTopology, SasSlot};

    fn scanner(topology: &MockTopology) -> DiskScanner<MockTopology> {
        DiskScanner::new(Arc::new(topology.clone()), Arc::new(DeviceClassifier::new()))
    }

    #[test]
    fn test_scan_mixed_controllers() {
        let topology = MockTopology::new();
        topology.add_disk_with_driver("sda", "unknown-raid", "0x5000000000000001");
        topology.add_ahci_disk("sdb", 4, "0x5000000000000002");
        topology.add_megaraid_disk("sdc", "1:2:3:4", "0x5000000000000003");

        let disks = scanner(&topology).scan();
        assert_eq!(disks.len(), 2);

        let ahci = disks.iter().find(|d| d.driver() == "ahci").unwrap();
        assert_eq!(ahci.slot(), "4");
        assert_eq!(ahci.backplane(), "SATA");

        let mega = disks.iter().find(|d| d.driver() == "megaraid_sas").unwrap();
        assert_eq!(mega.slot(), "3");
        assert_eq!(mega.backplane(), "SCSI");
    }

    #[test]
    fn test_scan_excludes_virtual_disks() {
        let topology = MockTopology::new();
        topology.add_virtual_disk("loop0");
        topology.add_virtual_disk("vda");
        assert!(scanner(&topology).scan().is_empty());
    }

    #[test]
    fn test_scan_keeps_unlocated_disk() {
        let topology = MockTopology::new();
        let path = topology.add_sas_disk(
            "sdd",
            "0x5000cca2",
            SasSlot {
                expander: Some("SAS2X36"),
                enclosure: "E",
                bay: "9",
                phy: 9,
            },
        );
        let end_device = path
            .split("/target0:0:9")
            .next()
            .unwrap()
            .to_string();
        topology.remove(&format!("{}/sas_device/end_device-0:0:9", end_device));

        let disks = scanner(&topology).scan();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].location(), &Location::default());
        assert_eq!(disks[0].wwn(), "0x5000cca2");
    }

    #[test]
    fn test_scan_enumeration_failure() {
        let topology = MockTopology::new();
        topology.add_ahci_disk("sda", 0, "0x1");
        topology.set_enumeration_failure(true);
        assert!(scanner(&topology).scan().is_empty());
    }
}
