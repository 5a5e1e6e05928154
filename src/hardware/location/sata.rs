//! Direct-attached SATA location.
//!
//! Each AHCI port gets its own SCSI host, so the host index is the port.

use super::{Location, LocationError};
use crate::domain::ports::DeviceNode;
use regex::Regex;
use std::sync::OnceLock;

/// Backplane label for AHCI ports
pub const SATA_BACKPLANE: &str = "SATA";

static HOST_PATTERN: OnceLock<Regex> = OnceLock::new();

fn host_pattern() -> &'static Regex {
    HOST_PATTERN.get_or_init(|| {
        Regex::new(r"host([0-9]+)").expect("Failed to initialise known-working regex")
    })
}

/// Extract the index from a SCSI host name such as `host4`.
///
/// The pattern must occur exactly once.
pub fn host_index(name: &str) -> Option<String> {
    let mut matches = host_pattern().captures_iter(name);
    let first = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    Some(first[1].to_string())
}

pub(super) fn resolve<D: DeviceNode>(device: &D) -> Result<Location, LocationError> {
    let host = device
        .parent_with_subsystem_devtype("scsi", "scsi_host")
        .ok_or_else(|| LocationError::NoScsiHost {
            syspath: device.syspath().to_string(),
        })?;

    let slot = host_index(host.sysname()).ok_or_else(|| LocationError::HostIndex {
        name: host.sysname().to_string(),
    })?;

    Ok(Location::new(SATA_BACKPLANE, slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Topology;
    use crate::hardware::topology::{MockNode, MockTopology};
    use assert_matches::assert_matches;

    #[test]
    fn test_host_index() {
        assert_eq!(host_index("host4").as_deref(), Some("4"));
        assert_eq!(host_index("host12").as_deref(), Some("12"));
        assert_eq!(host_index("host"), None);
        assert_eq!(host_index("hostA"), None);
        assert_eq!(host_index("host1host2"), None);
    }

    #[test]
    fn test_resolve_ahci() {
        let topology = MockTopology::new();
        let path = topology.add_ahci_disk("sdc", 4, "0x5000c500a1b2c3d4");
        let disk = topology.device_from_syspath(&path).unwrap();

        let location = resolve(&disk).unwrap();
        assert_eq!(location, Location::new("SATA", "4"));
    }

    #[test]
    fn test_resolve_malformed_host() {
        let topology = MockTopology::new();
        topology.insert(
            "/sys/devices/pci0000:00/ata1/scsi_hostX",
            MockNode::new().subsystem("scsi", "scsi_host"),
        );
        topology.insert(
            "/sys/devices/pci0000:00/ata1/scsi_hostX/block/sda",
            MockNode::new().subsystem("block", "disk"),
        );
        let disk = topology
            .device_from_syspath("/sys/devices/pci0000:00/ata1/scsi_hostX/block/sda")
            .unwrap();

        assert_matches!(resolve(&disk), Err(LocationError::HostIndex { .. }));
    }

    #[test]
    fn test_resolve_without_host() {
        let topology = MockTopology::new();
        let path = topology.add_virtual_disk("vda");
        let disk = topology.device_from_syspath(&path).unwrap();

        assert_matches!(resolve(&disk), Err(LocationError::NoScsiHost { .. }));
    }
}
