//! RAID controller location.
//!
//! MegaRAID exposes each physical drive as a SCSI device whose address
//! (`host:channel:target:lun`) carries the enclosure slot in the target
//! field.

use super::{Location, LocationError};
use crate::domain::ports::DeviceNode;

/// Backplane label for RAID-controller disks
pub const SCSI_BACKPLANE: &str = "SCSI";

const ADDRESS_FIELDS: usize = 4;

pub(super) fn resolve<D: DeviceNode>(device: &D) -> Result<Location, LocationError> {
    let scsi_device = device.parent().ok_or_else(|| LocationError::NoParent {
        syspath: device.syspath().to_string(),
    })?;

    let name = scsi_device.sysname();
    let fields: Vec<&str> = name.split(':').collect();
    if fields.len() != ADDRESS_FIELDS {
        return Err(LocationError::ScsiAddress {
            name: name.to_string(),
            found: fields.len(),
        });
    }

    Ok(Location::new(SCSI_BACKPLANE, fields[2]))
}
