//! SAS expander location.
//!
//! A disk on a SAS HBA hangs off an end device. Its `sas_device` class node
//! reports the enclosure and bay; the nearest upstream expander, if any,
//! tells which backplane the bay belongs to.
//!
//! ```text
//! host0/port-0:0/expander-0:0/port-0:0:3/end_device-0:0:3/target0:0:3/0:0:3:0/block/sdb
//!                 └ sas_expander/expander-0:0              └ sas_device/end_device-0:0:3
//! ```

use super::{Location, LocationError};
use crate::domain::ports::{DeviceNode, Topology};
use tracing::trace;

/// Expander product ids with a known backplane
const KNOWN_EXPANDERS: &[(&str, &str)] = &[("SAS2X36", "Front"), ("SAS2X28", "Rear")];

pub(super) fn resolve<T: Topology>(
    topology: &T,
    device: &T::Device,
) -> Result<Location, LocationError> {
    let enclosure_id = sas_device(topology, device)?
        .attribute("enclosure_identifier")
        .unwrap_or_default();

    let backplane = match closest_expander(topology, device) {
        Some(expander) => {
            let product_id = expander.attribute("product_id").unwrap_or_default();
            backplane_label(product_id.trim(), &enclosure_id)
        }
        None => enclosure_id,
    };

    // the peer is looked up again for the bay; losing it here discards the
    // backplane as well
    let slot = sas_device(topology, device)?
        .attribute("bay_identifier")
        .unwrap_or_default();

    Ok(Location { backplane, slot })
}

/// Map an expander product id to a backplane label
pub fn backplane_label(product_id: &str, enclosure_id: &str) -> String {
    if product_id.is_empty() {
        return enclosure_id.to_string();
    }

    KNOWN_EXPANDERS
        .iter()
        .find(|(id, _)| *id == product_id)
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| format!("{}-{}", product_id, enclosure_id))
}

/// Open the `sas_device` class node of the end device above `device`
fn sas_device<T: Topology>(topology: &T, device: &T::Device) -> Result<T::Device, LocationError> {
    let target = device
        .parent_with_subsystem_devtype("scsi", "scsi_target")
        .ok_or_else(|| LocationError::NoScsiTarget {
            syspath: device.syspath().to_string(),
        })?;

    let end_device = target.parent().ok_or_else(|| LocationError::NoParent {
        syspath: target.syspath().to_string(),
    })?;

    let path = peer_path(&end_device, "sas_device");
    topology
        .device_from_syspath(&path)
        .ok_or(LocationError::SasDevice { path })
}

/// Walk up from `device` to the first ancestor that is a SAS expander
fn closest_expander<T: Topology>(topology: &T, device: &T::Device) -> Option<T::Device> {
    let mut current = device.parent();
    while let Some(node) = current {
        let path = peer_path(&node, "sas_expander");
        if let Some(expander) = topology.device_from_syspath(&path) {
            trace!(expander = %path, "Found closest SAS expander");
            return Some(expander);
        }
        current = node.parent();
    }
    None
}

/// `<node>/<class>/<node name>`, where the kernel places a node's class peer
fn peer_path<D: DeviceNode>(node: &D, class: &str) -> String {
    format!("{}/{}/{}", node.syspath(), class, node.sysname())
}
