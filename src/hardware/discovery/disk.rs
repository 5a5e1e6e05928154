//! Discovered Disk
//!
//! The record built for every supported block device on each discovery
//! pass, and the update that carries it to the reconciler.

use crate::domain::ports::DeviceNode;
use crate::hardware::location::{Location, LocationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Constants
// =============================================================================

/// Bytes per sector in the sysfs `size` attribute
pub const SECTOR_SIZE: u64 = 512;

pub const PROP_WWN: &str = "ID_WWN_WITH_EXTENSION";
pub const PROP_MODEL: &str = "ID_MODEL";
pub const PROP_SERIAL: &str = "ID_SERIAL_SHORT";
pub const PROP_DEVNAME: &str = "DEVNAME";
pub const ATTR_SIZE: &str = "size";

// =============================================================================
// Disk
// =============================================================================

/// A supported disk as observed during one discovery pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    driver: String,
    location: Location,
    properties: BTreeMap<String, String>,
    attributes: BTreeMap<String, String>,
}

impl Disk {
    pub fn new(
        driver: impl Into<String>,
        location: Location,
        properties: BTreeMap<String, String>,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            location,
            properties,
            attributes,
        }
    }

    /// Build the record for a classified device.
    ///
    /// A failed location leaves backplane and slot empty; properties and
    /// attributes are copied either way.
    pub fn from_device<D: DeviceNode>(
        driver: &str,
        location: Result<Location, LocationError>,
        device: &D,
    ) -> Self {
        Self::new(
            driver,
            location.unwrap_or_default(),
            device.properties(),
            device.attributes(),
        )
    }

    /// Stable inventory key derived from the WWN, or `None` without one
    pub fn name(&self) -> Option<String> {
        let wwn = self.wwn();
        if wwn.is_empty() {
            None
        } else {
            Some(format!("wwn-{}", wwn.to_lowercase()))
        }
    }

    /// Capacity from the sector count, 0 when unknown
    pub fn capacity_bytes(&self) -> u64 {
        self.attributes
            .get(ATTR_SIZE)
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|sectors| sectors.saturating_mul(SECTOR_SIZE))
            .unwrap_or(0)
    }

    pub fn wwn(&self) -> &str {
        self.property(PROP_WWN)
    }

    pub fn model(&self) -> &str {
        self.property(PROP_MODEL)
    }

    pub fn serial_number(&self) -> &str {
        self.property(PROP_SERIAL)
    }

    pub fn dev_name(&self) -> &str {
        self.property(PROP_DEVNAME)
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn backplane(&self) -> &str {
        &self.location.backplane
    }

    pub fn slot(&self) -> &str {
        &self.location.slot
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    fn property(&self, key: &str) -> &str {
        self.properties.get(key).map(String::as_str).unwrap_or("")
    }
}

// =============================================================================
// Disk Update
// =============================================================================

/// What caused a disk to be reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskAction {
    /// Kernel reported the device added
    Insert,
    /// Kernel reported the device removed
    Remove,
    /// Seen during a full enumeration
    NoOp,
}

impl std::fmt::Display for DiskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiskAction::Insert => write!(f, "insert"),
            DiskAction::Remove => write!(f, "remove"),
            DiskAction::NoOp => write!(f, "noop"),
        }
    }
}

/// A disk handed from the monitor to the reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskUpdate {
    pub disk: Disk,
    pub action: DiskAction,
}
