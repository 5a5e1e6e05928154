//! Location Resolution
//!
//! Translates a disk's position in the kernel device tree into a
//! backplane/slot pair. How that works depends on the controller driver,
//! so each supported driver is mapped to one of a closed set of resolvers.

pub mod raid;
pub mod sas;
pub mod sata;

use crate::domain::ports::Topology;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// =============================================================================
// Location
// =============================================================================

/// Physical position of a disk.
///
/// Either field may be empty when the position is only partly known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub backplane: String,
    pub slot: String,
}

impl Location {
    pub fn new(backplane: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            backplane: backplane.into(),
            slot: slot.into(),
        }
    }

    /// Whether both backplane and slot are known
    pub fn is_complete(&self) -> bool {
        !self.backplane.is_empty() && !self.slot.is_empty()
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.backplane, self.slot)
    }
}

/// Why a location could not be determined
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("unable to determine location of {syspath}: no scsi_host ancestor")]
    NoScsiHost { syspath: String },

    #[error("unable to determine location: no host index in '{name}'")]
    HostIndex { name: String },

    #[error("unable to determine location of {syspath}: no parent device")]
    NoParent { syspath: String },

    #[error("unable to determine location: expected 4 address fields in '{name}', found {found}")]
    ScsiAddress { name: String, found: usize },

    #[error("unable to determine location of {syspath}: no scsi_target ancestor")]
    NoScsiTarget { syspath: String },

    #[error("unable to determine location: sas_device {path} unavailable")]
    SasDevice { path: String },
}

// =============================================================================
// Resolvers
// =============================================================================

/// Location resolution strategy for one controller family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationResolver {
    /// Disks on a SATA controller port, one disk per SCSI host
    DirectAttached,
    /// Disks behind a RAID controller addressed as host:channel:target:lun
    RaidControllerAddressed,
    /// Disks on a SAS HBA, possibly behind expanders
    ExpanderTopology,
}

impl LocationResolver {
    /// Resolve the location of `device`
    pub fn resolve<T: Topology>(
        &self,
        topology: &T,
        device: &T::Device,
    ) -> Result<Location, LocationError> {
        match self {
            LocationResolver::DirectAttached => sata::resolve(device),
            LocationResolver::RaidControllerAddressed => raid::resolve(device),
            LocationResolver::ExpanderTopology => sas::resolve(topology, device),
        }
    }
}

impl std::fmt::Display for LocationResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocationResolver::DirectAttached => write!(f, "direct-attached"),
            LocationResolver::RaidControllerAddressed => write!(f, "raid-controller"),
            LocationResolver::ExpanderTopology => write!(f, "sas-expander"),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Immutable mapping from controller driver name to resolver.
///
/// Drivers absent from the registry are not inventoried.
#[derive(Debug, Clone, Default)]
pub struct ResolverRegistry {
    resolvers: BTreeMap<String, LocationResolver>,
}

impl ResolverRegistry {
    /// Registry with the drivers the agent knows how to locate
    pub fn builtin() -> Self {
        Self::default()
            .with("ahci", LocationResolver::DirectAttached)
            .with("megaraid_sas", LocationResolver::RaidControllerAddressed)
            .with("mpt3sas", LocationResolver::ExpanderTopology)
    }

    /// Add a driver mapping while building the registry
    pub fn with(mut self, driver: &str, resolver: LocationResolver) -> Self {
        self.resolvers.insert(driver.to_string(), resolver);
        self
    }

    /// Resolver registered for `driver`
    pub fn get(&self, driver: &str) -> Option<LocationResolver> {
        self.resolvers.get(driver).copied()
    }

    pub fn is_supported(&self, driver: &str) -> bool {
        self.resolvers.contains_key(driver)
    }

    /// Registered driver names, sorted
    pub fn drivers(&self) -> impl Iterator<Item = &str> {
        self.resolvers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}
