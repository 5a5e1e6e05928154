//! Disk CRD
//!
//! The inventory record for one physical disk: its identity, where it sits
//! in the chassis, and the raw kernel data it was discovered with.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix of every label the agent manages
pub const LABEL_PREFIX: &str = "storage.billyronks.io";

const MAX_LABEL_VALUE_LEN: usize = 63;

// =============================================================================
// Disk CRD
// =============================================================================

/// Disk records a physical drive attached to a cluster node, keyed by its WWN.
/// The node agent keeps `info` and `location` current; `enabled` and the
/// preparation status belong to the operator.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.billyronks.io",
    version = "v1alpha1",
    kind = "Disk",
    plural = "disks",
    status = "DiskStatus",
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".spec.location.node"}"#,
    printcolumn = r#"{"name": "Backplane", "type": "string", "jsonPath": ".spec.location.backplane"}"#,
    printcolumn = r#"{"name": "Slot", "type": "string", "jsonPath": ".spec.location.slot"}"#,
    printcolumn = r#"{"name": "Model", "type": "string", "jsonPath": ".spec.info.model"}"#,
    printcolumn = r#"{"name": "Enabled", "type": "boolean", "jsonPath": ".spec.enabled"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.preparePhase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DiskSpec {
    /// Whether the disk may be consumed
    #[serde(default)]
    pub enabled: bool,

    /// Identity and raw kernel data
    #[serde(default)]
    pub info: DiskInfo,

    /// Physical location
    #[serde(default)]
    pub location: DiskLocation,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Identity of a disk as reported by the kernel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskInfo {
    /// World Wide Name
    #[serde(default)]
    pub wwn: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub serial_number: String,

    /// Capacity in bytes, as a decimal string
    #[serde(default)]
    pub capacity: String,

    /// Raw sysfs attributes
    #[serde(default)]
    pub udev_attributes: BTreeMap<String, String>,

    /// Raw device properties
    #[serde(default)]
    pub udev_properties: BTreeMap<String, String>,
}

impl DiskInfo {
    pub fn update_info(&mut self, wwn: &str, model: &str, serial_number: &str, capacity: &str) {
        self.wwn = wwn.to_string();
        self.model = model.to_string();
        self.serial_number = serial_number.to_string();
        self.capacity = capacity.to_string();
    }
}

/// Where a disk sits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskLocation {
    /// Node the disk is attached to
    #[serde(default)]
    pub node: String,

    /// Backplane label (e.g. Front, Rear, SATA)
    #[serde(default)]
    pub backplane: String,

    /// Slot within the backplane
    #[serde(default)]
    pub slot: String,

    /// Controller driver that owns the disk
    #[serde(default)]
    pub driver: String,
}

impl DiskLocation {
    pub fn update_location(&mut self, node: &str, backplane: &str, slot: &str, driver: &str) {
        self.node = node.to_string();
        self.backplane = backplane.to_string();
        self.slot = slot.to_string();
        self.driver = driver.to_string();
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status of the Disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskStatus {
    /// Preparation phase
    #[serde(default)]
    pub prepare_phase: PreparePhase,

    /// When the agent first recorded the disk
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_discovered_time: Option<DateTime<Utc>>,
}

impl DiskStatus {
    /// Status of a disk the agent has just found
    pub fn discovered() -> Self {
        Self {
            prepare_phase: PreparePhase::Discovered,
            last_discovered_time: Some(Utc::now()),
        }
    }
}

/// Disk preparation phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum PreparePhase {
    #[default]
    Discovered,
    Preparing,
    Prepared,
    Failed,
}

impl std::fmt::Display for PreparePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreparePhase::Discovered => write!(f, "Discovered"),
            PreparePhase::Preparing => write!(f, "Preparing"),
            PreparePhase::Prepared => write!(f, "Prepared"),
            PreparePhase::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

impl Disk {
    /// An empty record with the given name
    pub fn init(name: &str) -> Self {
        Disk::new(
            name,
            DiskSpec {
                enabled: false,
                info: DiskInfo::default(),
                location: DiskLocation::default(),
            },
        )
    }

    /// Compare the fields the agent observes, ignoring operator and
    /// store-managed state (enablement, status, metadata).
    pub fn observed_eq(&self, other: &Disk) -> bool {
        self.spec.info == other.spec.info && self.spec.location == other.spec.location
    }

    /// Rebuild the agent-managed labels from the spec
    pub fn update_labels(&mut self) {
        let managed = [
            ("node", self.spec.location.node.as_str()),
            ("backplane", self.spec.location.backplane.as_str()),
            ("slot", self.spec.location.slot.as_str()),
            ("driver", self.spec.location.driver.as_str()),
            ("wwn", self.spec.info.wwn.as_str()),
        ];

        let labels = self.metadata.labels.get_or_insert_with(BTreeMap::new);
        for (key, value) in managed {
            let key = format!("{}/{}", LABEL_PREFIX, key);
            match sanitize_label_value(value) {
                Some(value) => {
                    labels.insert(key, value);
                }
                None => {
                    labels.remove(&key);
                }
            }
        }
    }
}

/// Coerce a string into a valid label value, or `None` if nothing is left
pub fn sanitize_label_value(value: &str) -> Option<String> {
    let replaced: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_LABEL_VALUE_LEN)
        .collect();

    let trimmed = replaced.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn sample() -> Disk {
        let mut disk = Disk::init("wwn-0x5000c500a1b2c3d4");
        disk.spec
            .info
            .update_info("0x5000c500a1b2c3d4", "ST4000NM0023", "Z1Z0ABCD", "4000787030016");
        disk.spec
            .location
            .update_location("storage-01", "Front", "7", "mpt3sas");
        disk
    }

    #[test]
    fn test_crd_metadata() {
        let crd = Disk::crd();
        assert_eq!(crd.spec.group, "storage.billyronks.io");
        assert_eq!(crd.spec.names.kind, "Disk");
        assert_eq!(crd.spec.scope, "Cluster");
    }

    #[test]
    fn test_observed_eq_ignores_operator_state() {
        let a = sample();
        let mut b = sample();
        b.spec.enabled = true;
        b.status = Some(DiskStatus {
            prepare_phase: PreparePhase::Prepared,
            last_discovered_time: None,
        });
        b.metadata.resource_version = Some("42".into());
        assert!(a.observed_eq(&b));

        b.spec.location.slot = "8".into();
        assert!(!a.observed_eq(&b));
    }

    #[test]
    fn test_update_labels() {
        let mut disk = sample();
        disk.update_labels();
        let labels = disk.metadata.labels.as_ref().unwrap();
        assert_eq!(labels["storage.billyronks.io/backplane"], "Front");
        assert_eq!(labels["storage.billyronks.io/slot"], "7");
        assert_eq!(labels["storage.billyronks.io/wwn"], "0x5000c500a1b2c3d4");

        disk.spec.location.backplane.clear();
        disk.update_labels();
        let labels = disk.metadata.labels.as_ref().unwrap();
        assert!(!labels.contains_key("storage.billyronks.io/backplane"));
    }

    #[test]
    fn test_sanitize_label_value() {
        assert_eq!(sanitize_label_value("SAS3x40-500605b0"), Some("SAS3x40-500605b0".into()));
        assert_eq!(sanitize_label_value(" Front "), Some("Front".into()));
        assert_eq!(sanitize_label_value("a/b:c"), Some("a-b-c".into()));
        assert_eq!(sanitize_label_value("--"), None);
        assert_eq!(sanitize_label_value(&"x".repeat(80)).unwrap().len(), 63);
    }
}
