//! Sysfs Topology
//!
//! Reads the kernel device tree from sysfs and identity properties from the
//! udev database.

use crate::domain::ports::{DeviceEvent, DeviceNode, Topology};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

// =============================================================================
// Paths
// =============================================================================

#[derive(Debug)]
pub(crate) struct SysfsPaths {
    /// sysfs mount point
    pub(crate) root: PathBuf,
    /// `<root>/devices`, the upper bound of every parent walk
    pub(crate) devices: PathBuf,
    /// udev database directory
    pub(crate) udev_data: PathBuf,
}

// =============================================================================
// Sysfs Topology
// =============================================================================

/// Topology reader backed by a sysfs tree
#[derive(Debug, Clone)]
pub struct SysfsTopology {
    paths: Arc<SysfsPaths>,
}

impl SysfsTopology {
    /// Create a topology reader over `sysfs_root`, reading udev properties
    /// from `udev_data_dir`
    pub fn new(sysfs_root: impl AsRef<Path>, udev_data_dir: impl AsRef<Path>) -> Self {
        let root = sysfs_root.as_ref();
        let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let devices = root.join("devices");

        Self {
            paths: Arc::new(SysfsPaths {
                root,
                devices,
                udev_data: udev_data_dir.as_ref().to_path_buf(),
            }),
        }
    }

    /// Root of the sysfs tree
    pub fn root(&self) -> &Path {
        &self.paths.root
    }
}

impl Topology for SysfsTopology {
    type Device = SysfsDevice;

    fn enumerate(&self) -> Result<Vec<SysfsDevice>> {
        let class_block = self.paths.root.join("class/block");
        let entries = fs::read_dir(&class_block).map_err(|e| {
            Error::HardwareDiscovery(format!("Failed to read {}: {}", class_block.display(), e))
        })?;

        let mut devices = Vec::new();
        for entry in entries.flatten() {
            let syspath = match fs::canonicalize(entry.path()) {
                Ok(path) => path,
                Err(e) => {
                    debug!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            let device = SysfsDevice::new(self.paths.clone(), &syspath);
            if device.devtype().as_deref() == Some("disk") {
                devices.push(device);
            }
        }

        Ok(devices)
    }

    fn device_from_syspath(&self, syspath: &str) -> Option<SysfsDevice> {
        let path = Path::new(syspath);
        if path.join("uevent").is_file() {
            Some(SysfsDevice::new(self.paths.clone(), path))
        } else {
            None
        }
    }

    #[cfg(target_os = "linux")]
    fn subscribe(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<DeviceEvent<SysfsDevice>>> {
        super::uevent::spawn_listener(self.paths.clone(), cancel)
    }

    #[cfg(not(target_os = "linux"))]
    fn subscribe(
        &self,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<DeviceEvent<SysfsDevice>>> {
        Err(Error::Subscription(
            "kernel uevents are only available on Linux".to_string(),
        ))
    }
}

// =============================================================================
// Sysfs Device
// =============================================================================

/// A device directory in sysfs
#[derive(Debug, Clone)]
pub struct SysfsDevice {
    paths: Arc<SysfsPaths>,
    syspath: String,
    /// Properties carried by a live event, layered over what is on disk
    event_properties: BTreeMap<String, String>,
}

impl SysfsDevice {
    pub(crate) fn new(paths: Arc<SysfsPaths>, syspath: &Path) -> Self {
        Self {
            paths,
            syspath: syspath.to_string_lossy().into_owned(),
            event_properties: BTreeMap::new(),
        }
    }

    pub(crate) fn with_event_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.event_properties = properties;
        self
    }

    fn path(&self) -> &Path {
        Path::new(&self.syspath)
    }

    fn link_name(&self, link: &str) -> Option<String> {
        let target = fs::read_link(self.path().join(link)).ok()?;
        Some(target.file_name()?.to_string_lossy().into_owned())
    }

    fn uevent(&self) -> BTreeMap<String, String> {
        fs::read_to_string(self.path().join("uevent"))
            .map(|content| parse_key_values(&content))
            .unwrap_or_default()
    }

    fn udev_properties(&self, major: &str, minor: &str) -> BTreeMap<String, String> {
        let db = self.paths.udev_data.join(format!("b{}:{}", major, minor));
        let content = match fs::read_to_string(&db) {
            Ok(content) => content,
            Err(e) => {
                trace!("No udev data at {}: {}", db.display(), e);
                return BTreeMap::new();
            }
        };

        content
            .lines()
            .filter_map(|line| line.strip_prefix("E:"))
            .filter_map(|kv| kv.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl DeviceNode for SysfsDevice {
    fn syspath(&self) -> &str {
        &self.syspath
    }

    fn subsystem(&self) -> Option<String> {
        self.link_name("subsystem")
    }

    fn devtype(&self) -> Option<String> {
        self.uevent()
            .remove("DEVTYPE")
            .or_else(|| self.event_properties.get("DEVTYPE").cloned())
    }

    fn driver(&self) -> Option<String> {
        self.link_name("driver")
    }

    fn parent(&self) -> Option<Self> {
        let mut current = self.path().parent();
        while let Some(path) = current {
            if !path.starts_with(&self.paths.devices) || path == self.paths.devices {
                return None;
            }
            if path.join("uevent").is_file() {
                return Some(SysfsDevice::new(self.paths.clone(), path));
            }
            current = path.parent();
        }
        None
    }

    fn attribute(&self, name: &str) -> Option<String> {
        let value = fs::read_to_string(self.path().join(name)).ok()?;
        Some(value.trim_end_matches('\n').to_string())
    }

    fn attributes(&self) -> BTreeMap<String, String> {
        let mut attributes = BTreeMap::new();
        let Ok(entries) = fs::read_dir(self.path()) else {
            return attributes;
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "uevent" {
                continue;
            }
            // symlinks (driver, subsystem, device) are topology, not attributes
            match entry.file_type() {
                Ok(file_type) if file_type.is_file() => {}
                _ => continue,
            }
            if let Some(value) = self.attribute(&name) {
                attributes.insert(name, value);
            }
        }

        attributes
    }

    fn properties(&self) -> BTreeMap<String, String> {
        let mut properties = self.uevent();

        if let Some(devname) = properties.get_mut("DEVNAME") {
            if !devname.starts_with('/') {
                *devname = format!("/dev/{}", devname);
            }
        }

        if let Ok(devpath) = self.path().strip_prefix(&self.paths.root) {
            properties.insert("DEVPATH".to_string(), format!("/{}", devpath.display()));
        }
        if let Some(subsystem) = self.subsystem() {
            properties.insert("SUBSYSTEM".to_string(), subsystem);
        }

        let udev = match (properties.get("MAJOR"), properties.get("MINOR")) {
            (Some(major), Some(minor)) => self.udev_properties(major, minor),
            _ => BTreeMap::new(),
        };
        properties.extend(udev);

        properties.extend(
            self.event_properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        properties
    }
}

/// Parse `KEY=VALUE` lines, ignoring anything else
pub(crate) fn parse_key_values(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
