//! Disk Inventory - Node Agent
//!
//! Discovers the physical disks attached to a host, works out which
//! backplane slot each one sits in, and keeps a `Disk` custom resource per
//! drive in step with what it observes.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                            Device Monitor                             │
//! │   udev events ─────┐                                                  │
//! │   periodic rescan ─┼──▶ Classifier ──▶ Location Resolver ──▶ Disk    │
//! │   manual trigger ──┘     (driver)      (SATA / RAID / SAS)            │
//! └───────────────────────────────────┬───────────────────────────────────┘
//!                                     │ DiskUpdate
//!                                     ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                              Reconciler                               │
//! │          create ─▶ (exists) get ─▶ compare ─▶ merge ─▶ replace        │
//! └───────────────────────────────────┬───────────────────────────────────┘
//!                                     ▼
//!                          Disk resources (Kubernetes)
//! ```
//!
//! # Modules
//!
//! - [`hardware`]: Topology access, classification, location resolution,
//!   discovery and monitoring
//! - [`inventory`]: Reconciler and inventory stores
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Core traits
//! - [`config`]: Agent configuration
//! - [`error`]: Error types and handling

pub mod config;
pub mod crd;
pub mod domain;
pub mod error;
pub mod hardware;
pub mod inventory;

// Re-export commonly used types
pub use config::{parse_duration, resolve_node_name, AgentConfig};

pub use crd::{Disk as DiskResource, DiskInfo, DiskLocation, DiskSpec, DiskStatus, PreparePhase};

pub use domain::ports::{DeviceAction, DeviceEvent, DeviceNode, DiskStore, Topology};

pub use error::{Error, Result};

pub use hardware::{
    DeviceClassifier, Disk, DiskAction, DiskMonitor, DiskScanner, DiskUpdate, Location,
    LocationError, LocationResolver, MonitorConfig, ResolverRegistry, ScanTrigger, SysfsTopology,
};

pub use inventory::{
    KubeDiskStore, MemoryDiskStore, Reconciler, ReconcilerConfig, SyncMetrics, SyncOutcome,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
