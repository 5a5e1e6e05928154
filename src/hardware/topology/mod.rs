//! Device Topology
//!
//! Readers for the kernel device tree: sysfs with udev netlink events on real
//! hosts, and an in-memory tree for tests and benchmarks.

pub mod mock;
pub mod sysfs;
pub mod uevent;

pub use mock::{MockDevice, MockNode, MockTopology, SasSlot};
pub use sysfs::{SysfsDevice, SysfsTopology};
pub use uevent::Uevent;
