//! Custom Resource Definitions for the disk inventory
//!
//! This module contains the CRD types the agent writes:
//! - Disk: one physical drive, its identity and its chassis location

pub mod disk;

pub use disk::*;
