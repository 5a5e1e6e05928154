//! Device Classification Module
//!
//! Determines which controller driver owns a block device and filters out
//! devices the agent does not inventory.

pub mod classifier;

pub use classifier::*;
