//! Disk Discovery Module
//!
//! Builds disk records from classified devices and enumerates every disk
//! present on the host.

pub mod disk;
pub mod scanner;

pub use disk::*;
pub use scanner::*;
