//! Device Monitor Module
//!
//! Long-running watcher that turns kernel notifications, periodic rescans
//! and manual rescan requests into disk updates.

#[allow(clippy::module_inception)]
pub mod monitor;

pub use monitor::*;
