//! Inventory Module
//!
//! Turns disk updates into inventory records and persists them.

pub mod memory;
pub mod metrics;
pub mod reconciler;
pub mod store;

pub use memory::MemoryDiskStore;
pub use metrics::SyncMetrics;
pub use reconciler::{Reconciler, ReconcilerConfig, SyncOutcome};
pub use store::KubeDiskStore;
