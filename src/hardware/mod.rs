//! Hardware Module
//!
//! Provides topology access, device classification, location resolution,
//! disk discovery and monitoring for the node agent.

pub mod classification;
pub mod discovery;
pub mod location;
pub mod monitor;
pub mod topology;

pub use classification::*;
pub use discovery::*;
pub use location::{Location, LocationError, LocationResolver, ResolverRegistry};
pub use monitor::*;
pub use topology::*;
