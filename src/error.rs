//! Error types for the disk inventory agent
//!
//! Provides structured error types for topology access, location
//! resolution, and synchronization with the inventory store.

use crate::hardware::location::LocationError;
use thiserror::Error;

/// Unified error type for the agent
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    // =========================================================================
    // Hardware Discovery Errors
    // =========================================================================
    #[error("Hardware discovery failed: {0}")]
    HardwareDiscovery(String),

    #[error("Device event subscription failed: {0}")]
    Subscription(String),

    #[error(transparent)]
    Location(#[from] LocationError),

    // =========================================================================
    // Inventory Errors
    // =========================================================================
    #[error("Disk has no WWN, skipping: {device}")]
    MissingIdentity { device: String },

    #[error("Failed to sync disk {name}: {reason}")]
    SyncFailed { name: String, reason: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Duration parse error: {0}")]
    DurationParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is transient.
    ///
    /// Transient failures are not retried; the next live event or periodic
    /// rescan for the same disk syncs it again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_) | Error::SyncFailed { .. } | Error::Io(_)
        )
    }

    /// Check if the store reported that the resource already exists
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::ResourceExists { .. } => true,
            Error::Kube(kube::Error::Api(response)) => response.code == 409,
            _ => false,
        }
    }

    /// Check if the store reported that the resource does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }
}

/// Result type alias for the agent
pub type Result<T> = std::result::Result<T, Error>;
