//! Error types for koinonia-sync

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Notification not found: {0}")]
    NotificationNotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether a bounded backoff retry is worthwhile.
    ///
    /// Permission and serialization failures are permanent; timeouts and
    /// momentary store unavailability are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Timeout(_) | SyncError::Unavailable(_))
    }
}
