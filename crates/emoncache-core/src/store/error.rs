use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The storage root could not be resolved, created or written.
    #[error("Storage unavailable at {path:?}: {reason}")]
    StorageUnavailable { path: Option<PathBuf>, reason: String },

    /// A handle for this account is already open.
    #[error("Store for account {0} is already open")]
    StoreBusy(Uuid),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn unavailable(path: Option<PathBuf>, reason: impl Into<String>) -> Self {
        StoreError::StorageUnavailable {
            path,
            reason: reason.into(),
        }
    }

    /// Whether the account should be considered unusable until reconfigured.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::StorageUnavailable { .. })
    }
}
