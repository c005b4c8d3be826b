use thiserror::Error;

/// Errors raised while persisting or restoring variable payloads.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Store entry corrupted: {0}")]
    Corrupted(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::SerializationError(e.to_string())
    }
}
