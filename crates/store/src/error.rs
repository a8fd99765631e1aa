//! Error types for store and cache collaborators

use thiserror::Error;

/// Result type alias for collaborator operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Collaborator errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend could not be reached or rejected the operation
    #[error("{backend} unavailable: {details}")]
    Unavailable { backend: String, details: String },

    /// Referenced record does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Record already exists
    #[error("{entity} already exists: {id}")]
    Conflict { entity: &'static str, id: String },

    /// Experiment no longer accepts outcome writes
    #[error("experiment {id} is completed")]
    Closed { id: String },

    /// Stored value could not be decoded
    #[error("serialization error for key '{key}': {reason}")]
    Serialization { key: String, reason: String },
}

impl StoreError {
    pub fn unavailable(backend: impl Into<String>, details: impl Into<String>) -> Self {
        StoreError::Unavailable {
            backend: backend.into(),
            details: details.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}
