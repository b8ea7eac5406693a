use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Context not found: {id}")]
    ContextNotFound { id: String },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<prompter_core::CoreError> for StorageError {
    fn from(err: prompter_core::CoreError) -> Self {
        match err {
            prompter_core::CoreError::Serialization(e) => Self::Serialization(e),
            other => Self::Backend(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
