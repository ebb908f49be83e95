//! Storage error types.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Missing or unusable R2 settings
    #[error("Storage misconfigured: {0}")]
    ConfigError(String),

    #[error("Could not store image: {0}")]
    UploadFailed(String),

    /// No signed URL could be produced for a stored object
    #[error("Could not sign image URL: {0}")]
    PresignFailed(String),

    #[error("Invalid object path: {0}")]
    InvalidKey(String),

    #[error("R2 bucket unreachable: {0}")]
    Unreachable(String),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn presign_failed(msg: impl Into<String>) -> Self {
        Self::PresignFailed(msg.into())
    }

    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey(key.into())
    }
}
