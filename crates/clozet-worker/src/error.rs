//! Worker error types.

use thiserror::Error;

use clozet_firestore::FirestoreError;
use clozet_queue::QueueError;
use clozet_storage::StorageError;
use clozet_tryon::TryonError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Tryon(#[from] TryonError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Firestore error: {0}")]
    Firestore(#[from] FirestoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    ///
    /// Only failures of our own backing services qualify; anything about
    /// the job itself has already been recorded on the job.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Tryon(e) => e.is_infrastructure(),
            WorkerError::Queue(_) | WorkerError::Storage(_) => true,
            WorkerError::Firestore(e) => !matches!(
                e,
                FirestoreError::PermissionDenied(_) | FirestoreError::InvalidResponse(_)
            ),
            WorkerError::JobFailed(_) | WorkerError::ConfigError(_) => false,
        }
    }

    /// Processing stopped because the worker is shutting down.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Tryon(e) if e.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        let unavailable = FirestoreError::ServerError(503, "unavailable".to_string());
        assert!(WorkerError::Tryon(TryonError::Firestore(unavailable)).is_retryable());
        assert!(WorkerError::Firestore(FirestoreError::ServerError(500, "x".into())).is_retryable());
        assert!(!WorkerError::Tryon(TryonError::job_not_found()).is_retryable());
        assert!(!WorkerError::Tryon(TryonError::PollTimeout { attempts: 10 }).is_retryable());
        assert!(!WorkerError::job_failed("bad payload").is_retryable());
    }

    #[test]
    fn test_cancelled() {
        assert!(WorkerError::Tryon(TryonError::Cancelled).is_cancelled());
        assert!(!WorkerError::Tryon(TryonError::Cancelled).is_retryable());
        assert!(!WorkerError::job_failed("x").is_cancelled());
    }
}
