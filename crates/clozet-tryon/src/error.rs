//! Orchestration error types.

use thiserror::Error;

use clozet_firestore::FirestoreError;
use clozet_models::TransitionError;
use clozet_queue::QueueError;
use clozet_storage::StorageError;

use crate::provider::ProviderError;

pub type TryonResult<T> = Result<T, TryonError>;

#[derive(Debug, Error)]
pub enum TryonError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Precondition(String),

    #[error("Insufficient credits")]
    InsufficientCredits,

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Validation(String),

    #[error("Job timed out after {attempts} attempts")]
    PollTimeout { attempts: u32 },

    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("Failed to generate signed URLs for images: {0}")]
    Signing(#[source] StorageError),

    #[error("Firestore error: {0}")]
    Firestore(#[from] FirestoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TryonError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn job_not_found() -> Self {
        Self::NotFound("Try-on job not found".to_string())
    }

    /// Failures of our own backing services, as opposed to the job's inputs
    /// or the provider. These are worth redelivering.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            TryonError::Firestore(e) => !matches!(
                e,
                FirestoreError::PermissionDenied(_) | FirestoreError::InvalidResponse(_)
            ),
            TryonError::Queue(_) => true,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            TryonError::Cancelled | TryonError::Provider(ProviderError::Cancelled)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            TryonError::PollTimeout { attempts: 10 }.to_string(),
            "Job timed out after 10 attempts"
        );
        assert_eq!(TryonError::InsufficientCredits.to_string(), "Insufficient credits");
        assert_eq!(
            TryonError::Signing(StorageError::presign_failed("boom")).to_string(),
            format!(
                "Failed to generate signed URLs for images: {}",
                StorageError::presign_failed("boom")
            )
        );
    }

    #[test]
    fn test_classification() {
        assert!(TryonError::Firestore(FirestoreError::ServerError(503, "x".into())).is_infrastructure());
        assert!(!TryonError::Firestore(FirestoreError::InvalidResponse("x".into())).is_infrastructure());
        assert!(!TryonError::PollTimeout { attempts: 10 }.is_infrastructure());
        assert!(TryonError::Provider(ProviderError::Cancelled).is_cancelled());
    }
}
