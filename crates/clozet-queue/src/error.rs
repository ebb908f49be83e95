//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// `XADD` failed after the dedup key was claimed.
    #[error("Could not add try-on job to stream: {0}")]
    EnqueueFailed(String),

    /// This job revision is already on the stream.
    #[error("Try-on job already queued ({0})")]
    Duplicate(String),

    #[error("Redis: {0}")]
    Redis(#[from] redis::RedisError),

    /// Message payload that doesn't (de)serialize as `ProcessTryonJob`.
    #[error("Bad queue payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl QueueError {
    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, QueueError::Duplicate(_))
    }
}
