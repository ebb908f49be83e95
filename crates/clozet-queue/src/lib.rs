//! Redis Streams queue for try-on processing.
//!
//! This crate provides:
//! - Durable enqueueing with an idempotency window
//! - Consumer-group reads, acks and a dead-letter stream
//! - Reclaiming entries abandoned by crashed workers

pub mod error;
pub mod message;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use message::ProcessTryonJob;
pub use queue::{JobQueue, QueueConfig};
