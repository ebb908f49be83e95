//! Firestore REST API client.
//!
//! This crate provides:
//! - A REST client with token caching, retry and request metrics
//! - Emulator support (`FIRESTORE_EMULATOR_HOST`)
//! - Atomic commits with preconditions and field transforms
//! - Typed repositories for try-on jobs, credit accounts and source images

pub mod client;
pub mod credit_repo;
pub mod error;
pub mod job_repo;
pub mod metrics;
pub mod retry;
pub mod source_repo;
pub mod token_cache;
pub mod types;

pub use client::{FirestoreClient, FirestoreConfig};
pub use credit_repo::CreditAccountRepository;
pub use error::{FirestoreError, FirestoreResult};
pub use job_repo::{TryonJobRepository, Versioned};
pub use retry::RetryConfig;
pub use source_repo::SourceImageRepository;
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
