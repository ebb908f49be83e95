//! Try-on job orchestration.
//!
//! The core of the service: a job is created by [`JobOrchestrator::start`],
//! driven to a terminal state by [`JobOrchestrator::process`] and charged
//! once through the [`CreditLedger`]. Persistence, dispatch and generation
//! sit behind the traits in [`store`] and [`provider`] so the same logic
//! runs against Firestore/Redis in production and in-memory doubles in
//! tests.

pub mod credits;
pub mod dispatch;
pub mod error;
pub mod firestore;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod status;
pub mod store;

pub use credits::CreditLedger;
pub use dispatch::QueueDispatcher;
pub use error::{TryonError, TryonResult};
pub use firestore::{FirestoreCreditStore, FirestoreJobStore, FirestoreSourceImages};
pub use orchestrator::{JobOrchestrator, OrchestratorConfig, OrchestratorDeps, ProcessOutcome};
pub use provider::{
    Provider, ProviderClient, ProviderConfig, ProviderError, ProviderJobToken, ProviderState,
    ProviderStatus,
};
pub use retry::{RetryAccepted, RetryService};
pub use status::{JobView, StatusService};
pub use store::{CreditStore, JobDispatcher, JobStore, SourceImageStore};
