//! Try-on worker.
//!
//! This crate provides:
//! - the stream executor that runs `JobOrchestrator::process` per message
//! - crash recovery through claimed stream entries
//! - sweeps for undispatched, uncharged and abandoned jobs
//! - graceful shutdown

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod logging;
pub mod sweeper;

pub use config::WorkerConfig;
pub use context::build_orchestrator;
pub use error::{WorkerError, WorkerResult};
pub use executor::{Disposition, JobExecutor, RetryStep};
pub use logging::JobLogger;
pub use sweeper::{SweepReport, Sweeper};
