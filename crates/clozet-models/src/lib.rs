//! Shared data models for the Clozet try-on backend.
//!
//! This crate provides Serde-serializable types for:
//! - Try-on jobs and their lifecycle transitions
//! - Credit accounts and plan tiers
//! - Avatar and fit source images

pub mod credit;
pub mod job;
pub mod source;

// Re-export common types
pub use credit::{add_one_month, ChargeOutcome, CreditAccount, CreditCheck, CreditInfo, PlanTier};
pub use job::{
    is_absolute_url, JobId, JobOptions, JobStatus, JobTransition, TransitionError, TryonJob,
};
pub use source::{SourceImage, SourceKind};
