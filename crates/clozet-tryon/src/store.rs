//! Persistence and dispatch seams.
//!
//! Implementations live in [`crate::firestore`], [`crate::dispatch`] and
//! [`crate::memory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use clozet_models::{
    ChargeOutcome, CreditAccount, JobId, JobStatus, JobTransition, PlanTier, SourceImage,
    SourceKind, TryonJob,
};

use crate::error::TryonResult;

/// Try-on job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job.
    async fn create(&self, job: &TryonJob) -> TryonResult<()>;

    async fn get(&self, job_id: &JobId) -> TryonResult<Option<TryonJob>>;

    /// Read the job, apply `transition` to the fresh copy and write it back
    /// only if nobody changed it in between. Returns the stored job.
    ///
    /// Fails with `NotFound` for unknown jobs and `Transition` for edges the
    /// lifecycle graph forbids.
    async fn transition(&self, job_id: &JobId, transition: JobTransition)
        -> TryonResult<TryonJob>;

    /// Jobs in `status` last written before `updated_before`.
    async fn list_stale(
        &self,
        status: JobStatus,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> TryonResult<Vec<TryonJob>>;

    /// Completed jobs with `credit_charged == false` last written before
    /// `updated_before`.
    async fn list_uncharged(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> TryonResult<Vec<TryonJob>>;
}

/// Per-user credit accounts.
#[async_trait]
pub trait CreditStore: Send + Sync {
    /// Load the account, creating a free one if the user has none.
    async fn get_or_create(&self, user_id: &str, now: DateTime<Utc>) -> TryonResult<CreditAccount>;

    /// Start a new period, unless the stored `period_end` no longer equals
    /// `expected_period_end` (someone reset it first). Returns the stored
    /// account either way.
    async fn reset_period(
        &self,
        user_id: &str,
        expected_period_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> TryonResult<CreditAccount>;

    /// Flip the job's `credit_charged` and increment the owner's usage as
    /// one atomic unit.
    ///
    /// `NotFound` if the job is missing or not owned by `user_id`,
    /// `Precondition` if it is not completed.
    async fn charge_job(
        &self,
        job_id: &JobId,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> TryonResult<ChargeOutcome>;

    async fn set_plan(
        &self,
        user_id: &str,
        plan: PlanTier,
        now: DateTime<Utc>,
    ) -> TryonResult<CreditAccount>;
}

/// Read-only avatar and fit lookups.
#[async_trait]
pub trait SourceImageStore: Send + Sync {
    /// Look up a record under `user_id`. Another user's record is `None`.
    async fn find(
        &self,
        user_id: &str,
        kind: SourceKind,
        id: &str,
    ) -> TryonResult<Option<SourceImage>>;
}

/// Schedules `JobOrchestrator::process` for a job.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job: &TryonJob) -> TryonResult<()>;
}
