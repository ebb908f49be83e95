//! Firestore-backed stores.
//!
//! Every read-modify-write goes through an `updateTime` precondition and is
//! retried a few times when another writer got there first.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use clozet_firestore::credit_repo::USERS_COLLECTION;
use clozet_firestore::job_repo::JOBS_COLLECTION;
use clozet_firestore::metrics::record_conflict;
use clozet_firestore::{
    CreditAccountRepository, FirestoreClient, FirestoreError, SourceImageRepository,
    TryonJobRepository,
};
use clozet_models::{
    ChargeOutcome, CreditAccount, JobId, JobStatus, JobTransition, PlanTier, SourceImage,
    SourceKind, TryonJob,
};

use crate::error::{TryonError, TryonResult};
use crate::store::{CreditStore, JobStore, SourceImageStore};

/// Attempts for an optimistic read-modify-write.
const MAX_WRITE_ATTEMPTS: u32 = 5;

const CONFLICT_BASE_DELAY_MS: u64 = 50;

/// Back off after losing a precondition race.
async fn conflict_backoff(collection: &str, key: &str, attempt: u32) {
    record_conflict(collection);
    debug!(
        collection,
        key,
        attempt = attempt + 1,
        "Precondition failed, retrying"
    );
    tokio::time::sleep(Duration::from_millis(CONFLICT_BASE_DELAY_MS << attempt)).await;
}

fn query_limit(limit: usize) -> i32 {
    i32::try_from(limit).unwrap_or(i32::MAX)
}

/// Jobs in the `tryon_jobs` collection.
#[derive(Clone)]
pub struct FirestoreJobStore {
    repo: TryonJobRepository,
}

impl FirestoreJobStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self {
            repo: TryonJobRepository::new(client),
        }
    }
}

#[async_trait]
impl JobStore for FirestoreJobStore {
    async fn create(&self, job: &TryonJob) -> TryonResult<()> {
        self.repo.create(job).await?;
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> TryonResult<Option<TryonJob>> {
        Ok(self.repo.get(job_id).await?)
    }

    async fn transition(
        &self,
        job_id: &JobId,
        transition: JobTransition,
    ) -> TryonResult<TryonJob> {
        for attempt in 0..MAX_WRITE_ATTEMPTS {
            let current = self
                .repo
                .get_versioned(job_id)
                .await?
                .ok_or_else(TryonError::job_not_found)?;

            let mut next = current.value;
            next.apply(&transition, Utc::now())?;

            match self.repo.write_lifecycle(&next, &current.update_time).await {
                Ok(_) => return Ok(next),
                Err(e) if e.is_precondition_failed() => {
                    conflict_backoff(JOBS_COLLECTION, job_id.as_str(), attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(
            job_id = %job_id,
            transition = transition.name(),
            "Job transition failed after retries"
        );
        Err(TryonError::internal(
            "Failed to update job due to concurrent updates",
        ))
    }

    async fn list_stale(
        &self,
        status: JobStatus,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> TryonResult<Vec<TryonJob>> {
        Ok(self
            .repo
            .list_by_status(status, updated_before, query_limit(limit))
            .await?)
    }

    async fn list_uncharged(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> TryonResult<Vec<TryonJob>> {
        Ok(self
            .repo
            .list_uncharged_completed(updated_before, query_limit(limit))
            .await?)
    }
}

/// Credit fields on `users/{uid}`.
#[derive(Clone)]
pub struct FirestoreCreditStore {
    accounts: CreditAccountRepository,
    jobs: TryonJobRepository,
}

impl FirestoreCreditStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self {
            accounts: CreditAccountRepository::new(client.clone()),
            jobs: TryonJobRepository::new(client),
        }
    }

    /// Run `change` against the freshest account and write it back under a
    /// precondition. `change` returns `false` to leave the account as read.
    async fn update_account<F>(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        mut change: F,
    ) -> TryonResult<CreditAccount>
    where
        F: FnMut(&mut CreditAccount) -> bool + Send,
    {
        for attempt in 0..MAX_WRITE_ATTEMPTS {
            let current = self
                .accounts
                .get_versioned(user_id)
                .await?
                .ok_or_else(|| TryonError::not_found("User not found"))?;

            let mut account = current.value;
            if !change(&mut account) {
                return Ok(account);
            }

            match self.accounts.write(&account, &current.update_time, now).await {
                Ok(_) => return Ok(account),
                Err(e) if e.is_precondition_failed() => {
                    conflict_backoff(USERS_COLLECTION, user_id, attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(user_id, "Credit account update failed after retries");
        Err(TryonError::internal(
            "Failed to update credits due to concurrent updates",
        ))
    }
}

#[async_trait]
impl CreditStore for FirestoreCreditStore {
    async fn get_or_create(&self, user_id: &str, now: DateTime<Utc>) -> TryonResult<CreditAccount> {
        if let Some(existing) = self.accounts.get_versioned(user_id).await? {
            return Ok(existing.value);
        }

        match self
            .accounts
            .create(&CreditAccount::new_free(user_id, now), now)
            .await
        {
            Ok(created) => Ok(created.value),
            Err(FirestoreError::AlreadyExists(_)) => self
                .accounts
                .get_versioned(user_id)
                .await?
                .map(|v| v.value)
                .ok_or_else(|| TryonError::not_found("User not found")),
            Err(e) => Err(e.into()),
        }
    }

    async fn reset_period(
        &self,
        user_id: &str,
        expected_period_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> TryonResult<CreditAccount> {
        let account = self
            .update_account(user_id, now, |account| {
                if account.period_end != expected_period_end {
                    return false;
                }
                account.reset_period(now);
                true
            })
            .await?;

        info!(user_id, period_end = %account.period_end, "Credit period reset");
        Ok(account)
    }

    async fn charge_job(
        &self,
        job_id: &JobId,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> TryonResult<ChargeOutcome> {
        for attempt in 0..MAX_WRITE_ATTEMPTS {
            let current = self
                .jobs
                .get_versioned(job_id)
                .await?
                .filter(|v| v.value.is_owned_by(user_id))
                .ok_or_else(TryonError::job_not_found)?;

            let job = current.value;
            if job.status != JobStatus::Completed {
                return Err(TryonError::precondition(
                    "Credits can only be charged for completed jobs",
                ));
            }
            if job.credit_charged {
                return Ok(ChargeOutcome::AlreadyCharged);
            }

            // The increment requires the user document to exist.
            self.get_or_create(user_id, now).await?;

            match self.jobs.commit_charge(&job, &current.update_time, now).await {
                Ok(()) => return Ok(ChargeOutcome::Charged),
                Err(e) if e.is_precondition_failed() => {
                    conflict_backoff(JOBS_COLLECTION, job_id.as_str(), attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(job_id = %job_id, user_id, "Credit charge failed after retries");
        Err(TryonError::internal(
            "Failed to charge credits due to concurrent updates",
        ))
    }

    async fn set_plan(
        &self,
        user_id: &str,
        plan: PlanTier,
        now: DateTime<Utc>,
    ) -> TryonResult<CreditAccount> {
        self.get_or_create(user_id, now).await?;
        self.update_account(user_id, now, |account| {
            account.change_plan(plan, now);
            true
        })
        .await
    }
}

/// Avatars and fits under `users/{uid}`.
#[derive(Clone)]
pub struct FirestoreSourceImages {
    repo: SourceImageRepository,
}

impl FirestoreSourceImages {
    pub fn new(client: FirestoreClient) -> Self {
        Self {
            repo: SourceImageRepository::new(client),
        }
    }
}

#[async_trait]
impl SourceImageStore for FirestoreSourceImages {
    async fn find(
        &self,
        user_id: &str,
        kind: SourceKind,
        id: &str,
    ) -> TryonResult<Option<SourceImage>> {
        Ok(self.repo.get(user_id, kind, id).await?)
    }
}
