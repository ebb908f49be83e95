//! In-memory stores and dispatcher for local runs and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use clozet_models::{
    ChargeOutcome, CreditAccount, JobId, JobStatus, JobTransition, PlanTier, SourceImage,
    SourceKind, TryonJob,
};

use crate::error::{TryonError, TryonResult};
use crate::store::{CreditStore, JobDispatcher, JobStore, SourceImageStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Jobs keyed by ID. Each transition is applied under one lock, which gives
/// the same read-check-write atomicity the Firestore adapter gets from
/// preconditions.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, TryonJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite a job as-is, bypassing the lifecycle graph.
    pub fn put(&self, job: TryonJob) {
        lock(&self.jobs).insert(job.id.clone(), job);
    }

    pub fn all(&self) -> Vec<TryonJob> {
        lock(&self.jobs).values().cloned().collect()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &TryonJob) -> TryonResult<()> {
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&job.id) {
            return Err(TryonError::internal(format!("Job {} already exists", job.id)));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> TryonResult<Option<TryonJob>> {
        Ok(lock(&self.jobs).get(job_id).cloned())
    }

    async fn transition(
        &self,
        job_id: &JobId,
        transition: JobTransition,
    ) -> TryonResult<TryonJob> {
        let mut jobs = lock(&self.jobs);
        let job = jobs.get_mut(job_id).ok_or_else(TryonError::job_not_found)?;

        let mut next = job.clone();
        next.apply(&transition, Utc::now())?;
        *job = next.clone();
        Ok(next)
    }

    async fn list_stale(
        &self,
        status: JobStatus,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> TryonResult<Vec<TryonJob>> {
        let mut stale: Vec<TryonJob> = lock(&self.jobs)
            .values()
            .filter(|j| j.status == status && j.updated_at < updated_before)
            .cloned()
            .collect();
        stale.sort_by_key(|j| j.updated_at);
        stale.truncate(limit);
        Ok(stale)
    }

    async fn list_uncharged(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> TryonResult<Vec<TryonJob>> {
        let mut uncharged: Vec<TryonJob> = lock(&self.jobs)
            .values()
            .filter(|j| {
                j.status == JobStatus::Completed && !j.credit_charged && j.updated_at < updated_before
            })
            .cloned()
            .collect();
        uncharged.sort_by_key(|j| j.updated_at);
        uncharged.truncate(limit);
        Ok(uncharged)
    }
}

/// Credit accounts backed by a [`MemoryJobStore`] so a charge can flip the
/// job flag and bump usage together.
#[derive(Debug)]
pub struct MemoryCreditStore {
    jobs: Arc<MemoryJobStore>,
    accounts: Mutex<HashMap<String, CreditAccount>>,
}

impl MemoryCreditStore {
    pub fn new(jobs: Arc<MemoryJobStore>) -> Self {
        Self {
            jobs,
            accounts: Mutex::new(HashMap::new()),
        }
    }

    /// Seed or overwrite an account.
    pub fn put(&self, account: CreditAccount) {
        lock(&self.accounts).insert(account.user_id.clone(), account);
    }

    pub fn account(&self, user_id: &str) -> Option<CreditAccount> {
        lock(&self.accounts).get(user_id).cloned()
    }
}

#[async_trait]
impl CreditStore for MemoryCreditStore {
    async fn get_or_create(&self, user_id: &str, now: DateTime<Utc>) -> TryonResult<CreditAccount> {
        let mut accounts = lock(&self.accounts);
        let account = accounts
            .entry(user_id.to_string())
            .or_insert_with(|| CreditAccount::new_free(user_id, now));
        Ok(account.clone())
    }

    async fn reset_period(
        &self,
        user_id: &str,
        expected_period_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> TryonResult<CreditAccount> {
        let mut accounts = lock(&self.accounts);
        let account = accounts
            .get_mut(user_id)
            .ok_or_else(|| TryonError::not_found("User not found"))?;
        if account.period_end == expected_period_end {
            account.reset_period(now);
        }
        Ok(account.clone())
    }

    async fn charge_job(
        &self,
        job_id: &JobId,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> TryonResult<ChargeOutcome> {
        // Lock order: jobs, then accounts.
        let mut jobs = lock(&self.jobs.jobs);
        let job = jobs
            .get_mut(job_id)
            .filter(|j| j.is_owned_by(user_id))
            .ok_or_else(TryonError::job_not_found)?;

        if job.status != JobStatus::Completed {
            return Err(TryonError::precondition(
                "Credits can only be charged for completed jobs",
            ));
        }
        if job.credit_charged {
            return Ok(ChargeOutcome::AlreadyCharged);
        }

        let mut accounts = lock(&self.accounts);
        let account = accounts
            .entry(user_id.to_string())
            .or_insert_with(|| CreditAccount::new_free(user_id, now));

        job.mark_charged()?;
        job.updated_at = now;
        account.credits_used_this_period += 1;
        Ok(ChargeOutcome::Charged)
    }

    async fn set_plan(
        &self,
        user_id: &str,
        plan: PlanTier,
        now: DateTime<Utc>,
    ) -> TryonResult<CreditAccount> {
        let mut accounts = lock(&self.accounts);
        let account = accounts
            .entry(user_id.to_string())
            .or_insert_with(|| CreditAccount::new_free(user_id, now));
        account.change_plan(plan, now);
        Ok(account.clone())
    }
}

/// Avatars and fits keyed by owner, kind and ID.
#[derive(Debug, Default)]
pub struct MemorySourceImages {
    images: Mutex<HashMap<(String, SourceKind, String), SourceImage>>,
}

impl MemorySourceImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, image: SourceImage) {
        lock(&self.images).insert(
            (image.user_id.clone(), image.kind, image.id.clone()),
            image,
        );
    }
}

#[async_trait]
impl SourceImageStore for MemorySourceImages {
    async fn find(
        &self,
        user_id: &str,
        kind: SourceKind,
        id: &str,
    ) -> TryonResult<Option<SourceImage>> {
        Ok(lock(&self.images)
            .get(&(user_id.to_string(), kind, id.to_string()))
            .cloned())
    }
}

/// Records dispatched jobs instead of queueing them.
#[derive(Debug, Default)]
pub struct MemoryDispatcher {
    dispatched: Mutex<Vec<JobId>>,
    failing: AtomicBool,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent dispatch fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn dispatched(&self) -> Vec<JobId> {
        lock(&self.dispatched).clone()
    }
}

#[async_trait]
impl JobDispatcher for MemoryDispatcher {
    async fn dispatch(&self, job: &TryonJob) -> TryonResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TryonError::internal("dispatcher unavailable"));
        }
        lock(&self.dispatched).push(job.id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clozet_models::JobOptions;

    fn job(user: &str) -> TryonJob {
        TryonJob::new(user, "a1", "avatars/a.jpg", "f1", "fits/f.jpg", JobOptions::new())
    }

    fn completed(store: &MemoryJobStore, user: &str) -> TryonJob {
        let mut job = job(user);
        job.apply(&JobTransition::BeginProcessing, Utc::now()).unwrap();
        job.apply(
            &JobTransition::Complete {
                result_ref: "results/x.png".to_string(),
            },
            Utc::now(),
        )
        .unwrap();
        store.put(job.clone());
        job
    }

    #[tokio::test]
    async fn test_transition_rejects_invalid_edges() {
        let store = MemoryJobStore::new();
        let job = job("u1");
        store.create(&job).await.unwrap();

        let err = store
            .transition(
                &job.id,
                JobTransition::Complete {
                    result_ref: "r".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TryonError::Transition(_)));

        let err = store
            .transition(&JobId::new(), JobTransition::BeginProcessing)
            .await
            .unwrap_err();
        assert!(matches!(err, TryonError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_charge_once() {
        let jobs = Arc::new(MemoryJobStore::new());
        let credits = MemoryCreditStore::new(jobs.clone());
        let job = completed(&jobs, "u1");

        let now = Utc::now();
        assert_eq!(
            credits.charge_job(&job.id, "u1", now).await.unwrap(),
            ChargeOutcome::Charged
        );
        assert_eq!(
            credits.charge_job(&job.id, "u1", now).await.unwrap(),
            ChargeOutcome::AlreadyCharged
        );
        assert_eq!(credits.account("u1").unwrap().credits_used_this_period, 1);
        assert!(jobs.get(&job.id).await.unwrap().unwrap().credit_charged);
    }

    #[tokio::test]
    async fn test_charge_requires_owner_and_completion() {
        let jobs = Arc::new(MemoryJobStore::new());
        let credits = MemoryCreditStore::new(jobs.clone());

        let done = completed(&jobs, "u1");
        let err = credits.charge_job(&done.id, "u2", Utc::now()).await.unwrap_err();
        assert!(matches!(err, TryonError::NotFound(_)));

        let pending = job("u1");
        jobs.create(&pending).await.unwrap();
        let err = credits
            .charge_job(&pending.id, "u1", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TryonError::Precondition(_)));
        assert!(credits.account("u1").is_none());
    }

    #[tokio::test]
    async fn test_reset_period_compares_period_end() {
        let jobs = Arc::new(MemoryJobStore::new());
        let credits = MemoryCreditStore::new(jobs);
        let start = Utc::now() - chrono::Duration::days(40);

        let mut account = CreditAccount::new_free("u1", start);
        account.change_plan(PlanTier::Starter, start);
        account.credits_used_this_period = 7;
        credits.put(account.clone());

        let stale = credits
            .reset_period("u1", account.period_start, Utc::now())
            .await
            .unwrap();
        assert_eq!(stale.credits_used_this_period, 7);

        let reset = credits
            .reset_period("u1", account.period_end, Utc::now())
            .await
            .unwrap();
        assert_eq!(reset.credits_used_this_period, 0);
        assert!(reset.period_end > Utc::now());
    }

    #[tokio::test]
    async fn test_sources_are_scoped_to_owner() {
        let sources = MemorySourceImages::new();
        sources.put(SourceImage {
            id: "a1".to_string(),
            user_id: "u1".to_string(),
            kind: SourceKind::Avatar,
            status: "completed".to_string(),
            original_url: Some("avatars/u1/a1.jpg".to_string()),
        });

        assert!(sources.find("u1", SourceKind::Avatar, "a1").await.unwrap().is_some());
        assert!(sources.find("u2", SourceKind::Avatar, "a1").await.unwrap().is_none());
        assert!(sources.find("u1", SourceKind::Fit, "a1").await.unwrap().is_none());
    }
}
