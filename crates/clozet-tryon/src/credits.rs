//! Credit checks and the once-per-job deduction.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use clozet_models::{ChargeOutcome, CreditAccount, CreditCheck, CreditInfo, JobId, PlanTier};

use crate::error::{TryonError, TryonResult};
use crate::metrics;
use crate::store::CreditStore;

/// Credit rules over a [`CreditStore`].
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn CreditStore>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn CreditStore>) -> Self {
        Self { store }
    }

    /// Current account, rolling a paid plan over into a new period when the
    /// old one has ended.
    async fn current_account(&self, user_id: &str) -> TryonResult<CreditAccount> {
        let now = Utc::now();
        let account = self.store.get_or_create(user_id, now).await?;
        if !account.needs_period_reset(now) {
            return Ok(account);
        }

        debug!(user_id, period_end = %account.period_end, "Credit period ended, resetting");
        self.store
            .reset_period(user_id, account.period_end, now)
            .await
    }

    /// Whether the user may start another try-on.
    pub async fn check_credits(&self, user_id: &str) -> TryonResult<CreditCheck> {
        let account = self.current_account(user_id).await?;
        Ok(CreditCheck {
            has_credits: account.credits_remaining() > 0,
            credit_info: account.info(),
        })
    }

    /// Stored balance, without rolling the period over.
    pub async fn get_credits(&self, user_id: &str) -> TryonResult<CreditInfo> {
        Ok(self.store.get_or_create(user_id, Utc::now()).await?.info())
    }

    /// Charge one credit for a completed job. Charging the same job again is
    /// a no-op that reports `AlreadyCharged`.
    pub async fn deduct_credit(&self, job_id: &JobId, user_id: &str) -> TryonResult<ChargeOutcome> {
        match self.store.charge_job(job_id, user_id, Utc::now()).await {
            Ok(ChargeOutcome::Charged) => {
                metrics::record_credit_charge("charged");
                info!(job_id = %job_id, user_id, "Charged credit for try-on");
                Ok(ChargeOutcome::Charged)
            }
            Ok(ChargeOutcome::AlreadyCharged) => {
                metrics::record_credit_charge("already_charged");
                debug!(job_id = %job_id, user_id, "Credit already charged");
                Ok(ChargeOutcome::AlreadyCharged)
            }
            Err(e) => {
                metrics::record_credit_charge("error");
                warn!(job_id = %job_id, user_id, error = %e, "Failed to charge credit");
                Err(e)
            }
        }
    }

    /// Switch plans. Paid plans start a fresh period.
    pub async fn update_plan(&self, user_id: &str, plan: &str) -> TryonResult<CreditInfo> {
        let tier = PlanTier::from_str(plan).ok_or_else(|| {
            TryonError::validation(format!(
                "Invalid plan '{}'. Must be one of: free, starter, premium, exclusive",
                plan
            ))
        })?;

        let account = self.store.set_plan(user_id, tier, Utc::now()).await?;
        info!(user_id, plan = %tier, credits_total = account.credits_total, "Updated plan");
        Ok(account.info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCreditStore, MemoryJobStore};
    use crate::store::JobStore;
    use chrono::Duration;
    use clozet_models::{JobOptions, JobTransition, TryonJob};

    fn ledger() -> (CreditLedger, Arc<MemoryJobStore>, Arc<MemoryCreditStore>) {
        let jobs = Arc::new(MemoryJobStore::new());
        let credits = Arc::new(MemoryCreditStore::new(jobs.clone()));
        (CreditLedger::new(credits.clone()), jobs, credits)
    }

    async fn completed_job(jobs: &MemoryJobStore, user: &str) -> TryonJob {
        let job = TryonJob::new(user, "a1", "avatars/a.jpg", "f1", "fits/f.jpg", JobOptions::new());
        jobs.create(&job).await.unwrap();
        jobs.transition(&job.id, JobTransition::BeginProcessing)
            .await
            .unwrap();
        jobs.transition(
            &job.id,
            JobTransition::Complete {
                result_ref: "results/u/1.png".to_string(),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_new_user_gets_free_plan() {
        let (ledger, _, _) = ledger();
        let check = ledger.check_credits("new-user").await.unwrap();
        assert!(check.has_credits);
        assert_eq!(check.credit_info.plan, PlanTier::Free);
        assert_eq!(check.credit_info.credits_remaining, 3);
    }

    #[tokio::test]
    async fn test_exhausted_free_plan() {
        let (ledger, _, credits) = ledger();
        let mut account = CreditAccount::new_free("u1", Utc::now() - Duration::days(90));
        account.credits_used_this_period = 3;
        credits.put(account);

        let check = ledger.check_credits("u1").await.unwrap();
        assert!(!check.has_credits);
        assert_eq!(check.credit_info.credits_remaining, 0);
    }

    #[tokio::test]
    async fn test_paid_plan_rolls_over() {
        let (ledger, _, credits) = ledger();
        let start = Utc::now() - Duration::days(45);
        let mut account = CreditAccount::new_free("u1", start);
        account.change_plan(PlanTier::Starter, start);
        account.credits_used_this_period = 30;
        credits.put(account);

        let check = ledger.check_credits("u1").await.unwrap();
        assert!(check.has_credits);
        assert_eq!(check.credit_info.credits_used_this_period, 0);
        assert_eq!(check.credit_info.credits_remaining, 30);
        assert!(check.credit_info.period_end > Utc::now());
    }

    #[tokio::test]
    async fn test_concurrent_deductions_charge_once() {
        let (ledger, jobs, credits) = ledger();
        let job = completed_job(&jobs, "u1").await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                let job_id = job.id.clone();
                tokio::spawn(async move { ledger.deduct_credit(&job_id, "u1").await })
            })
            .collect();

        let mut charged = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == ChargeOutcome::Charged {
                charged += 1;
            }
        }

        assert_eq!(charged, 1);
        assert_eq!(credits.account("u1").unwrap().credits_used_this_period, 1);
    }

    #[tokio::test]
    async fn test_update_plan() {
        let (ledger, _, _) = ledger();
        let info = ledger.update_plan("u1", "Premium").await.unwrap();
        assert_eq!(info.plan, PlanTier::Premium);
        assert_eq!(info.credits_total, 60);
        assert_eq!(info.credits_remaining, 60);

        let err = ledger.update_plan("u1", "platinum").await.unwrap_err();
        assert!(matches!(err, TryonError::Validation(_)));
        assert_eq!(ledger.get_credits("u1").await.unwrap().plan, PlanTier::Premium);
    }
}
