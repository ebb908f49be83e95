//! Plan tiers and per-user credit accounts.

use chrono::{DateTime, Duration, Months, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Plan tier enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Starter,
    Premium,
    Exclusive,
}

impl PlanTier {
    /// Parse from string (case-insensitive). Unknown plans are rejected.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "free" => Some(PlanTier::Free),
            "starter" => Some(PlanTier::Starter),
            "premium" => Some(PlanTier::Premium),
            "exclusive" => Some(PlanTier::Exclusive),
            _ => None,
        }
    }

    /// Generations granted per period.
    pub fn credits_per_period(&self) -> u32 {
        match self {
            PlanTier::Free => 3,
            PlanTier::Starter => 30,
            PlanTier::Premium => 60,
            PlanTier::Exclusive => 120,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, PlanTier::Free)
    }

    /// Get the plan name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Starter => "starter",
            PlanTier::Premium => "premium",
            PlanTier::Exclusive => "exclusive",
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One calendar month after `at`, clamped to the end of shorter months.
pub fn add_one_month(at: DateTime<Utc>) -> DateTime<Utc> {
    at.checked_add_months(Months::new(1))
        .unwrap_or_else(|| at + Duration::days(30))
}

/// Per-user quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CreditAccount {
    pub user_id: String,
    pub plan: PlanTier,
    pub credits_total: u32,
    pub credits_used_this_period: u32,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

impl CreditAccount {
    /// A fresh free-plan account.
    pub fn new_free(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            plan: PlanTier::Free,
            credits_total: PlanTier::Free.credits_per_period(),
            credits_used_this_period: 0,
            period_start: now,
            period_end: add_one_month(now),
        }
    }

    pub fn credits_remaining(&self) -> u32 {
        self.credits_total
            .saturating_sub(self.credits_used_this_period)
    }

    /// Paid periods roll over lazily once they have ended. Free usage never resets.
    pub fn needs_period_reset(&self, now: DateTime<Utc>) -> bool {
        !self.plan.is_free() && now >= self.period_end
    }

    pub fn reset_period(&mut self, now: DateTime<Utc>) {
        self.credits_used_this_period = 0;
        self.period_start = now;
        self.period_end = add_one_month(now);
    }

    /// Switch plans. Paid plans start a fresh period; the free plan keeps usage.
    pub fn change_plan(&mut self, plan: PlanTier, now: DateTime<Utc>) {
        self.plan = plan;
        self.credits_total = plan.credits_per_period();
        if !plan.is_free() {
            self.reset_period(now);
        }
    }

    pub fn info(&self) -> CreditInfo {
        CreditInfo {
            plan: self.plan,
            credits_total: self.credits_total,
            credits_used_this_period: self.credits_used_this_period,
            credits_remaining: self.credits_remaining(),
            period_start: self.period_start,
            period_end: self.period_end,
        }
    }
}

/// Client-facing credit summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CreditInfo {
    pub plan: PlanTier,
    pub credits_total: u32,
    pub credits_used_this_period: u32,
    pub credits_remaining: u32,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Result of a credit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CreditCheck {
    pub has_credits: bool,
    pub credit_info: CreditInfo,
}

/// Outcome of charging a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChargeOutcome {
    /// Usage was incremented and the job flagged.
    Charged,
    /// The job had already been charged; nothing changed.
    AlreadyCharged,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_plan_credits() {
        assert_eq!(PlanTier::Free.credits_per_period(), 3);
        assert_eq!(PlanTier::Starter.credits_per_period(), 30);
        assert_eq!(PlanTier::Premium.credits_per_period(), 60);
        assert_eq!(PlanTier::Exclusive.credits_per_period(), 120);
    }

    #[test]
    fn test_plan_from_str() {
        assert_eq!(PlanTier::from_str("premium"), Some(PlanTier::Premium));
        assert_eq!(PlanTier::from_str(" Starter "), Some(PlanTier::Starter));
        assert_eq!(PlanTier::from_str("pro"), None);
    }

    #[test]
    fn test_remaining_never_negative() {
        let mut account = CreditAccount::new_free("u1", at(2024, 1, 10));
        account.credits_used_this_period = 5;
        assert_eq!(account.credits_remaining(), 0);
        assert_eq!(account.info().credits_remaining, 0);
    }

    #[test]
    fn test_free_plan_never_resets() {
        let mut account = CreditAccount::new_free("u1", at(2024, 1, 10));
        account.credits_used_this_period = 3;
        assert!(!account.needs_period_reset(at(2025, 1, 1)));
    }

    #[test]
    fn test_paid_plan_resets_at_period_end() {
        let mut account = CreditAccount::new_free("u1", at(2024, 1, 10));
        account.change_plan(PlanTier::Starter, at(2024, 1, 10));
        account.credits_used_this_period = 12;

        assert_eq!(account.period_end, at(2024, 2, 10));
        assert!(!account.needs_period_reset(at(2024, 2, 9)));
        assert!(account.needs_period_reset(at(2024, 2, 10)));

        account.reset_period(at(2024, 2, 11));
        assert_eq!(account.credits_used_this_period, 0);
        assert_eq!(account.period_start, at(2024, 2, 11));
        assert_eq!(account.period_end, at(2024, 3, 11));
    }

    #[test]
    fn test_downgrade_to_free_keeps_usage() {
        let mut account = CreditAccount::new_free("u1", at(2024, 1, 10));
        account.change_plan(PlanTier::Premium, at(2024, 1, 10));
        account.credits_used_this_period = 2;

        account.change_plan(PlanTier::Free, at(2024, 1, 20));
        assert_eq!(account.credits_total, 3);
        assert_eq!(account.credits_used_this_period, 2);
        assert_eq!(account.credits_remaining(), 1);
    }

    #[test]
    fn test_add_one_month_clamps() {
        assert_eq!(add_one_month(at(2024, 1, 31)), at(2024, 2, 29));
    }
}
