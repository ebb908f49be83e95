//! Try-on pipeline metrics.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Jobs accepted by `start`.
    pub const JOBS_STARTED_TOTAL: &str = "tryon_jobs_started_total";

    /// Jobs that reached a terminal state, by outcome.
    pub const JOBS_FINISHED_TOTAL: &str = "tryon_jobs_finished_total";

    /// Start requests refused before a job was created, by reason.
    pub const JOBS_REJECTED_TOTAL: &str = "tryon_jobs_rejected_total";

    /// Provider submit latency in seconds by mode and outcome.
    pub const PROVIDER_LATENCY_SECONDS: &str = "tryon_provider_latency_seconds";

    /// Status polls issued while waiting on the provider.
    pub const POLL_ATTEMPTS_TOTAL: &str = "tryon_poll_attempts_total";

    /// Credit deductions by outcome.
    pub const CREDIT_CHARGES_TOTAL: &str = "tryon_credit_charges_total";

    /// Dispatch attempts by outcome.
    pub const DISPATCH_TOTAL: &str = "tryon_dispatch_total";
}

pub fn record_job_started() {
    counter!(names::JOBS_STARTED_TOTAL).increment(1);
}

pub fn record_job_finished(outcome: &str) {
    counter!(
        names::JOBS_FINISHED_TOTAL,
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_job_rejected(reason: &str) {
    counter!(
        names::JOBS_REJECTED_TOTAL,
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_provider_call(mode: &str, outcome: &str, latency_secs: f64) {
    histogram!(
        names::PROVIDER_LATENCY_SECONDS,
        "mode" => mode.to_string(),
        "outcome" => outcome.to_string()
    )
    .record(latency_secs);
}

pub fn record_poll_attempt() {
    counter!(names::POLL_ATTEMPTS_TOTAL).increment(1);
}

pub fn record_credit_charge(outcome: &str) {
    counter!(
        names::CREDIT_CHARGES_TOTAL,
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_dispatch(outcome: &str) {
    counter!(
        names::DISPATCH_TOTAL,
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
