//! Messages carried on the try-on stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clozet_models::{JobId, TryonJob};

/// Run the orchestration state machine for one job.
///
/// Only identifies the job. The worker re-reads the job row before acting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessTryonJob {
    pub job_id: JobId,
    pub user_id: String,
    /// `updated_at` of the job when it was dispatched, in epoch millis.
    /// A retry rearms the job and therefore gets a new revision.
    pub revision: i64,
    pub enqueued_at: DateTime<Utc>,
}

impl ProcessTryonJob {
    pub fn for_job(job: &TryonJob) -> Self {
        Self {
            job_id: job.id.clone(),
            user_id: job.user_id.clone(),
            revision: job.updated_at.timestamp_millis(),
            enqueued_at: Utc::now(),
        }
    }

    /// Key for deduplication. Re-dispatching the same revision of a job is
    /// suppressed; a retry is not.
    pub fn idempotency_key(&self) -> String {
        format!("tryon:{}:{}:{}", self.user_id, self.job_id, self.revision)
    }
}
