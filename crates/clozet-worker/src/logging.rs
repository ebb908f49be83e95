//! Per-delivery job logging.

use tokio::time::Instant;

use tracing::{error, info, info_span, warn, Span};

use clozet_queue::ProcessTryonJob;
use clozet_tryon::ProcessOutcome;

/// Logs one delivery of a try-on job. Every event carries the job, owner
/// and stream entry; terminal events also carry the run time.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    user_id: String,
    message_id: String,
    revision: i64,
    started: Instant,
}

impl JobLogger {
    pub fn new(message_id: &str, job: &ProcessTryonJob) -> Self {
        Self {
            job_id: job.job_id.to_string(),
            user_id: job.user_id.clone(),
            message_id: message_id.to_string(),
            revision: job.revision,
            started: Instant::now(),
        }
    }

    /// Span over the whole delivery.
    pub fn span(&self) -> Span {
        info_span!(
            "tryon_job",
            job_id = %self.job_id,
            user_id = %self.user_id,
            message_id = %self.message_id,
            revision = self.revision
        )
    }

    pub fn received(&self) {
        info!(job_id = %self.job_id, message_id = %self.message_id, "Processing try-on job");
    }

    pub fn finished(&self, outcome: &ProcessOutcome) {
        info!(
            job_id = %self.job_id,
            outcome = ?outcome,
            elapsed_ms = self.elapsed_ms(),
            "Try-on job settled"
        );
    }

    /// Shutdown interrupted the run; the entry stays pending.
    pub fn released(&self) {
        warn!(
            job_id = %self.job_id,
            message_id = %self.message_id,
            elapsed_ms = self.elapsed_ms(),
            "Try-on job interrupted by shutdown, left for redelivery"
        );
    }

    pub fn failed(&self, error: &dyn std::fmt::Display, retryable: bool) {
        error!(
            job_id = %self.job_id,
            retryable,
            elapsed_ms = self.elapsed_ms(),
            error = %error,
            "Try-on job delivery failed"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clozet_models::JobId;

    fn message() -> ProcessTryonJob {
        ProcessTryonJob {
            job_id: JobId::from_string("job-123"),
            user_id: "u1".to_string(),
            revision: 2,
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn test_logger_carries_delivery_fields() {
        let logger = JobLogger::new("1700000000000-0", &message());
        logger.received();
        logger.finished(&ProcessOutcome::Completed);

        assert_eq!(logger.job_id(), "job-123");
        assert_eq!(logger.user_id, "u1");
        assert_eq!(logger.message_id, "1700000000000-0");
        assert_eq!(logger.revision, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_tracks_run_time() {
        let logger = JobLogger::new("1-0", &message());
        tokio::time::advance(std::time::Duration::from_millis(250)).await;
        assert!(logger.elapsed_ms() >= 250);
    }
}
