//! Re-running failed jobs.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use clozet_models::{JobId, JobStatus, JobTransition};

use crate::error::{TryonError, TryonResult};
use crate::store::{JobDispatcher, JobStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryAccepted {
    pub success: bool,
    pub status: JobStatus,
}

#[derive(Clone)]
pub struct RetryService {
    jobs: Arc<dyn JobStore>,
    dispatcher: Arc<dyn JobDispatcher>,
}

impl RetryService {
    pub fn new(jobs: Arc<dyn JobStore>, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self { jobs, dispatcher }
    }

    /// Put a failed job back to `pending` and dispatch it again. The row,
    /// its refs and options are reused.
    pub async fn retry(&self, job_id: &JobId, user_id: &str) -> TryonResult<RetryAccepted> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .filter(|job| job.is_owned_by(user_id))
            .ok_or_else(TryonError::job_not_found)?;

        if job.status != JobStatus::Failed {
            return Err(TryonError::invalid_state("Can only retry failed jobs"));
        }

        let job = self
            .jobs
            .transition(job_id, JobTransition::Rearm)
            .await
            .map_err(|e| match e {
                // Lost a race with another retry
                TryonError::Transition(_) => TryonError::invalid_state("Can only retry failed jobs"),
                other => other,
            })?;
        info!(job_id = %job_id, user_id, "Retrying try-on job");

        if let Err(e) = self.dispatcher.dispatch(&job).await {
            warn!(job_id = %job_id, error = %e, "Dispatch failed, job left pending");
        }

        Ok(RetryAccepted {
            success: true,
            status: job.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDispatcher, MemoryJobStore};
    use chrono::Utc;
    use clozet_models::{JobOptions, TryonJob};

    fn fixture() -> (RetryService, Arc<MemoryJobStore>, Arc<MemoryDispatcher>) {
        let jobs = Arc::new(MemoryJobStore::new());
        let dispatcher = Arc::new(MemoryDispatcher::new());
        (
            RetryService::new(jobs.clone(), dispatcher.clone()),
            jobs,
            dispatcher,
        )
    }

    fn job_in(status: JobStatus) -> TryonJob {
        let mut options = JobOptions::new();
        options.insert("style".to_string(), serde_json::json!("casual"));
        let mut job = TryonJob::new("u1", "a1", "avatars/a.jpg", "f1", "fits/f.jpg", options);
        let now = Utc::now();
        if status != JobStatus::Pending {
            job.apply(&JobTransition::BeginProcessing, now).unwrap();
        }
        match status {
            JobStatus::Completed => job
                .apply(
                    &JobTransition::Complete {
                        result_ref: "results/r.png".to_string(),
                    },
                    now,
                )
                .unwrap(),
            JobStatus::Failed => {
                job.provider_job_id = Some("token".to_string());
                job.apply(
                    &JobTransition::Fail {
                        message: "Job timed out after 10 attempts".to_string(),
                    },
                    now,
                )
                .unwrap()
            }
            _ => {}
        }
        job
    }

    #[tokio::test]
    async fn test_retry_rearms_failed_job() {
        let (service, jobs, dispatcher) = fixture();
        let job = job_in(JobStatus::Failed);
        jobs.put(job.clone());

        let accepted = service.retry(&job.id, "u1").await.unwrap();
        assert_eq!(
            accepted,
            RetryAccepted {
                success: true,
                status: JobStatus::Pending
            }
        );

        let stored = jobs.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert!(stored.error_message.is_none());
        assert!(stored.provider_job_id.is_none());
        assert_eq!(stored.avatar_ref, job.avatar_ref);
        assert_eq!(stored.options.get("style"), job.options.get("style"));
        assert_eq!(dispatcher.dispatched(), vec![job.id]);
    }

    #[tokio::test]
    async fn test_retry_rejects_non_failed_jobs() {
        let (service, jobs, dispatcher) = fixture();
        for status in [JobStatus::Pending, JobStatus::Processing, JobStatus::Completed] {
            let job = job_in(status);
            jobs.put(job.clone());

            let err = service.retry(&job.id, "u1").await.unwrap_err();
            assert!(matches!(err, TryonError::InvalidState(_)), "{}", status);
            assert_eq!(jobs.get(&job.id).await.unwrap().unwrap().status, status);
        }
        assert!(dispatcher.dispatched().is_empty());
    }

    #[tokio::test]
    async fn test_retry_requires_ownership() {
        let (service, jobs, _) = fixture();
        let job = job_in(JobStatus::Failed);
        jobs.put(job.clone());

        let err = service.retry(&job.id, "intruder").await.unwrap_err();
        assert!(matches!(err, TryonError::NotFound(_)));
        assert_eq!(
            jobs.get(&job.id).await.unwrap().unwrap().status,
            JobStatus::Failed
        );
    }
}
