//! Job status reads for the owning user.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use clozet_models::{is_absolute_url, JobId, JobOptions, JobStatus, TryonJob};
use clozet_storage::ImageStore;

use crate::error::{TryonError, TryonResult};
use crate::store::JobStore;

/// What a client sees of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub options: JobOptions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct StatusService {
    jobs: Arc<dyn JobStore>,
    images: Arc<dyn ImageStore>,
    signed_url_ttl: Duration,
}

impl StatusService {
    pub fn new(jobs: Arc<dyn JobStore>, images: Arc<dyn ImageStore>, signed_url_ttl: Duration) -> Self {
        Self {
            jobs,
            images,
            signed_url_ttl,
        }
    }

    /// The caller's job. Jobs of other users read as missing.
    pub async fn get_status(&self, job_id: &JobId, user_id: &str) -> TryonResult<JobView> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .filter(|job| job.is_owned_by(user_id))
            .ok_or_else(TryonError::job_not_found)?;

        let result_url = match job.result_ref.as_deref() {
            Some(reference) => Some(self.resolve(&job, reference).await),
            None => None,
        };

        Ok(JobView {
            id: job.id,
            status: job.status,
            result_url,
            error_message: job.error_message,
            options: job.options,
            created_at: job.created_at,
            updated_at: job.updated_at,
        })
    }

    async fn resolve(&self, job: &TryonJob, reference: &str) -> String {
        if is_absolute_url(reference) {
            return reference.to_string();
        }
        match self
            .images
            .signed_download_url(reference, self.signed_url_ttl)
            .await
        {
            Ok(url) => url,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to sign result URL, returning stored path");
                reference.to_string()
            }
        }
    }
}
