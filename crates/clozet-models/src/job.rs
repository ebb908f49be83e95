//! Try-on job records and their lifecycle.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque style hints attached to a job.
pub type JobOptions = serde_json::Map<String, serde_json::Value>;

/// Option key merged into a job when its result lands in the user's gallery.
pub const SAVED_TO_GALLERY: &str = "saved_to_gallery";

/// Unique identifier for a try-on job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a try-on job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, waiting for a worker
    #[default]
    Pending,
    /// Owned by an orchestration task
    Processing,
    /// Result stored
    Completed,
    /// Failed with an error message (may be retried)
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parse from the stored string form.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    ///
    /// `pending -> processing -> {completed | failed}`, plus `failed -> pending`
    /// for an explicit retry. Nothing else.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Failed, JobStatus::Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A lifecycle write against a job.
///
/// Stores apply these through [`TryonJob::apply`] so every backend enforces
/// the same graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTransition {
    /// `pending -> processing`. Re-entering an already processing job is a
    /// no-op so redelivered queue messages can resume it.
    BeginProcessing,
    /// Attach the provider token while processing.
    RecordSubmission { provider_job_id: String },
    /// `processing -> completed`.
    Complete { result_ref: String },
    /// `processing -> failed`.
    Fail { message: String },
    /// `failed -> pending` (retry).
    Rearm,
}

impl JobTransition {
    pub fn name(&self) -> &'static str {
        match self {
            JobTransition::BeginProcessing => "begin_processing",
            JobTransition::RecordSubmission { .. } => "record_submission",
            JobTransition::Complete { .. } => "complete",
            JobTransition::Fail { .. } => "fail",
            JobTransition::Rearm => "rearm",
        }
    }
}

/// Rejected lifecycle write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {action} a job that is {from}")]
    InvalidTransition {
        from: JobStatus,
        action: &'static str,
    },

    #[error("a completed job requires a result reference")]
    MissingResult,

    #[error("credit can only be charged for completed jobs (job is {0})")]
    NotChargeable(JobStatus),
}

/// One try-on generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TryonJob {
    /// Unique job ID
    pub id: JobId,

    /// Owner
    pub user_id: String,

    /// Avatar record ID
    pub avatar_id: String,

    /// Avatar storage path (or absolute URL)
    pub avatar_ref: String,

    /// Fit record ID
    pub fit_id: String,

    /// Fit storage path (or absolute URL)
    pub fit_ref: String,

    /// Lifecycle status
    pub status: JobStatus,

    /// Serialized provider token for the current attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_job_id: Option<String>,

    /// Stored result path or absolute URL; set only when completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,

    /// Human-readable failure cause
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Whether usage has been debited for this job
    #[serde(default)]
    pub credit_charged: bool,

    /// Style hints
    #[serde(default)]
    pub options: JobOptions,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl TryonJob {
    /// Create a new pending job.
    pub fn new(
        user_id: impl Into<String>,
        avatar_id: impl Into<String>,
        avatar_ref: impl Into<String>,
        fit_id: impl Into<String>,
        fit_ref: impl Into<String>,
        options: JobOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            user_id: user_id.into(),
            avatar_id: avatar_id.into(),
            avatar_ref: avatar_ref.into(),
            fit_id: fit_id.into(),
            fit_ref: fit_ref.into(),
            status: JobStatus::Pending,
            provider_job_id: None,
            result_ref: None,
            error_message: None,
            credit_charged: false,
            options,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a lifecycle write, enforcing the status graph.
    pub fn apply(
        &mut self,
        transition: &JobTransition,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let invalid = |from: JobStatus| TransitionError::InvalidTransition {
            from,
            action: transition.name(),
        };

        match transition {
            JobTransition::BeginProcessing => match self.status {
                JobStatus::Pending => self.status = JobStatus::Processing,
                JobStatus::Processing => {}
                other => return Err(invalid(other)),
            },
            JobTransition::RecordSubmission { provider_job_id } => {
                if self.status != JobStatus::Processing {
                    return Err(invalid(self.status));
                }
                self.provider_job_id = Some(provider_job_id.clone());
            }
            JobTransition::Complete { result_ref } => {
                if !self.status.can_transition_to(JobStatus::Completed) {
                    return Err(invalid(self.status));
                }
                if result_ref.trim().is_empty() {
                    return Err(TransitionError::MissingResult);
                }
                self.status = JobStatus::Completed;
                self.result_ref = Some(result_ref.clone());
                self.error_message = None;
                self.options
                    .insert(SAVED_TO_GALLERY.to_string(), serde_json::Value::Bool(true));
            }
            JobTransition::Fail { message } => {
                if !self.status.can_transition_to(JobStatus::Failed) {
                    return Err(invalid(self.status));
                }
                self.status = JobStatus::Failed;
                self.error_message = Some(message.clone());
            }
            JobTransition::Rearm => {
                if !self.status.can_transition_to(JobStatus::Pending) {
                    return Err(invalid(self.status));
                }
                self.status = JobStatus::Pending;
                self.error_message = None;
                self.result_ref = None;
                self.provider_job_id = None;
            }
        }

        self.updated_at = now;
        Ok(())
    }

    /// Flip `credit_charged`. Returns `false` if it was already set.
    pub fn mark_charged(&mut self) -> Result<bool, TransitionError> {
        if self.status != JobStatus::Completed {
            return Err(TransitionError::NotChargeable(self.status));
        }
        if self.credit_charged {
            return Ok(false);
        }
        self.credit_charged = true;
        Ok(true)
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// Whether a stored reference is already a fetchable URL rather than a
/// storage path.
pub fn is_absolute_url(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}
