//! Try-on job lifecycle: validate and create, then drive to a terminal state.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use clozet_models::{is_absolute_url, JobId, JobOptions, JobTransition, SourceKind, TryonJob};
use clozet_storage::ImageStore;

use crate::credits::CreditLedger;
use crate::error::{TryonError, TryonResult};
use crate::metrics;
use crate::provider::{Provider, ProviderJobToken, ProviderState, ProviderStatus};
use crate::store::{JobDispatcher, JobStore, SourceImageStore};

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Lifetime of the signed input URLs handed to the provider
    pub signed_url_ttl: Duration,
    /// Sleep between status polls
    pub poll_interval: Duration,
    /// Polls before the job times out
    pub poll_max_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            signed_url_ttl: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(5),
            poll_max_attempts: 10,
        }
    }
}

impl OrchestratorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            signed_url_ttl: std::env::var("TRYON_SIGNED_URL_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.signed_url_ttl),
            poll_interval: std::env::var("TRYON_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            poll_max_attempts: std::env::var("TRYON_POLL_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.poll_max_attempts),
        }
    }
}

/// How a `process` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    Failed,
    /// The job was already terminal; nothing was done.
    AlreadyTerminal,
}

/// Where the provider left the job.
enum Finish {
    Completed(String),
    Failed(String),
}

/// Collaborators of the orchestrator.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub jobs: Arc<dyn JobStore>,
    pub sources: Arc<dyn SourceImageStore>,
    pub dispatcher: Arc<dyn JobDispatcher>,
    /// Only needed to `process`. Processes that just start, inspect or
    /// retry jobs leave it out.
    pub provider: Option<Arc<dyn Provider>>,
    pub images: Arc<dyn ImageStore>,
    pub ledger: CreditLedger,
}

/// Creates try-on jobs and drives them through the provider.
#[derive(Clone)]
pub struct JobOrchestrator {
    deps: OrchestratorDeps,
    config: OrchestratorConfig,
}

impl JobOrchestrator {
    pub fn new(deps: OrchestratorDeps, config: OrchestratorConfig) -> Self {
        Self { deps, config }
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.deps.jobs
    }

    pub fn dispatcher(&self) -> &Arc<dyn JobDispatcher> {
        &self.deps.dispatcher
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.deps.ledger
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Validate the request, write a pending job and hand it to a worker.
    ///
    /// Nothing is written unless the user has credits and both images are
    /// ready. A failed dispatch is logged; the pending sweep picks the job
    /// up later.
    pub async fn start(
        &self,
        user_id: &str,
        avatar_id: &str,
        fit_id: &str,
        options: JobOptions,
    ) -> TryonResult<TryonJob> {
        let check = self.deps.ledger.check_credits(user_id).await?;
        if !check.has_credits {
            metrics::record_job_rejected("insufficient_credits");
            info!(user_id, "Try-on rejected, no credits left");
            return Err(TryonError::InsufficientCredits);
        }

        let avatar_ref = self.ready_source(user_id, SourceKind::Avatar, avatar_id).await?;
        let fit_ref = self.ready_source(user_id, SourceKind::Fit, fit_id).await?;

        let job = TryonJob::new(user_id, avatar_id, avatar_ref, fit_id, fit_ref, options);
        self.deps.jobs.create(&job).await?;
        metrics::record_job_started();
        info!(job_id = %job.id, user_id, avatar_id, fit_id, "Started try-on job");

        if let Err(e) = self.deps.dispatcher.dispatch(&job).await {
            warn!(job_id = %job.id, error = %e, "Dispatch failed, job left pending");
        }

        Ok(job)
    }

    async fn ready_source(&self, user_id: &str, kind: SourceKind, id: &str) -> TryonResult<String> {
        let Some(source) = self.deps.sources.find(user_id, kind, id).await? else {
            metrics::record_job_rejected("source_not_found");
            return Err(TryonError::not_found(format!("{} not found", kind.label())));
        };

        match source.ready_ref() {
            Some(reference) => Ok(reference.to_string()),
            None => {
                metrics::record_job_rejected("source_not_ready");
                Err(TryonError::precondition(format!(
                    "{} is not ready for try-on",
                    kind.label()
                )))
            }
        }
    }

    /// Run a job to a terminal state.
    ///
    /// Any failure after the job is claimed is recorded on the job, except
    /// cancellation: a cancelled job stays `processing` so the queue can
    /// redeliver it.
    pub async fn process(
        &self,
        job_id: &JobId,
        cancel: &CancellationToken,
    ) -> TryonResult<ProcessOutcome> {
        let job = self
            .deps
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(TryonError::job_not_found)?;

        if job.status.is_terminal() {
            debug!(job_id = %job_id, status = %job.status, "Job already terminal, skipping");
            return Ok(ProcessOutcome::AlreadyTerminal);
        }

        let provider = self
            .deps
            .provider
            .as_deref()
            .ok_or_else(|| TryonError::internal("No provider configured for processing"))?;

        let job = self
            .deps
            .jobs
            .transition(job_id, JobTransition::BeginProcessing)
            .await?;

        let finish = match self.run(provider, &job, cancel).await {
            Ok(finish) => finish,
            Err(e) if e.is_cancelled() => {
                info!(job_id = %job_id, "Processing cancelled, job left for redelivery");
                return Err(TryonError::Cancelled);
            }
            Err(e) => Finish::Failed(e.to_string()),
        };

        match finish {
            Finish::Completed(result_ref) => {
                self.deps
                    .jobs
                    .transition(job_id, JobTransition::Complete { result_ref })
                    .await?;
                metrics::record_job_finished("completed");
                info!(job_id = %job_id, user_id = %job.user_id, "Try-on completed");

                if let Err(e) = self.deps.ledger.deduct_credit(job_id, &job.user_id).await {
                    warn!(
                        job_id = %job_id,
                        error = %e,
                        "Credit deduction failed, left for reconciliation"
                    );
                }
                Ok(ProcessOutcome::Completed)
            }
            Finish::Failed(message) => {
                warn!(job_id = %job_id, error = %message, "Try-on failed");
                self.deps
                    .jobs
                    .transition(job_id, JobTransition::Fail { message })
                    .await?;
                metrics::record_job_finished("failed");
                Ok(ProcessOutcome::Failed)
            }
        }
    }

    async fn run(
        &self,
        provider: &dyn Provider,
        job: &TryonJob,
        cancel: &CancellationToken,
    ) -> TryonResult<Finish> {
        let token = match job.provider_job_id.as_deref() {
            Some(raw) => {
                debug!(job_id = %job.id, "Resuming from stored provider token");
                ProviderJobToken::decode(raw)?
            }
            None => self.submit(provider, job, cancel).await?,
        };

        let mut status = Self::status_or_processing(provider, job, &token).await;
        let mut attempts = 0;
        loop {
            if let Some(finish) = Self::finish(&status) {
                return Ok(finish);
            }
            if attempts >= self.config.poll_max_attempts {
                return Err(TryonError::PollTimeout { attempts });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(TryonError::Cancelled),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            attempts += 1;
            metrics::record_poll_attempt();
            status = Self::status_or_processing(provider, job, &token).await;
        }
    }

    async fn submit(
        &self,
        provider: &dyn Provider,
        job: &TryonJob,
        cancel: &CancellationToken,
    ) -> TryonResult<ProviderJobToken> {
        let avatar_url = self.sign(&job.avatar_ref).await?;
        let fit_url = self.sign(&job.fit_ref).await?;

        let token = provider
            .submit(&job.user_id, &avatar_url, &fit_url, &job.options, cancel)
            .await?;

        self.deps
            .jobs
            .transition(
                &job.id,
                JobTransition::RecordSubmission {
                    provider_job_id: token.encode(),
                },
            )
            .await?;
        debug!(job_id = %job.id, "Recorded provider submission");
        Ok(token)
    }

    async fn sign(&self, reference: &str) -> TryonResult<String> {
        if is_absolute_url(reference) {
            return Ok(reference.to_string());
        }
        self.deps
            .images
            .signed_download_url(reference, self.config.signed_url_ttl)
            .await
            .map_err(TryonError::Signing)
    }

    /// Transport errors while polling count as "still processing".
    async fn status_or_processing(
        provider: &dyn Provider,
        job: &TryonJob,
        token: &ProviderJobToken,
    ) -> ProviderStatus {
        match provider.get_status(token).await {
            Ok(status) => status,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Status check failed, will poll again");
                ProviderStatus::processing()
            }
        }
    }

    fn finish(status: &ProviderStatus) -> Option<Finish> {
        if let Some(error) = &status.error {
            return Some(Finish::Failed(error.clone()));
        }
        match status.status {
            ProviderState::Processing => None,
            ProviderState::Failed => Some(Finish::Failed("Generation failed".to_string())),
            ProviderState::Completed => Some(match &status.result {
                Some(result) => Finish::Completed(result.clone()),
                None => Finish::Failed("Provider completed without a result".to_string()),
            }),
        }
    }
}
