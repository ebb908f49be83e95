//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use clozet_queue::{JobQueue, ProcessTryonJob, QueueError, QueueResult};
use clozet_tryon::{JobOrchestrator, ProcessOutcome};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

/// What happens to a stream entry once its job has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done with it, including jobs that were already terminal.
    Ack,
    /// Leave it pending and count the attempt; dead-letter at the limit.
    Retry,
    /// Leave it pending without counting: the worker is shutting down.
    Release,
    /// Nothing will make this succeed.
    DeadLetter,
}

impl Disposition {
    pub fn of(result: &WorkerResult<ProcessOutcome>) -> Self {
        match result {
            Ok(_) => Disposition::Ack,
            Err(e) if e.is_cancelled() => Disposition::Release,
            Err(e) if e.is_retryable() => Disposition::Retry,
            Err(_) => Disposition::DeadLetter,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Retry => "retry",
            Disposition::Release => "release",
            Disposition::DeadLetter => "dead_letter",
        }
    }
}

/// Next step for a retryable failure once its attempt has been counted.
#[derive(Debug)]
pub enum RetryStep {
    /// Leave it pending for redelivery.
    Redeliver { attempts: u32 },
    /// Out of attempts.
    DeadLetter { attempts: u32 },
    /// The counter is unavailable. Left pending without counting; the
    /// claim loop redelivers it.
    Uncounted(QueueError),
}

impl RetryStep {
    pub fn after(counted: QueueResult<u32>, max_retries: u32) -> Self {
        match counted {
            Ok(attempts) if attempts >= max_retries => RetryStep::DeadLetter { attempts },
            Ok(attempts) => RetryStep::Redeliver { attempts },
            Err(e) => RetryStep::Uncounted(e),
        }
    }
}

/// Consumes the try-on stream and runs each job through the orchestrator.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    orchestrator: Arc<JobOrchestrator>,
    job_semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: JobQueue, orchestrator: Arc<JobOrchestrator>) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue: Arc::new(queue),
            orchestrator,
            job_semaphore,
            shutdown: CancellationToken::new(),
            consumer_name,
        }
    }

    /// Token cancelled on shutdown. In-flight jobs observe child tokens.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run until shutdown is signalled, then drain in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            consumer = %self.consumer_name,
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "Starting try-on executor"
        );

        self.queue.init().await?;

        let claim_task = tokio::spawn(Self::claim_loop(
            self.config.clone(),
            Arc::clone(&self.queue),
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.job_semaphore),
            self.shutdown.clone(),
            self.consumer_name.clone(),
        ));

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping executor");
                    break;
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!(error = %e, "Failed to read from try-on stream");
                        tokio::select! {
                            _ = self.shutdown.cancelled() => {}
                            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                        }
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "In-flight jobs still running, leaving them for redelivery"
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Re-run entries other consumers read but never acknowledged.
    async fn claim_loop(
        config: WorkerConfig,
        queue: Arc<JobQueue>,
        orchestrator: Arc<JobOrchestrator>,
        semaphore: Arc<Semaphore>,
        shutdown: CancellationToken,
        consumer_name: String,
    ) {
        let min_idle_ms = config.claim_min_idle.as_millis() as u64;
        let mut interval = tokio::time::interval(config.claim_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let claimed = match queue.claim_pending(&consumer_name, min_idle_ms, 5).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    warn!(error = %e, "Failed to claim idle entries");
                    continue;
                }
            };
            if claimed.is_empty() {
                continue;
            }

            info!(count = claimed.len(), "Claimed idle try-on entries");
            for (message_id, job) in claimed {
                let permit = tokio::select! {
                    _ = shutdown.cancelled() => return,
                    permit = Arc::clone(&semaphore).acquire_owned() => permit,
                };
                let Ok(permit) = permit else { return };

                let orchestrator = Arc::clone(&orchestrator);
                let queue = Arc::clone(&queue);
                let cancel = shutdown.child_token();
                tokio::spawn(async move {
                    let _permit = permit;
                    Self::execute_job(orchestrator, queue, message_id, job, cancel).await;
                });
            }
        }
    }

    /// Read new entries, up to the free slots, and spawn a task for each.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!(count = jobs.len(), "Read try-on entries");

        for (message_id, job) in jobs {
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;

            let orchestrator = Arc::clone(&self.orchestrator);
            let queue = Arc::clone(&self.queue);
            let cancel = self.shutdown.child_token();
            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(orchestrator, queue, message_id, job, cancel).await;
            });
        }

        Ok(())
    }

    /// Run one job and settle its stream entry.
    async fn execute_job(
        orchestrator: Arc<JobOrchestrator>,
        queue: Arc<JobQueue>,
        message_id: String,
        job: ProcessTryonJob,
        cancel: CancellationToken,
    ) {
        let logger = JobLogger::new(&message_id, &job);
        let span = logger.span();

        async {
            logger.received();
            let result = orchestrator
                .process(&job.job_id, &cancel)
                .await
                .map_err(WorkerError::from);

            let disposition = Disposition::of(&result);
            counter!("tryon_worker_messages_total", "disposition" => disposition.as_str())
                .increment(1);

            match (disposition, &result) {
                (Disposition::Ack, Ok(outcome)) => {
                    logger.finished(outcome);
                    if let Err(e) = queue.ack(&message_id).await {
                        error!(message_id = %message_id, error = %e, "Failed to ack try-on job");
                    }
                }
                (Disposition::Release, _) => logger.released(),
                (Disposition::Retry, Err(e)) => {
                    logger.failed(e, true);
                    let max_retries = queue.max_retries();
                    let counted = queue.increment_retry(&message_id).await;

                    match RetryStep::after(counted, max_retries) {
                        RetryStep::DeadLetter { attempts } => {
                            warn!(job_id = %job.job_id, attempts, max_retries, "Retries exhausted, dead-lettering");
                            Self::dead_letter(&queue, &message_id, &job, &e.to_string()).await;
                        }
                        RetryStep::Redeliver { attempts } => {
                            info!(job_id = %job.job_id, attempts, max_retries, "Left pending for redelivery");
                        }
                        RetryStep::Uncounted(count_err) => {
                            warn!(
                                job_id = %job.job_id,
                                error = %count_err,
                                "Could not count retry, left pending for the claim loop"
                            );
                        }
                    }
                }
                (_, Err(e)) => {
                    logger.failed(e, false);
                    Self::dead_letter(&queue, &message_id, &job, &e.to_string()).await;
                }
                (_, Ok(_)) => {}
            }
        }
        .instrument(span)
        .await;
    }

    async fn dead_letter(queue: &JobQueue, message_id: &str, job: &ProcessTryonJob, reason: &str) {
        if let Err(e) = queue.dlq(message_id, job, reason).await {
            error!(job_id = %job.job_id, message_id, error = %e, "Failed to dead-letter try-on job");
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.config.max_concurrent_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clozet_firestore::FirestoreError;
    use clozet_tryon::TryonError;

    #[test]
    fn test_retry_step() {
        assert!(matches!(
            RetryStep::after(Ok(1), 3),
            RetryStep::Redeliver { attempts: 1 }
        ));
        assert!(matches!(
            RetryStep::after(Ok(3), 3),
            RetryStep::DeadLetter { attempts: 3 }
        ));

        // A Redis hiccup on the counter must not dead-letter a healthy job
        let io = redis::RedisError::from((redis::ErrorKind::IoError, "connection reset"));
        let step = RetryStep::after(Err(QueueError::Redis(io)), 3);
        assert!(matches!(step, RetryStep::Uncounted(_)));
    }

    #[test]
    fn test_disposition() {
        assert_eq!(Disposition::of(&Ok(ProcessOutcome::Completed)), Disposition::Ack);
        assert_eq!(Disposition::of(&Ok(ProcessOutcome::Failed)), Disposition::Ack);
        assert_eq!(
            Disposition::of(&Ok(ProcessOutcome::AlreadyTerminal)),
            Disposition::Ack
        );
        assert_eq!(
            Disposition::of(&Err(TryonError::Cancelled.into())),
            Disposition::Release
        );
        assert_eq!(
            Disposition::of(&Err(TryonError::Firestore(FirestoreError::ServerError(
                503,
                "unavailable".to_string()
            ))
            .into())),
            Disposition::Retry
        );
        assert_eq!(
            Disposition::of(&Err(TryonError::job_not_found().into())),
            Disposition::DeadLetter
        );
    }
}
