//! Background recovery of jobs the queue alone cannot finish.
//!
//! - `pending` jobs whose dispatch failed are dispatched again;
//! - completed jobs whose credit deduction failed are charged;
//! - `processing` jobs no delivery is working on any more are failed so the
//!   user can retry them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use clozet_models::{ChargeOutcome, JobStatus, JobTransition};
use clozet_tryon::{JobOrchestrator, TryonError};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;

/// Error recorded on jobs failed by the stale processing sweep.
pub const INTERRUPTED_MESSAGE: &str = "Processing interrupted. Please retry.";

/// Jobs acted on by one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub charged: usize,
    pub interrupted: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Sweeper {
    orchestrator: Arc<JobOrchestrator>,
    config: WorkerConfig,
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    now - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero())
}

fn record(sweep: &'static str, count: usize) {
    counter!("tryon_sweep_jobs_total", "sweep" => sweep).increment(count as u64);
}

impl Sweeper {
    pub fn new(orchestrator: Arc<JobOrchestrator>, config: WorkerConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Sweep every `sweep_interval` until cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let report = self.sweep_once(Utc::now()).await;
            if !report.is_empty() {
                info!(
                    requeued = report.requeued,
                    charged = report.charged,
                    interrupted = report.interrupted,
                    "Job sweep finished"
                );
            }
        }
        debug!("Sweeper stopped");
    }

    /// Run all three sweeps once. A failing sweep does not stop the others.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        match self.requeue_pending(now).await {
            Ok(n) => report.requeued = n,
            Err(e) => warn!(error = %e, "Pending sweep failed"),
        }
        match self.charge_uncharged(now).await {
            Ok(n) => report.charged = n,
            Err(e) => warn!(error = %e, "Uncharged sweep failed"),
        }
        match self.fail_stale(now).await {
            Ok(n) => report.interrupted = n,
            Err(e) => warn!(error = %e, "Stale processing sweep failed"),
        }

        report
    }

    async fn requeue_pending(&self, now: DateTime<Utc>) -> WorkerResult<usize> {
        let jobs = self
            .orchestrator
            .jobs()
            .list_stale(
                JobStatus::Pending,
                cutoff(now, self.config.pending_requeue_after),
                self.config.sweep_batch_size,
            )
            .await?;

        let mut requeued = 0;
        for job in jobs {
            match self.orchestrator.dispatcher().dispatch(&job).await {
                Ok(()) => {
                    debug!(job_id = %job.id, "Re-dispatched pending job");
                    requeued += 1;
                }
                Err(e) => warn!(job_id = %job.id, error = %e, "Re-dispatch failed"),
            }
        }
        record("pending", requeued);
        Ok(requeued)
    }

    async fn charge_uncharged(&self, now: DateTime<Utc>) -> WorkerResult<usize> {
        let jobs = self
            .orchestrator
            .jobs()
            .list_uncharged(
                cutoff(now, self.config.uncharged_grace),
                self.config.sweep_batch_size,
            )
            .await?;

        let mut charged = 0;
        for job in jobs {
            // deduct_credit logs its own failures
            if let Ok(ChargeOutcome::Charged) =
                self.orchestrator.ledger().deduct_credit(&job.id, &job.user_id).await
            {
                charged += 1;
            }
        }
        record("uncharged", charged);
        Ok(charged)
    }

    async fn fail_stale(&self, now: DateTime<Utc>) -> WorkerResult<usize> {
        let jobs = self
            .orchestrator
            .jobs()
            .list_stale(
                JobStatus::Processing,
                cutoff(now, self.config.processing_stale_after),
                self.config.sweep_batch_size,
            )
            .await?;

        let mut interrupted = 0;
        for job in jobs {
            let failed = self
                .orchestrator
                .jobs()
                .transition(
                    &job.id,
                    JobTransition::Fail {
                        message: INTERRUPTED_MESSAGE.to_string(),
                    },
                )
                .await;

            match failed {
                Ok(_) => {
                    warn!(job_id = %job.id, user_id = %job.user_id, "Failed stale processing job");
                    interrupted += 1;
                }
                // Finished since it was listed
                Err(TryonError::Transition(_)) => {}
                Err(e) => warn!(job_id = %job.id, error = %e, "Could not fail stale job"),
            }
        }
        record("stale_processing", interrupted);
        Ok(interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use clozet_models::{JobOptions, TryonJob};
    use clozet_storage::MemoryImageStore;
    use clozet_tryon::memory::{
        MemoryCreditStore, MemoryDispatcher, MemoryJobStore, MemorySourceImages,
    };
    use clozet_tryon::{CreditLedger, JobStore, OrchestratorConfig, OrchestratorDeps};

    struct Fixture {
        sweeper: Sweeper,
        jobs: Arc<MemoryJobStore>,
        credits: Arc<MemoryCreditStore>,
        dispatcher: Arc<MemoryDispatcher>,
    }

    fn fixture() -> Fixture {
        let jobs = Arc::new(MemoryJobStore::new());
        let credits = Arc::new(MemoryCreditStore::new(jobs.clone()));
        let dispatcher = Arc::new(MemoryDispatcher::new());
        let images = Arc::new(MemoryImageStore::new());

        let deps = OrchestratorDeps {
            jobs: jobs.clone(),
            sources: Arc::new(MemorySourceImages::new()),
            dispatcher: dispatcher.clone(),
            provider: None,
            images,
            ledger: CreditLedger::new(credits.clone()),
        };
        let orchestrator = Arc::new(JobOrchestrator::new(deps, OrchestratorConfig::default()));

        Fixture {
            sweeper: Sweeper::new(orchestrator, WorkerConfig::default()),
            jobs,
            credits,
            dispatcher,
        }
    }

    /// A job in `status`, last written `minutes_ago`.
    fn aged(status: JobStatus, minutes_ago: i64) -> TryonJob {
        let at = Utc::now() - ChronoDuration::minutes(minutes_ago);
        let mut job = TryonJob::new("u1", "a1", "avatars/a.jpg", "f1", "fits/f.jpg", JobOptions::new());
        if status != JobStatus::Pending {
            job.apply(&JobTransition::BeginProcessing, at).unwrap();
        }
        if status == JobStatus::Completed {
            job.apply(
                &JobTransition::Complete {
                    result_ref: "results/u1/1.png".to_string(),
                },
                at,
            )
            .unwrap();
        }
        job.created_at = at;
        job.updated_at = at;
        job
    }

    #[tokio::test]
    async fn test_requeues_only_old_pending_jobs() {
        let f = fixture();
        let old = aged(JobStatus::Pending, 10);
        let fresh = aged(JobStatus::Pending, 0);
        f.jobs.put(old.clone());
        f.jobs.put(fresh);

        let report = f.sweeper.sweep_once(Utc::now()).await;
        assert_eq!(report.requeued, 1);
        assert_eq!(f.dispatcher.dispatched(), vec![old.id]);
    }

    #[tokio::test]
    async fn test_charges_uncharged_completed_jobs_once() {
        let f = fixture();
        let job = aged(JobStatus::Completed, 10);
        f.jobs.put(job.clone());

        let first = f.sweeper.sweep_once(Utc::now()).await;
        let second = f.sweeper.sweep_once(Utc::now()).await;

        assert_eq!(first.charged, 1);
        assert_eq!(second.charged, 0);
        assert!(f.jobs.get(&job.id).await.unwrap().unwrap().credit_charged);
        assert_eq!(f.credits.account("u1").unwrap().credits_used_this_period, 1);
    }

    #[tokio::test]
    async fn test_fresh_completed_job_waits_for_grace() {
        let f = fixture();
        f.jobs.put(aged(JobStatus::Completed, 1));

        let report = f.sweeper.sweep_once(Utc::now()).await;
        assert_eq!(report.charged, 0);
        assert!(f.credits.account("u1").is_none());
    }

    #[tokio::test]
    async fn test_fails_stale_processing_jobs() {
        let f = fixture();
        let stale = aged(JobStatus::Processing, 30);
        let running = aged(JobStatus::Processing, 2);
        f.jobs.put(stale.clone());
        f.jobs.put(running.clone());

        let report = f.sweeper.sweep_once(Utc::now()).await;
        assert_eq!(report.interrupted, 1);

        let stale = f.jobs.get(&stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, JobStatus::Failed);
        assert_eq!(stale.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert_eq!(
            f.jobs.get(&running.id).await.unwrap().unwrap().status,
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_failing_dispatch_does_not_stop_other_sweeps() {
        let f = fixture();
        f.dispatcher.set_failing(true);
        f.jobs.put(aged(JobStatus::Pending, 10));
        f.jobs.put(aged(JobStatus::Processing, 30));

        let report = f.sweeper.sweep_once(Utc::now()).await;
        assert_eq!(
            report,
            SweepReport {
                requeued: 0,
                charged: 0,
                interrupted: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let f = fixture();
        let shutdown = CancellationToken::new();
        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { f.sweeper.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(120)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}
